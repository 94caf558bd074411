//! Speech output
//!
//! - `segmenter`: punctuation-driven chunking of streamed text
//! - `normalize`: text cleanup before synthesis
//! - `queue`: single-consumer FIFO with a drain barrier
//! - `http`: PaddleSpeech-style HTTP synthesizer played through the media player

mod http;
mod normalize;
mod queue;
mod segmenter;

pub use http::HttpSpeechBackend;
pub use normalize::normalize_for_speech;
pub use queue::{SpeechQueue, SpeechSegment};
pub use segmenter::{split_text, TextSegmenter};
