//! Core traits and types for the voice turn-taking engine
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frame types and PCM helpers
//! - Utterances and end-of-turn predictions
//! - Action events exchanged between tools, workers and the action loop
//! - Pluggable backend traits (turn classifier, speech, media)
//! - Error types

pub mod action;
pub mod audio;
pub mod error;
pub mod traits;
pub mod utterance;

pub use action::{ActionEvent, ActionKind};
pub use audio::{rms_i16, AudioFrame, SampleRate, PCM16_NORMALIZE};
pub use error::{Error, Result};
pub use traits::{MediaPlayer, SpeechSynthesizer, TurnClassifier};
pub use utterance::{EndOfTurnPrediction, Utterance};
