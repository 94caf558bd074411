//! Audio pipeline for the turn-taking engine
//!
//! - `capture`: audio sources (microphone, raw PCM on stdin, channels)
//! - `vad`: energy voice activity detection with ambient calibration
//! - `turn_detection`: end-of-turn detector and turn-completion classifier
//! - `stt`: streaming transcription channel client
//! - `tts`: speech segmenting, normalization and the speech output queue
//! - `media`: long-form media playback

pub mod capture;
pub mod media;
pub mod stt;
pub mod tts;
pub mod turn_detection;
pub mod vad;

pub use capture::{AudioSource, ChannelSource, PcmReaderSource};
pub use media::{play_bytes, FfplayPlayer, PlayerCommand};
pub use stt::{
    Handshake, TranscriptAssembler, TranscriptMessage, TranscriptionChannel,
    WsTranscriptionClient,
};
pub use tts::{
    normalize_for_speech, split_text, HttpSpeechBackend, SpeechQueue, SpeechSegment,
    TextSegmenter,
};
pub use turn_detection::{
    ClassifierWorker, DetectedTurn, DetectorConfig, EndOfTurnDetector, FinalizeReason,
    FrameDecision, SmartTurnClassifier, TurnState, TurnTracker,
};
pub use vad::{AmbientCalibrator, EnergyVad, VadEngine};

#[cfg(feature = "microphone")]
pub use capture::MicrophoneSource;

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Connection(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Connection(err.to_string())
    }
}

impl From<PipelineError> for voice_turn_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Model(m) => voice_turn_core::Error::Model(m),
            PipelineError::Speech(m) => voice_turn_core::Error::Speech(m),
            PipelineError::Media(m) => voice_turn_core::Error::Media(m),
            PipelineError::Connection(m) | PipelineError::Protocol(m) => {
                voice_turn_core::Error::Transcription(m)
            }
            PipelineError::Io(e) => voice_turn_core::Error::Io(e),
            other => voice_turn_core::Error::Audio(other.to_string()),
        }
    }
}
