//! End-of-turn detection
//!
//! Decides when the user has finished speaking by combining a hard silence
//! timeout with consecutive verdicts from a turn-completion classifier.
//!
//! - `state`: pure frame-by-frame state machine
//! - `worker`: single-thread classifier inference pool
//! - `classifier`: smart-turn ONNX model
//! - `features`: log-mel features for the model
//! - `detector`: async capture loop wiring it all to a transcription channel

mod classifier;
mod detector;
mod features;
mod state;
mod worker;

pub use classifier::SmartTurnClassifier;
pub use detector::{DetectedTurn, EndOfTurnDetector};
pub use features::LogMelExtractor;
pub use state::{
    ContextBuffer, DetectorConfig, FinalizeReason, FrameDecision, TurnState, TurnTracker,
    VoiceWindow,
};
pub use worker::{ClassifierWorker, PendingPrediction, PredictionPoll};
