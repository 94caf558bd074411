//! Turn-completion classifier trait

use crate::{EndOfTurnPrediction, Result};

/// Pre-trained end-of-turn model
///
/// Inference is synchronous and CPU bound. Callers run it on a dedicated
/// thread so audio capture never waits on it.
pub trait TurnClassifier: Send + Sync + 'static {
    /// Classify the trailing audio context (16kHz mono PCM16)
    ///
    /// Implementations use at most the last window they were trained on and
    /// pad shorter input.
    fn predict(&self, audio: &[i16]) -> Result<EndOfTurnPrediction>;

    /// Whether a model is actually loaded
    fn is_available(&self) -> bool {
        true
    }

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
