//! Speech synthesis trait

use crate::Result;
use async_trait::async_trait;

/// Text-to-speech backend
///
/// `speak` resolves once the text has been fully synthesized and played, so
/// a single consumer calling it in a loop never overlaps two segments.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize and play `text`
    async fn speak(&self, text: &str) -> Result<()>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
