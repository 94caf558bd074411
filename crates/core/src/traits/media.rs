//! Media playback trait

use crate::Result;
use async_trait::async_trait;

/// Long-form audio player
///
/// Control operations (`play`, `stop`) are serialized by implementations.
/// Playback itself runs in the background after `play` returns.
#[async_trait]
pub trait MediaPlayer: Send + Sync + 'static {
    /// Start playing a URL or local path, stopping any current playback
    async fn play(&self, source: &str) -> Result<()>;

    /// Stop playback immediately
    async fn stop(&self) -> Result<()>;

    /// Whether audio is currently playing
    fn is_playing(&self) -> bool;
}
