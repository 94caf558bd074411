//! Streaming transcription
//!
//! A persistent websocket to a FunASR-style 2pass server: audio streams up as
//! binary PCM16, interim and final transcripts come back as JSON.

mod client;
mod protocol;

pub use client::WsTranscriptionClient;
pub use protocol::{Handshake, TranscriptAssembler, TranscriptMessage, END_OF_SPEECH};

use async_trait::async_trait;
use std::time::Duration;

use crate::PipelineError;

/// Duplex channel to a transcription backend
#[async_trait]
pub trait TranscriptionChannel: Send + Sync {
    /// Reset the transcript and announce a new utterance
    async fn start_utterance(&self) -> Result<(), PipelineError>;

    /// Queue PCM16 audio without blocking; `false` when it was dropped
    fn send_audio(&self, pcm: Vec<u8>) -> bool;

    /// Forget any partial transcript
    fn reset_transcript(&self);

    /// Committed plus interim text received so far
    fn current_transcript(&self) -> String;

    /// Flush the utterance and wait up to `timeout` for the final transcript
    ///
    /// On timeout the held partial transcript is returned.
    async fn finish_utterance(&self, timeout: Duration) -> String;

    fn is_connected(&self) -> bool;
}
