//! Wire messages for the 2pass transcription protocol
//!
//! A message is treated as final when its mode is `offline` or
//! `2pass-offline`, or when it carries `is_final: true`. Interim
//! `2pass-online` messages carry only the newly recognized fragment.

use serde::{Deserialize, Serialize};
use voice_turn_config::TranscriptionConfig;

/// Flush signal sent after the last audio frame
pub const END_OF_SPEECH: &str = r#"{"is_speaking":false}"#;

/// First message of every utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handshake {
    pub mode: String,
    pub chunk_size: [u32; 3],
    pub chunk_interval: u32,
    pub encoder_chunk_look_back: u32,
    pub decoder_chunk_look_back: u32,
    pub wav_name: String,
    pub is_speaking: bool,
    pub hotwords: String,
    pub itn: bool,
}

impl Handshake {
    pub fn from_settings(config: &TranscriptionConfig) -> Self {
        Self {
            mode: config.mode.clone(),
            chunk_size: config.chunk_size,
            chunk_interval: config.chunk_interval,
            encoder_chunk_look_back: config.encoder_chunk_look_back,
            decoder_chunk_look_back: config.decoder_chunk_look_back,
            wav_name: config.wav_name.clone(),
            is_speaking: true,
            hotwords: config.hotwords.clone(),
            itn: config.itn,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain struct of strings and integers
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Inbound transcript message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub wav_name: Option<String>,
}

impl TranscriptMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn is_final(&self) -> bool {
        matches!(self.mode.as_deref(), Some("offline") | Some("2pass-offline"))
            || self.is_final == Some(true)
    }

    pub fn is_online(&self) -> bool {
        !self.is_final() && self.mode.as_deref() == Some("2pass-online")
    }
}

/// Rebuilds the utterance transcript from interim and final fragments
#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    committed: String,
    pending: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one message; returns true when it finalized a segment
    pub fn apply(&mut self, message: &TranscriptMessage) -> bool {
        let text = message.text.as_deref().unwrap_or_default();
        if message.is_final() {
            self.committed.push_str(text);
            self.pending.clear();
            true
        } else {
            if message.is_online() {
                self.pending.push_str(text);
            }
            false
        }
    }

    pub fn committed(&self) -> &str {
        &self.committed
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Committed text followed by interim text
    pub fn current(&self) -> String {
        format!("{}{}", self.committed, self.pending)
    }

    pub fn reset(&mut self) {
        self.committed.clear();
        self.pending.clear();
    }
}
