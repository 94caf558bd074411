//! Action events
//!
//! Tools and workers never touch speech or media directly. They emit an
//! [`ActionEvent`] on an explicit channel, and a single action loop turns
//! each event into speech or playback.

use serde::{Deserialize, Serialize};

/// Discriminant of an [`ActionEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    PreAnswer,
    RegularAnswer,
    PlayAudioImmediate,
    PlayAudioWhenFinal,
    StopAudio,
}

/// Tagged outbound signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionEvent {
    /// Interim spoken message while work continues
    PreAnswer(String),
    /// Final spoken answer for the turn
    RegularAnswer(String),
    /// Start media now, ignoring queued speech
    PlayAudioImmediate(String),
    /// Start media once queued speech has drained
    PlayAudioWhenFinal(String),
    /// Preempt any active media playback
    StopAudio,
}

impl ActionEvent {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionEvent::PreAnswer(_) => ActionKind::PreAnswer,
            ActionEvent::RegularAnswer(_) => ActionKind::RegularAnswer,
            ActionEvent::PlayAudioImmediate(_) => ActionKind::PlayAudioImmediate,
            ActionEvent::PlayAudioWhenFinal(_) => ActionKind::PlayAudioWhenFinal,
            ActionEvent::StopAudio => ActionKind::StopAudio,
        }
    }

    /// Text or media source carried by the event
    pub fn payload(&self) -> Option<&str> {
        match self {
            ActionEvent::PreAnswer(s)
            | ActionEvent::RegularAnswer(s)
            | ActionEvent::PlayAudioImmediate(s)
            | ActionEvent::PlayAudioWhenFinal(s) => Some(s),
            ActionEvent::StopAudio => None,
        }
    }

    /// Whether the event is handled by the speech queue
    pub fn is_speech(&self) -> bool {
        matches!(
            self,
            ActionEvent::PreAnswer(_) | ActionEvent::RegularAnswer(_)
        )
    }
}
