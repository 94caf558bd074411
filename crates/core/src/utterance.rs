//! Finalized transcripts and classifier verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Finalized transcript of one user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// True when nothing intelligible was transcribed
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One turn-completion classifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndOfTurnPrediction {
    pub is_complete: bool,
    pub probability: f32,
}

impl EndOfTurnPrediction {
    /// Verdict used when no model is loaded
    pub const UNAVAILABLE: Self = Self {
        is_complete: false,
        probability: 0.0,
    };

    pub fn from_probability(probability: f32, threshold: f32) -> Self {
        Self {
            is_complete: probability > threshold,
            probability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_threshold_is_strict() {
        assert!(!EndOfTurnPrediction::from_probability(0.5, 0.5).is_complete);
        assert!(EndOfTurnPrediction::from_probability(0.51, 0.5).is_complete);
        assert!(!EndOfTurnPrediction::UNAVAILABLE.is_complete);
    }

    #[test]
    fn test_empty_utterance() {
        assert!(Utterance::new("  ").is_empty());
        assert!(!Utterance::new("hello").is_empty());
    }
}
