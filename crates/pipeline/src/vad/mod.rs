//! Voice Activity Detection
//!
//! Frame-level voice/silence classification by RMS energy against a
//! threshold calibrated from ambient noise at startup.

mod energy;

pub use energy::{AmbientCalibrator, EnergyVad};

use voice_turn_core::AudioFrame;

/// VAD engine trait for pluggable implementations
pub trait VadEngine: Send + Sync {
    /// Whether the frame contains voice
    fn is_voice(&self, frame: &AudioFrame) -> bool;

    /// Current decision threshold
    fn threshold(&self) -> f32;
}
