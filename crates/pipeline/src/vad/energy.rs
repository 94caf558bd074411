//! RMS energy VAD
//!
//! A frame is voice when its int16-scale RMS reaches the threshold. The
//! threshold is measured once at startup as ambient RMS plus a fixed margin,
//! floored so a silent room does not make every breath count as speech.

use parking_lot::Mutex;
use voice_turn_core::AudioFrame;

use super::VadEngine;

/// Energy-threshold VAD
pub struct EnergyVad {
    threshold: Mutex<f32>,
}

impl EnergyVad {
    /// Create with a fixed threshold
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: Mutex::new(threshold),
        }
    }

    /// Replace the threshold, typically with a calibration result
    pub fn set_threshold(&self, threshold: f32) {
        *self.threshold.lock() = threshold;
    }
}

impl VadEngine for EnergyVad {
    fn is_voice(&self, frame: &AudioFrame) -> bool {
        frame.is_voice(*self.threshold.lock())
    }

    fn threshold(&self) -> f32 {
        *self.threshold.lock()
    }
}

/// Accumulates ambient frames and derives a threshold
#[derive(Debug, Clone)]
pub struct AmbientCalibrator {
    margin: f32,
    floor: f32,
    sum: f64,
    frames: usize,
    peak: f32,
}

impl AmbientCalibrator {
    pub fn new(margin: f32, floor: f32) -> Self {
        Self {
            margin,
            floor,
            sum: 0.0,
            frames: 0,
            peak: 0.0,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        self.sum += frame.rms as f64;
        self.frames += 1;
        self.peak = self.peak.max(frame.rms);
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Mean ambient RMS, 0 when nothing was measured
    pub fn ambient(&self) -> f32 {
        if self.frames == 0 {
            0.0
        } else {
            (self.sum / self.frames as f64) as f32
        }
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// ambient + margin, never below the floor
    pub fn threshold(&self) -> f32 {
        (self.ambient() + self.margin).max(self.floor)
    }
}
