//! Audio frame types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Normalization constant between PCM16 and f32 samples
pub const PCM16_NORMALIZE: f32 = 32768.0;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Speech recognition and turn classification
    #[default]
    Hz16000,
    /// 32kHz
    Hz32000,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Typical capture device rate
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz32000 => 32000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Map a raw rate onto a supported variant
    pub fn from_u32(rate: u32) -> Option<Self> {
        match rate {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            32000 => Some(SampleRate::Hz32000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Number of mono samples covering `duration`
    pub fn samples_for(&self, duration: Duration) -> usize {
        (self.as_u32() as f64 * duration.as_secs_f64()).round() as usize
    }

    /// Get samples per millisecond
    pub fn samples_per_ms(&self) -> usize {
        self.as_u32() as usize / 1000
    }
}

/// RMS energy of PCM16 samples, on the raw int16 scale
///
/// Silence on a typical microphone sits in the low hundreds, speech in the
/// thousands.
pub fn rms_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// One capture block of mono PCM16 audio
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw PCM16 samples
    pub samples: Arc<[i16]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
    /// Duration of this frame
    pub duration: Duration,
    /// RMS energy on the int16 scale
    pub rms: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("rms", &self.rms)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new frame from PCM16 samples
    pub fn new(samples: Vec<i16>, sample_rate: SampleRate, sequence: u64) -> Self {
        let duration =
            Duration::from_secs_f64(samples.len() as f64 / sample_rate.as_u32() as f64);
        let rms = rms_i16(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            timestamp: Instant::now(),
            duration,
            rms,
        }
    }

    /// Create a frame with an explicit capture timestamp
    pub fn with_timestamp(
        samples: Vec<i16>,
        sample_rate: SampleRate,
        sequence: u64,
        timestamp: Instant,
    ) -> Self {
        let mut frame = Self::new(samples, sample_rate, sequence);
        frame.timestamp = timestamp;
        frame
    }

    /// Convert normalized f32 samples, clamping to [-1.0, 1.0]
    pub fn from_f32(samples: &[f32], sample_rate: SampleRate, sequence: u64) -> Self {
        let pcm: Vec<i16> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * (PCM16_NORMALIZE - 1.0)) as i16)
            .collect();
        Self::new(pcm, sample_rate, sequence)
    }

    /// Parse little-endian PCM16 bytes
    pub fn from_pcm16_bytes(bytes: &[u8], sample_rate: SampleRate, sequence: u64) -> Self {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Self::new(samples, sample_rate, sequence)
    }

    /// Little-endian PCM16 bytes, the wire format of the transcription backend
    pub fn to_pcm16_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Normalized f32 samples in [-1.0, 1.0)
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples
            .iter()
            .map(|&s| s as f32 / PCM16_NORMALIZE)
            .collect()
    }

    /// Whether the frame's energy reaches `threshold`
    pub fn is_voice(&self, threshold: f32) -> bool {
        self.rms >= threshold
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz16000.samples_for(Duration::from_millis(60)), 960);
        assert_eq!(SampleRate::from_u32(48000), Some(SampleRate::Hz48000));
        assert_eq!(SampleRate::from_u32(12345), None);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        assert_eq!(rms_i16(&[]), 0.0);
        assert!((rms_i16(&[1000; 960]) - 1000.0).abs() < 0.01);
        assert!((rms_i16(&[-1000, 1000, -1000, 1000]) - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_frame_from_pcm16_bytes() {
        let bytes = [0x00, 0x00, 0xe8, 0x03, 0x18, 0xfc];
        let frame = AudioFrame::from_pcm16_bytes(&bytes, SampleRate::Hz16000, 7);
        assert_eq!(&*frame.samples, &[0, 1000, -1000]);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.to_pcm16_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_voice_threshold() {
        let loud = AudioFrame::new(vec![2000; 960], SampleRate::Hz16000, 0);
        let quiet = AudioFrame::new(vec![50; 960], SampleRate::Hz16000, 1);
        assert!(loud.is_voice(1000.0));
        assert!(!quiet.is_voice(1000.0));
        assert_eq!(loud.duration_ms(), 60);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        let frame = AudioFrame::from_f32(&[2.0, -2.0, 0.0], SampleRate::Hz16000, 0);
        assert_eq!(frame.samples[0], 32767);
        assert_eq!(frame.samples[1], -32767);
        assert_eq!(frame.samples[2], 0);
        let back = frame.to_f32();
        assert!(back[0] > 0.99);
    }
}
