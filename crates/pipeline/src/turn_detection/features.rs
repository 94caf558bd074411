//! Whisper-style log-mel features for the turn-completion classifier
//!
//! Input is the last N seconds of 16kHz audio, zero-padded on the left to
//! exactly N seconds and normalized to zero mean / unit variance. Output is a
//! row-major `[n_mels, n_frames]` matrix with Whisper's dynamic-range
//! compression applied (`log10`, clamp to max - 8, `(x + 4) / 4`).

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

const LOG_FLOOR: f32 = 1e-10;
const NORMALIZE_EPS: f32 = 1e-7;

/// Log-mel spectrogram extractor
pub struct LogMelExtractor {
    n_fft: usize,
    hop_length: usize,
    n_mels: usize,
    window_samples: usize,
    hann_window: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl LogMelExtractor {
    pub fn new(
        sample_rate: usize,
        n_fft: usize,
        hop_length: usize,
        n_mels: usize,
        window_samples: usize,
    ) -> Self {
        // Periodic Hann, as torch.hann_window
        let hann_window = (0..n_fft)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n_fft as f32;
                0.5 * (1.0 - x.cos())
            })
            .collect();

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            n_fft,
            hop_length,
            n_mels,
            window_samples,
            hann_window,
            mel_filters: slaney_mel_filters(sample_rate, n_fft, n_mels),
            fft,
        }
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Output frames per window (the trailing STFT frame is dropped)
    pub fn n_frames(&self) -> usize {
        self.window_samples / self.hop_length
    }

    /// Features for the last window of `audio`, row-major `[n_mels, n_frames]`
    pub fn extract(&self, audio: &[f32]) -> Vec<f32> {
        let mut signal = fit_window(audio, self.window_samples);
        normalize(&mut signal);

        let padded = reflect_pad(&signal, self.n_fft / 2);
        let n_frames = self.n_frames();
        let n_bins = self.n_fft / 2 + 1;

        let mut frame = vec![0.0f32; self.n_fft];
        let mut spectrum = vec![Complex::new(0.0f32, 0.0f32); n_bins];
        let mut power = vec![0.0f32; n_bins];
        let mut log_mel = vec![0.0f32; self.n_mels * n_frames];

        for t in 0..n_frames {
            let start = t * self.hop_length;
            for (i, slot) in frame.iter_mut().enumerate() {
                *slot = padded.get(start + i).copied().unwrap_or(0.0) * self.hann_window[i];
            }

            if self.fft.process(&mut frame, &mut spectrum).is_ok() {
                for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                    *p = c.norm_sqr();
                }
            } else {
                power.iter_mut().for_each(|p| *p = 0.0);
            }

            for (m, filter) in self.mel_filters.iter().enumerate() {
                let energy: f32 = filter.iter().zip(power.iter()).map(|(w, p)| w * p).sum();
                log_mel[m * n_frames + t] = energy.max(LOG_FLOOR).log10();
            }
        }

        let max = log_mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for v in log_mel.iter_mut() {
            *v = (v.max(max - 8.0) + 4.0) / 4.0;
        }
        log_mel
    }
}

/// Keep the last `len` samples, zero-padding on the left when shorter
fn fit_window(audio: &[f32], len: usize) -> Vec<f32> {
    if audio.len() >= len {
        audio[audio.len() - len..].to_vec()
    } else {
        let mut out = vec![0.0f32; len - audio.len()];
        out.extend_from_slice(audio);
        out
    }
}

fn normalize(signal: &mut [f32]) {
    if signal.is_empty() {
        return;
    }
    let n = signal.len() as f32;
    let mean = signal.iter().sum::<f32>() / n;
    let var = signal.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
    let scale = (var + NORMALIZE_EPS).sqrt();
    for x in signal.iter_mut() {
        *x = (*x - mean) / scale;
    }
}

fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let len = signal.len();
    if len < 2 {
        let mut out = vec![0.0; pad];
        out.extend_from_slice(signal);
        out.extend(std::iter::repeat(0.0).take(pad));
        return out;
    }
    let mut out = Vec::with_capacity(len + 2 * pad);
    for i in (1..=pad).rev() {
        out.push(signal[i.min(len - 1)]);
    }
    out.extend_from_slice(signal);
    for i in 0..pad {
        out.push(signal[len.saturating_sub(2 + i)]);
    }
    out
}

fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Slaney-normalized triangular filters over `[0, sr/2]`
fn slaney_mel_filters(sample_rate: usize, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..n_bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_max = hz_to_mel(sample_rate as f32 / 2.0);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    lower.min(upper).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> LogMelExtractor {
        LogMelExtractor::new(16000, 400, 160, 80, 16000 * 8)
    }

    #[test]
    fn test_feature_shape() {
        let ex = extractor();
        assert_eq!(ex.n_frames(), 800);
        let features = ex.extract(&vec![0.1; 16000]);
        assert_eq!(features.len(), 80 * 800);
        assert!(features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_silence_is_flat() {
        let features = extractor().extract(&vec![0.0; 16000]);
        assert!(features.iter().all(|&v| (v - (-1.5)).abs() < 1e-6));
    }

    #[test]
    fn test_dynamic_range_clamped() {
        let audio: Vec<f32> = (0..16000 * 2)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let features = extractor().extract(&audio);
        let max = features.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = features.iter().copied().fold(f32::INFINITY, f32::min);
        assert!(max - min <= 2.0 + 1e-4);
    }

    #[test]
    fn test_left_padding() {
        let window = fit_window(&[1.0, 2.0], 4);
        assert_eq!(window, vec![0.0, 0.0, 1.0, 2.0]);
        let window = fit_window(&[1.0, 2.0, 3.0, 4.0, 5.0], 4);
        assert_eq!(window, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for hz in [0.0f32, 500.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.5);
        }
    }
}
