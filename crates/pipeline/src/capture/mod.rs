//! Audio sources
//!
//! The detector pulls fixed-size 16kHz mono frames from an [`AudioSource`].
//! Sources:
//! - `MicrophoneSource` (feature `microphone`): live device capture
//! - [`PcmReaderSource`]: raw little-endian PCM16 from any async reader,
//!   e.g. `arecord -f S16_LE -r 16000 -c 1 | voice-turn`
//! - [`ChannelSource`]: frames pushed through a channel (tests, bridges)

#[cfg(feature = "microphone")]
mod microphone;

#[cfg(feature = "microphone")]
pub use microphone::MicrophoneSource;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use voice_turn_core::{AudioFrame, SampleRate};

/// Pull-based audio frame source
#[async_trait]
pub trait AudioSource: Send {
    /// Next frame, `None` once the source is exhausted
    async fn next_frame(&mut self) -> Option<AudioFrame>;

    /// Drop frames that were buffered while nobody was listening
    fn discard_pending(&mut self) {}
}

/// Frames delivered over an mpsc channel
pub struct ChannelSource {
    rx: mpsc::Receiver<AudioFrame>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<AudioFrame>) -> Self {
        Self { rx }
    }

    /// Create a bounded sender/source pair
    pub fn channel(capacity: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "Discarded stale audio frames");
        }
    }
}

/// Raw PCM16 little-endian mono audio from a byte stream
///
/// Frames are stamped by stream position, not by read time, so input that
/// arrives faster than real time (files, buffered pipes) keeps its pauses.
pub struct PcmReaderSource<R> {
    reader: R,
    frame_samples: usize,
    sample_rate: SampleRate,
    sequence: u64,
    origin: Option<Instant>,
    samples_read: u64,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> PcmReaderSource<R> {
    pub fn new(reader: R, sample_rate: SampleRate, frame_samples: usize) -> Self {
        Self {
            reader,
            frame_samples,
            sample_rate,
            sequence: 0,
            origin: None,
            samples_read: 0,
            buf: vec![0u8; frame_samples * 2],
        }
    }
}

impl PcmReaderSource<tokio::io::Stdin> {
    /// Read PCM16 from standard input
    pub fn stdin(sample_rate: SampleRate, frame_samples: usize) -> Self {
        Self::new(tokio::io::stdin(), sample_rate, frame_samples)
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AudioSource for PcmReaderSource<R> {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.frame_samples == 0 {
            return None;
        }

        match self.reader.read_exact(&mut self.buf).await {
            Ok(_) => {
                let origin = *self.origin.get_or_insert_with(Instant::now);
                let samples = self
                    .buf
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                let offset = Duration::from_nanos(
                    self.samples_read * 1_000_000_000 / self.sample_rate.as_u32() as u64,
                );
                let frame = AudioFrame::with_timestamp(
                    samples,
                    self.sample_rate,
                    self.sequence,
                    origin + offset,
                );
                self.samples_read += self.frame_samples as u64;
                self.sequence += 1;
                Some(frame)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!(frames = self.sequence, "PCM input ended");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "PCM input read failed");
                None
            }
        }
    }
}
