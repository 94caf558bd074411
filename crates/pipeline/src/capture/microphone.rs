//! Live microphone capture via cpal
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated capture
//! thread. The device callback pushes mono f32 samples into a lock-free ring
//! buffer; the same thread drains it, resamples to 16kHz and emits fixed-size
//! frames into a bounded channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;
use voice_turn_core::{AudioFrame, SampleRate};

use super::AudioSource;
use crate::PipelineError;

const TARGET_RATE: u32 = 16_000;
const RING_SECONDS: usize = 2;
const RESAMPLE_CHUNK: usize = 1024;

/// Microphone audio source
pub struct MicrophoneSource {
    rx: mpsc::Receiver<AudioFrame>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    /// Open the default input device (or the named one) and start capturing
    pub fn open(device_name: Option<&str>, frame_samples: usize) -> Result<Self, PipelineError> {
        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<u32, PipelineError>>(1);

        let thread_stop = stop.clone();
        let device_name = device_name.map(str::to_string);
        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                capture_thread(device_name, frame_samples, tx, thread_stop, ready_tx);
            })?;

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                tracing::info!(device_rate = rate, "Microphone capture started");
                Ok(Self {
                    rx,
                    stop,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PipelineError::Device("capture thread exited during startup".to_string()))
            }
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.rx.close();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }

    fn discard_pending(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, PipelineError> {
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| PipelineError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| PipelineError::Device(format!("input device not found: {}", wanted))),
        None => host
            .default_input_device()
            .ok_or_else(|| PipelineError::Device("no input device available".to_string())),
    }
}

/// Prefer a native 16kHz config, otherwise take the device default and resample
fn select_config(device: &cpal::Device) -> Result<cpal::SupportedStreamConfig, PipelineError> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| PipelineError::Device(e.to_string()))?;
    for range in ranges {
        let supported_format = matches!(
            range.sample_format(),
            cpal::SampleFormat::F32 | cpal::SampleFormat::I16
        );
        if supported_format
            && range.min_sample_rate().0 <= TARGET_RATE
            && range.max_sample_rate().0 >= TARGET_RATE
        {
            return Ok(range.with_sample_rate(cpal::SampleRate(TARGET_RATE)));
        }
    }
    device
        .default_input_config()
        .map_err(|e| PipelineError::Device(e.to_string()))
}

fn capture_thread(
    device_name: Option<String>,
    frame_samples: usize,
    tx: mpsc::Sender<AudioFrame>,
    stop: Arc<AtomicBool>,
    ready: std::sync::mpsc::SyncSender<Result<u32, PipelineError>>,
) {
    let host = cpal::default_host();
    let opened = select_device(&host, device_name.as_deref()).and_then(|device| {
        let config = select_config(&device)?;
        Ok((device, config))
    });
    let (device, config) = match opened {
        Ok(v) => v,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let device_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        rate = device_rate,
        channels,
        format = ?config.sample_format(),
        "Audio input config selected"
    );

    let ring = HeapRb::<f32>::new(device_rate as usize * RING_SECONDS);
    let (mut producer, mut consumer) = ring.split();
    let err_fn = |err| tracing::error!(error = %err, "Audio input stream error");
    let stream_config: cpal::StreamConfig = config.config();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| {
                for chunk in data.chunks(channels) {
                    let mono = chunk.iter().sum::<f32>() / channels as f32;
                    let _ = producer.try_push(mono);
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| {
                for chunk in data.chunks(channels) {
                    let mono = chunk.iter().map(|&s| s as f32 / 32768.0).sum::<f32>()
                        / channels as f32;
                    let _ = producer.try_push(mono);
                }
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready.send(Err(PipelineError::Device(format!(
                "unsupported sample format: {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(PipelineError::Device(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(PipelineError::Device(e.to_string())));
        return;
    }

    let mut resampler = if device_rate != TARGET_RATE {
        match FftFixedIn::<f32>::new(
            device_rate as usize,
            TARGET_RATE as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        ) {
            Ok(r) => Some(r),
            Err(e) => {
                let _ = ready.send(Err(PipelineError::Audio(e.to_string())));
                return;
            }
        }
    } else {
        None
    };

    let _ = ready.send(Ok(device_rate));

    let block = resampler
        .as_ref()
        .map(|r| r.input_frames_next())
        .unwrap_or(frame_samples);
    let mut input = vec![0.0f32; block];
    let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);
    let mut sequence = 0u64;

    while !stop.load(Ordering::SeqCst) {
        if consumer.occupied_len() < block {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }
        consumer.pop_slice(&mut input);

        match resampler.as_mut() {
            Some(r) => match r.process(&[input.as_slice()], None) {
                Ok(out) => pending.extend_from_slice(&out[0]),
                Err(e) => {
                    tracing::warn!(error = %e, "Resampling failed, dropping block");
                    continue;
                }
            },
            None => pending.extend_from_slice(&input),
        }

        while pending.len() >= frame_samples {
            let samples: Vec<f32> = pending.drain(..frame_samples).collect();
            let frame = AudioFrame::from_f32(&samples, SampleRate::Hz16000, sequence);
            sequence += 1;
            if tx.blocking_send(frame).is_err() {
                tracing::debug!("Frame receiver dropped, stopping capture");
                drop(stream);
                return;
            }
        }
    }

    drop(stream);
    tracing::info!(frames = sequence, "Microphone capture stopped");
}
