//! End-of-turn detector
//!
//! Owns the capture loop for one utterance: classifies frames with the energy
//! VAD, forwards speech to the transcription channel, consults the classifier
//! off-thread during pauses and finalizes on silence timeout or model
//! consensus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use voice_turn_core::{TurnClassifier, Utterance};

use super::state::{DetectorConfig, FinalizeReason, TurnTracker};
use super::worker::{ClassifierWorker, PendingPrediction, PredictionPoll};
use crate::capture::AudioSource;
use crate::stt::TranscriptionChannel;
use crate::vad::{AmbientCalibrator, EnergyVad, VadEngine};
use crate::PipelineError;

/// One finalized turn
#[derive(Debug, Clone)]
pub struct DetectedTurn {
    pub utterance: Utterance,
    pub reason: FinalizeReason,
    /// Frames forwarded to the transcription channel
    pub frames_sent: usize,
}

/// Hybrid rule + model end-of-turn detector
pub struct EndOfTurnDetector {
    config: DetectorConfig,
    vad: EnergyVad,
    classifier: ClassifierWorker,
    channel: Arc<dyn TranscriptionChannel>,
}

impl EndOfTurnDetector {
    pub fn new(
        config: DetectorConfig,
        classifier: Arc<dyn TurnClassifier>,
        channel: Arc<dyn TranscriptionChannel>,
    ) -> Result<Self, PipelineError> {
        let vad = EnergyVad::new(config.energy_threshold);
        Ok(Self {
            config,
            vad,
            classifier: ClassifierWorker::spawn(classifier)?,
            channel,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn energy_threshold(&self) -> f32 {
        self.vad.threshold()
    }

    /// Measure ambient noise and set the voice threshold
    pub async fn calibrate(&self, source: &mut dyn AudioSource) -> f32 {
        if self.config.calibration.is_zero() {
            return self.vad.threshold();
        }

        let mut calibrator =
            AmbientCalibrator::new(self.config.energy_margin, self.config.min_energy_threshold);
        let mut captured = Duration::ZERO;
        while captured < self.config.calibration {
            match source.next_frame().await {
                Some(frame) => {
                    captured += frame.duration;
                    calibrator.push(&frame);
                }
                None => break,
            }
        }

        if calibrator.frames() == 0 {
            tracing::warn!(
                threshold = self.vad.threshold(),
                "No audio during calibration, keeping default threshold"
            );
            return self.vad.threshold();
        }

        let threshold = calibrator.threshold();
        self.vad.set_threshold(threshold);
        tracing::info!(
            ambient = calibrator.ambient(),
            peak = calibrator.peak(),
            threshold,
            frames = calibrator.frames(),
            "Energy threshold calibrated"
        );
        threshold
    }

    /// Capture one utterance
    ///
    /// Returns `None` when the source ends before any speech.
    pub async fn listen(
        &self,
        source: &mut dyn AudioSource,
    ) -> Result<Option<DetectedTurn>, PipelineError> {
        source.discard_pending();
        if let Err(e) = self.channel.start_utterance().await {
            // Audio is dropped until the keepalive reconnects
            tracing::warn!(error = %e, "Transcription handshake failed");
        }

        let mut tracker = TurnTracker::new(self.config.clone());
        let mut pending: Option<PendingPrediction> = None;
        let mut frames_sent = 0usize;
        let mut frames_dropped = 0usize;
        let mut speech_started_at: Option<Instant> = None;

        let reason = loop {
            if let Some(reason) = poll_verdict(&mut pending, &mut tracker) {
                break reason;
            }

            let Some(frame) = source.next_frame().await else {
                if !tracker.state().has_spoken {
                    tracing::info!("Audio source ended before speech");
                    return Ok(None);
                }
                break tracker.close();
            };

            let is_voice = self.vad.is_voice(&frame);
            let decision = tracker.on_frame(&frame, is_voice, self.classifier.is_available());

            if decision.speech_started {
                self.channel.reset_transcript();
                speech_started_at = Some(frame.timestamp);
                tracing::debug!(rms = frame.rms, "Speech started");
            }

            if decision.forward {
                if self.channel.send_audio(frame.to_pcm16_bytes()) {
                    frames_sent += 1;
                } else {
                    frames_dropped += 1;
                }
            }

            if let Some(generation) = decision.submit {
                match self.classifier.submit(generation, tracker.context_snapshot()) {
                    Some(p) => pending = Some(p),
                    None => {
                        tracker.on_prediction(generation, None);
                    }
                }
            }

            if let Some(reason) = decision.finalize {
                break reason;
            }
        };

        let text = self
            .channel
            .finish_utterance(self.config.final_transcript_timeout)
            .await;

        metrics::counter!("turns_finalized_total", "reason" => reason.as_str()).increment(1);
        tracing::info!(
            reason = reason.as_str(),
            frames_sent,
            frames_dropped,
            speech_ms = speech_started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            chars = text.chars().count(),
            "Utterance finalized"
        );

        Ok(Some(DetectedTurn {
            utterance: Utterance::new(text),
            reason,
            frames_sent,
        }))
    }
}

fn poll_verdict(
    pending: &mut Option<PendingPrediction>,
    tracker: &mut TurnTracker,
) -> Option<FinalizeReason> {
    let p = pending.as_mut()?;
    match p.poll() {
        PredictionPoll::Pending => None,
        PredictionPoll::Ready(verdict) => {
            let generation = p.generation();
            *pending = None;
            tracker.on_prediction(generation, verdict)
        }
    }
}
