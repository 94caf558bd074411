//! Conversation loop
//!
//! Listen, dispatch, repeat. The next utterance is captured only after the
//! previous answer has finished playing, so turns never overlap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use voice_turn_pipeline::{AudioSource, EndOfTurnDetector, SpeechQueue};

use crate::decision::Route;
use crate::dispatcher::Dispatcher;
use crate::AgentError;

/// Consecutive capture failures tolerated before giving up
const MAX_LISTEN_FAILURES: usize = 5;

const LISTEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Conversation lifecycle events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    Calibrated { threshold: f32 },
    Listening { turn: usize },
    Heard { turn: usize, text: String, reason: String },
    SkippedEmpty { turn: usize },
    Answered { turn: usize, tool: bool, elapsed_ms: u64 },
    Ended { turns: usize },
}

/// Counters for one conversation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub turns: usize,
    pub skipped: usize,
    pub listen_failures: usize,
}

/// Drives the detector and dispatcher until shutdown
pub struct Conversation {
    detector: EndOfTurnDetector,
    dispatcher: Dispatcher,
    speech: Arc<SpeechQueue>,
    event_tx: broadcast::Sender<ConversationEvent>,
    calibrate: bool,
}

impl Conversation {
    pub fn new(detector: EndOfTurnDetector, dispatcher: Dispatcher, speech: Arc<SpeechQueue>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            detector,
            dispatcher,
            speech,
            event_tx,
            calibrate: true,
        }
    }

    /// Skip ambient calibration at startup
    pub fn without_calibration(mut self) -> Self {
        self.calibrate = false;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.event_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Run until `shutdown` resolves or the audio source ends
    ///
    /// Shutdown is honored while listening; a turn already being answered
    /// plays out first.
    pub async fn run<F>(
        &mut self,
        source: &mut dyn AudioSource,
        shutdown: F,
    ) -> Result<ConversationStats, AgentError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stats = ConversationStats::default();
        let mut failures = 0usize;

        if self.calibrate {
            let threshold = tokio::select! {
                _ = &mut shutdown => return Ok(self.finish(stats)),
                threshold = self.detector.calibrate(source) => threshold,
            };
            self.emit(ConversationEvent::Calibrated { threshold });
        }

        loop {
            self.speech.wait_until_drained().await;
            let turn = stats.turns + stats.skipped + 1;
            self.emit(ConversationEvent::Listening { turn });
            tracing::debug!(turn, "Listening");

            let listened = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                result = self.detector.listen(source) => result,
            };

            let detected = match listened {
                Ok(Some(detected)) => {
                    failures = 0;
                    detected
                }
                Ok(None) => {
                    tracing::info!("Audio source closed");
                    break;
                }
                Err(e) => {
                    failures += 1;
                    stats.listen_failures += 1;
                    tracing::warn!(error = %e, failures, "Capture failed");
                    if failures >= MAX_LISTEN_FAILURES {
                        return Err(e.into());
                    }
                    tokio::time::sleep(LISTEN_RETRY_DELAY).await;
                    continue;
                }
            };

            let utterance = detected.utterance;
            if utterance.is_empty() {
                stats.skipped += 1;
                tracing::info!(turn, reason = detected.reason.as_str(), "Empty transcript, skipping");
                self.emit(ConversationEvent::SkippedEmpty { turn });
                continue;
            }

            tracing::info!(turn, text = %utterance.text, "User said");
            self.emit(ConversationEvent::Heard {
                turn,
                text: utterance.text.clone(),
                reason: detected.reason.as_str().to_string(),
            });

            let outcome = self.dispatcher.dispatch(&utterance).await;
            stats.turns += 1;
            self.emit(ConversationEvent::Answered {
                turn,
                tool: matches!(outcome.route, Route::Tool { .. }),
                elapsed_ms: outcome.elapsed_ms,
            });
        }

        Ok(self.finish(stats))
    }

    fn finish(&self, stats: ConversationStats) -> ConversationStats {
        tracing::info!(turns = stats.turns, skipped = stats.skipped, "Conversation ended");
        self.emit(ConversationEvent::Ended { turns: stats.turns });
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(ConversationEvent::Answered {
            turn: 2,
            tool: true,
            elapsed_ms: 40,
        })
        .unwrap();
        assert_eq!(json["type"], "answered");
        assert_eq!(json["tool"], true);
    }
}
