//! Speech output queue
//!
//! Producers enqueue text without blocking; a single consumer task speaks one
//! segment at a time in FIFO order. A pending counter covers both queued and
//! in-flight segments, so [`SpeechQueue::wait_until_drained`] returns only
//! once the last segment has finished playing.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use voice_turn_core::SpeechSynthesizer;

/// One queued unit of speech
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub text: String,
    pub emitted_at: Instant,
}

impl SpeechSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emitted_at: Instant::now(),
        }
    }
}

/// FIFO speech dispatcher with a drain barrier
pub struct SpeechQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<SpeechSegment>>>,
    pending: Arc<watch::Sender<usize>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechQueue {
    /// Start the consumer task
    pub fn spawn(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);

        let consumer = tokio::spawn(consume(rx, synthesizer, pending.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            pending,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Queue text for speech; blank text is ignored
    pub fn enqueue(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.trim().is_empty() {
            return false;
        }

        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            tracing::warn!("Speech queue is shut down, dropping segment");
            return false;
        };

        self.pending.send_modify(|n| *n += 1);
        if tx.send(SpeechSegment::new(text)).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return false;
        }
        true
    }

    /// Segments queued or playing
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Block until everything queued so far has been spoken
    pub async fn wait_until_drained(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting segments, speak what is queued and join the consumer
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                tracing::warn!(error = %e, "Speech consumer failed");
            }
        }
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<SpeechSegment>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    pending: Arc<watch::Sender<usize>>,
) {
    while let Some(segment) = rx.recv().await {
        let queued_ms = segment.emitted_at.elapsed().as_millis() as u64;
        let started = Instant::now();

        if let Err(e) = synthesizer.speak(&segment.text).await {
            metrics::counter!("speech_failures_total").increment(1);
            tracing::warn!(
                backend = synthesizer.name(),
                error = %e,
                text = %segment.text,
                "Speech synthesis failed"
            );
        } else {
            tracing::debug!(
                queued_ms,
                spoken_ms = started.elapsed().as_millis() as u64,
                chars = segment.text.chars().count(),
                "Segment spoken"
            );
        }

        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
    tracing::debug!("Speech consumer stopped");
}
