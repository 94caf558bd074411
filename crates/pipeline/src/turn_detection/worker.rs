//! Single-thread inference pool for the turn-completion classifier
//!
//! The capture loop must never wait on inference. Jobs go to one dedicated
//! OS thread; each submission returns a [`PendingPrediction`] that the loop
//! polls without blocking on every frame.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use voice_turn_core::{EndOfTurnPrediction, TurnClassifier};

use crate::PipelineError;

struct Job {
    audio: Vec<i16>,
    reply: oneshot::Sender<Result<EndOfTurnPrediction, String>>,
}

/// Result of polling a pending prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredictionPoll {
    Pending,
    /// `None` when inference failed
    Ready(Option<EndOfTurnPrediction>),
}

/// Handle to one submitted inference
pub struct PendingPrediction {
    generation: u64,
    rx: oneshot::Receiver<Result<EndOfTurnPrediction, String>>,
}

impl PendingPrediction {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Non-blocking check for the verdict
    pub fn poll(&mut self) -> PredictionPoll {
        match self.rx.try_recv() {
            Ok(Ok(prediction)) => PredictionPoll::Ready(Some(prediction)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Turn classifier inference failed");
                PredictionPoll::Ready(None)
            }
            Err(oneshot::error::TryRecvError::Empty) => PredictionPoll::Pending,
            Err(oneshot::error::TryRecvError::Closed) => PredictionPoll::Ready(None),
        }
    }
}

/// Dedicated inference thread
///
/// The thread is detached. Dropping the worker closes the job queue, and the
/// thread exits after any inference already running.
pub struct ClassifierWorker {
    classifier: Arc<dyn TurnClassifier>,
    jobs: std_mpsc::Sender<Job>,
}

impl ClassifierWorker {
    pub fn spawn(classifier: Arc<dyn TurnClassifier>) -> Result<Self, PipelineError> {
        let (tx, rx) = std_mpsc::channel::<Job>();
        let model = classifier.clone();

        let _detached = std::thread::Builder::new()
            .name("turn-classifier".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let started = Instant::now();
                    let result = model.predict(&job.audio).map_err(|e| e.to_string());
                    metrics::histogram!("turn_classifier_latency_seconds")
                        .record(started.elapsed().as_secs_f64());
                    if let Ok(p) = &result {
                        tracing::debug!(
                            complete = p.is_complete,
                            probability = p.probability,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Turn classifier verdict"
                        );
                    }
                    // Receiver may have moved on to a new utterance
                    let _ = job.reply.send(result);
                }
            })?;

        Ok(Self {
            classifier,
            jobs: tx,
        })
    }

    pub fn is_available(&self) -> bool {
        self.classifier.is_available()
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    /// Queue an inference; `None` if the worker thread is gone
    pub fn submit(&self, generation: u64, audio: Vec<i16>) -> Option<PendingPrediction> {
        let (reply, rx) = oneshot::channel();
        match self.jobs.send(Job { audio, reply }) {
            Ok(()) => Some(PendingPrediction { generation, rx }),
            Err(_) => {
                tracing::warn!("Turn classifier thread is not running");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voice_turn_core::Error;

    struct Fixed(Result<f32, ()>);

    impl TurnClassifier for Fixed {
        fn predict(&self, audio: &[i16]) -> voice_turn_core::Result<EndOfTurnPrediction> {
            assert!(!audio.is_empty());
            match self.0 {
                Ok(p) => Ok(EndOfTurnPrediction::from_probability(p, 0.5)),
                Err(()) => Err(Error::Model("boom".to_string())),
            }
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn wait(pending: &mut PendingPrediction) -> PredictionPoll {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match pending.poll() {
                PredictionPoll::Pending if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                other => return other,
            }
        }
    }

    #[test]
    fn test_worker_returns_verdict() {
        let worker = ClassifierWorker::spawn(Arc::new(Fixed(Ok(0.8)))).unwrap();
        assert!(worker.is_available());
        let mut pending = worker.submit(7, vec![1; 160]).unwrap();
        assert_eq!(pending.generation(), 7);
        match wait(&mut pending) {
            PredictionPoll::Ready(Some(p)) => assert!(p.is_complete),
            other => panic!("unexpected {:?}", other),
        }
    }

    struct Slow;

    impl TurnClassifier for Slow {
        fn predict(&self, _audio: &[i16]) -> voice_turn_core::Result<EndOfTurnPrediction> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(EndOfTurnPrediction::from_probability(0.9, 0.5))
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn test_drop_does_not_wait_for_inference() {
        let worker = ClassifierWorker::spawn(Arc::new(Slow)).unwrap();
        let mut pending = worker.submit(0, vec![1; 160]).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let dropped_at = Instant::now();
        drop(worker);
        assert!(dropped_at.elapsed() < Duration::from_millis(200));

        // The detached thread still delivers the in-flight verdict
        assert!(matches!(wait(&mut pending), PredictionPoll::Ready(Some(_))));
    }

    #[test]
    fn test_worker_error_is_none() {
        let worker = ClassifierWorker::spawn(Arc::new(Fixed(Err(())))).unwrap();
        let mut pending = worker.submit(0, vec![1; 160]).unwrap();
        assert_eq!(wait(&mut pending), PredictionPoll::Ready(None));
    }
}
