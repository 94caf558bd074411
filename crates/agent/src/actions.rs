//! Action loop
//!
//! Tools and the worker emit [`ActionEvent`]s; this loop is their only
//! consumer and turns them into speech or playback.
//!
//! - `PreAnswer` / `RegularAnswer`: queued for speech
//! - `PlayAudioImmediate`: playback starts at once
//! - `PlayAudioWhenFinal`: held until the turn finishes, then started once
//!   the speech queue drains; a later request replaces an earlier one
//! - `StopAudio`: stops playback and cancels held or deferred starts,
//!   bypassing every barrier

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use voice_turn_core::{ActionEvent, ActionKind, MediaPlayer};
use voice_turn_pipeline::{split_text, SpeechQueue};

/// Spoken when a playback request fails
const PLAYBACK_FAILED: &str = "Sorry, I couldn't play that audio.";

fn kind_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::PreAnswer => "pre_answer",
        ActionKind::RegularAnswer => "regular_answer",
        ActionKind::PlayAudioImmediate => "play_audio_immediate",
        ActionKind::PlayAudioWhenFinal => "play_audio_when_final",
        ActionKind::StopAudio => "stop_audio",
    }
}

enum Control {
    /// Handle queued events, then ack
    Settle(oneshot::Sender<()>),
    /// Like `Settle`, then release the held when-final playback
    FinishTurn(oneshot::Sender<()>),
}

/// Cheap handle for waiting on the action loop
#[derive(Clone)]
pub struct ActionHandle {
    control: mpsc::Sender<Control>,
    speech: Arc<SpeechQueue>,
}

impl ActionHandle {
    async fn request(&self, make: fn(oneshot::Sender<()>) -> Control) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control.send(make(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Wait until every event sent before this call has been handled
    pub async fn settle(&self) {
        self.request(Control::Settle).await;
    }

    /// Settle, then schedule held when-final playback behind queued speech
    pub async fn finish_turn(&self) {
        self.request(Control::FinishTurn).await;
    }

    /// Settle pending events, then wait for queued speech to finish
    pub async fn wait_for_speech(&self) {
        self.settle().await;
        self.speech.wait_until_drained().await;
    }

    pub fn speech(&self) -> &Arc<SpeechQueue> {
        &self.speech
    }
}

struct ActionLoop {
    events: mpsc::UnboundedReceiver<ActionEvent>,
    control: mpsc::Receiver<Control>,
    speech: Arc<SpeechQueue>,
    player: Arc<dyn MediaPlayer>,
    held: Option<String>,
    deferred: Vec<JoinHandle<()>>,
}

/// Start the action loop; it runs until every event sender is dropped
pub fn spawn_action_loop(
    events: mpsc::UnboundedReceiver<ActionEvent>,
    speech: Arc<SpeechQueue>,
    player: Arc<dyn MediaPlayer>,
) -> (ActionHandle, JoinHandle<()>) {
    let (control_tx, control_rx) = mpsc::channel(8);
    let action_loop = ActionLoop {
        events,
        control: control_rx,
        speech: speech.clone(),
        player,
        held: None,
        deferred: Vec::new(),
    };
    let task = tokio::spawn(action_loop.run());
    let handle = ActionHandle {
        control: control_tx,
        speech,
    };
    (handle, task)
}

impl ActionLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },

                Some(control) = self.control.recv() => {
                    while let Ok(event) = self.events.try_recv() {
                        self.handle(event).await;
                    }
                    let ack = match control {
                        Control::Settle(ack) => ack,
                        Control::FinishTurn(ack) => {
                            self.release_held();
                            ack
                        }
                    };
                    let _ = ack.send(());
                }
            }
        }

        for task in self.deferred.drain(..) {
            task.abort();
        }
        tracing::debug!("Action loop stopped");
    }

    async fn handle(&mut self, event: ActionEvent) {
        self.deferred.retain(|task| !task.is_finished());
        metrics::counter!("action_events_total", "kind" => kind_label(event.kind())).increment(1);
        tracing::debug!(kind = ?event.kind(), "Action event");

        match event {
            ActionEvent::PreAnswer(text) | ActionEvent::RegularAnswer(text) => {
                for segment in split_text(&text) {
                    self.speech.enqueue(segment);
                }
            }
            ActionEvent::PlayAudioImmediate(source) => {
                tracing::info!(source = %source, "Playing audio now");
                if let Err(e) = self.player.play(&source).await {
                    tracing::warn!(source = %source, error = %e, "Playback failed");
                    self.speech.enqueue(PLAYBACK_FAILED);
                }
            }
            ActionEvent::PlayAudioWhenFinal(source) => {
                if let Some(replaced) = self.held.replace(source) {
                    tracing::debug!(source = %replaced, "Replacing held playback");
                }
            }
            ActionEvent::StopAudio => {
                self.held = None;
                for task in self.deferred.drain(..) {
                    task.abort();
                }
                if let Err(e) = self.player.stop().await {
                    tracing::warn!(error = %e, "Stopping playback failed");
                }
                tracing::info!("Playback stopped");
            }
        }
    }
}

impl ActionLoop {
    fn release_held(&mut self) {
        let Some(source) = self.held.take() else {
            return;
        };
        let speech = self.speech.clone();
        let player = self.player.clone();
        self.deferred.push(tokio::spawn(async move {
            speech.wait_until_drained().await;
            tracing::info!(source = %source, "Speech drained, playing audio");
            if let Err(e) = player.play(&source).await {
                tracing::warn!(source = %source, error = %e, "Playback failed");
                speech.enqueue(PLAYBACK_FAILED);
            }
        }));
    }
}
