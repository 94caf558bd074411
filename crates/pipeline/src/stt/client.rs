//! Websocket transcription client with keepalive
//!
//! One supervisor task owns the connection. It connects with a timeout,
//! forwards queued audio and control text, pings on an interval and, when the
//! link drops, waits out the reconnect delay and starts over. A reader task
//! per connection folds inbound messages into the shared transcript and bumps
//! a watch counter on every final result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voice_turn_config::TranscriptionConfig;

use super::protocol::{Handshake, TranscriptAssembler, TranscriptMessage, END_OF_SPEECH};
use super::TranscriptionChannel;
use crate::PipelineError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTGOING_CAPACITY: usize = 256;
/// Missed ping intervals before the link is considered half-open
const STALE_PING_INTERVALS: u32 = 3;

#[derive(Debug)]
enum Outgoing {
    Text(String),
    Audio(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

struct Shared {
    assembler: Mutex<TranscriptAssembler>,
    finals: watch::Sender<u64>,
    connected: AtomicBool,
    /// Handshake of the utterance in progress, replayed after a reconnect
    active_handshake: Mutex<Option<String>>,
    last_seen: Mutex<Instant>,
}

/// FunASR-style websocket transcription client
pub struct WsTranscriptionClient {
    config: TranscriptionConfig,
    outgoing: mpsc::Sender<Outgoing>,
    shared: Arc<Shared>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTranscriptionClient {
    /// Start the keepalive task; connection happens in the background
    pub fn spawn(config: TranscriptionConfig) -> Self {
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let (finals, _) = watch::channel(0u64);
        let (shutdown, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            assembler: Mutex::new(TranscriptAssembler::new()),
            finals,
            connected: AtomicBool::new(false),
            active_handshake: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
        });

        let task = tokio::spawn(keepalive(
            config.clone(),
            shared.clone(),
            outgoing_rx,
            shutdown.subscribe(),
        ));

        Self {
            config,
            outgoing,
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Wait until connected or the timeout elapses
    pub async fn wait_connected(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while !self.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Close the connection and join the keepalive task
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(());
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for WsTranscriptionClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

#[async_trait]
impl TranscriptionChannel for WsTranscriptionClient {
    async fn start_utterance(&self) -> Result<(), PipelineError> {
        self.shared.assembler.lock().reset();
        let handshake = Handshake::from_settings(&self.config).to_json();
        *self.shared.active_handshake.lock() = Some(handshake.clone());

        if !self.is_connected() {
            return Err(PipelineError::Connection(format!(
                "not connected to {}",
                self.config.url
            )));
        }
        self.outgoing
            .send(Outgoing::Text(handshake))
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }

    fn send_audio(&self, pcm: Vec<u8>) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outgoing.try_send(Outgoing::Audio(pcm)).is_ok()
    }

    fn reset_transcript(&self) {
        self.shared.assembler.lock().reset();
    }

    fn current_transcript(&self) -> String {
        self.shared.assembler.lock().current()
    }

    async fn finish_utterance(&self, wait: Duration) -> String {
        let mut finals = self.shared.finals.subscribe();
        let _ = finals.borrow_and_update();
        self.shared.active_handshake.lock().take();

        let flushed = self.is_connected()
            && self
                .outgoing
                .send(Outgoing::Text(END_OF_SPEECH.to_string()))
                .await
                .is_ok();

        if !flushed {
            tracing::warn!("Transcription channel down, using partial transcript");
            return self.current_transcript();
        }

        match timeout(wait, finals.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::warn!("Transcript watch closed"),
            Err(_) => {
                metrics::counter!("transcription_final_timeouts_total").increment(1);
                tracing::warn!(
                    timeout_ms = wait.as_millis() as u64,
                    "No final transcript before timeout, using partial transcript"
                );
            }
        }
        self.current_transcript()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

async fn keepalive(
    config: TranscriptionConfig,
    shared: Arc<Shared>,
    mut outgoing: mpsc::Receiver<Outgoing>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);
    let ping_interval = Duration::from_millis(config.ping_interval_ms.max(1));
    let mut attempts = 0u64;

    loop {
        attempts += 1;
        match timeout(connect_timeout, connect_async(config.url.as_str())).await {
            Ok(Ok((stream, _))) => {
                tracing::info!(url = %config.url, attempts, "Transcription channel connected");
                attempts = 0;
                let end = run_session(stream, &shared, &mut outgoing, &mut shutdown, ping_interval)
                    .await;
                shared.connected.store(false, Ordering::SeqCst);
                if end == SessionEnd::Shutdown {
                    break;
                }
                metrics::counter!("transcription_reconnects_total").increment(1);
                tracing::warn!(url = %config.url, "Transcription channel lost, reconnecting");
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %config.url, error = %e, "Transcription connect failed");
            }
            Err(_) => {
                tracing::warn!(
                    url = %config.url,
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "Transcription connect timed out"
                );
            }
        }

        tokio::select! {
            _ = sleep(reconnect_delay) => {}
            _ = shutdown.recv() => break,
        }

        // Audio captured while offline is not replayed
        let mut dropped = 0usize;
        while outgoing.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped queued messages while disconnected");
        }
    }

    tracing::info!(url = %config.url, "Transcription channel closed");
}

async fn run_session(
    stream: WsStream,
    shared: &Arc<Shared>,
    outgoing: &mut mpsc::Receiver<Outgoing>,
    shutdown: &mut broadcast::Receiver<()>,
    ping_interval: Duration,
) -> SessionEnd {
    let (mut write, read) = stream.split();

    let replay = shared.active_handshake.lock().clone();
    if let Some(handshake) = replay {
        if write.send(Message::Text(handshake)).await.is_err() {
            return SessionEnd::Lost;
        }
    }

    *shared.last_seen.lock() = Instant::now();
    shared.connected.store(true, Ordering::SeqCst);

    let mut reader = tokio::spawn(read_loop(read, shared.clone()));
    let mut ping = interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    let end = loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else {
                    break SessionEnd::Shutdown;
                };
                if send(&mut write, msg).await.is_err() {
                    break SessionEnd::Lost;
                }
            }
            _ = ping.tick() => {
                if shared.last_seen.lock().elapsed() > ping_interval * STALE_PING_INTERVALS {
                    tracing::warn!("Transcription channel unresponsive");
                    break SessionEnd::Lost;
                }
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    break SessionEnd::Lost;
                }
            }
            _ = &mut reader => break SessionEnd::Lost,
            _ = shutdown.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break SessionEnd::Shutdown;
            }
        }
    };

    shared.connected.store(false, Ordering::SeqCst);
    reader.abort();
    end
}

async fn send(
    write: &mut SplitSink<WsStream, Message>,
    msg: Outgoing,
) -> Result<(), PipelineError> {
    let frame = match msg {
        Outgoing::Text(text) => Message::Text(text),
        Outgoing::Audio(pcm) => Message::Binary(pcm),
    };
    write.send(frame).await.map_err(PipelineError::from)
}

async fn read_loop(mut read: SplitStream<WsStream>, shared: Arc<Shared>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                *shared.last_seen.lock() = Instant::now();
                match TranscriptMessage::parse(&text) {
                    Ok(message) => {
                        let is_final = shared.assembler.lock().apply(&message);
                        tracing::debug!(
                            mode = message.mode.as_deref().unwrap_or(""),
                            text = message.text.as_deref().unwrap_or(""),
                            is_final,
                            "Transcript message"
                        );
                        if is_final {
                            shared.finals.send_modify(|n| *n += 1);
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Unparseable transcript message"),
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("Transcription server closed the connection");
                break;
            }
            Ok(_) => {
                *shared.last_seen.lock() = Instant::now();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transcription read failed");
                break;
            }
        }
    }
}
