//! ffplay-backed media player

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use voice_turn_config::MediaConfig;
use voice_turn_core::MediaPlayer;

use crate::PipelineError;

/// External player invocation; it must read the stream from stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_settings(config: &MediaConfig) -> Self {
        Self::new(config.player_program.clone(), config.player_args.clone())
    }

    fn spawn(&self) -> Result<Child, PipelineError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Media(format!("failed to start {}: {}", self.program, e)))
    }
}

/// Play an in-memory clip and wait for the player to exit
pub async fn play_bytes(command: &PlayerCommand, audio: &[u8]) -> Result<(), PipelineError> {
    let mut child = command.spawn()?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PipelineError::Media("player stdin unavailable".to_string()))?;

    if let Err(e) = stdin.write_all(audio).await {
        tracing::debug!(error = %e, "Player closed stdin early");
    }
    drop(stdin);

    let status = child.wait().await?;
    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::Media(format!(
            "{} exited with {}",
            command.program, status
        )))
    }
}

struct Playback {
    source: String,
    kill: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Streaming media player with preemptive stop
pub struct FfplayPlayer {
    command: PlayerCommand,
    http: reqwest::Client,
    chunk_bytes: usize,
    stop_timeout: Duration,
    /// Serializes start/stop
    control: Mutex<Option<Playback>>,
    playing: Arc<AtomicBool>,
}

impl FfplayPlayer {
    pub fn new(command: PlayerCommand, chunk_bytes: usize, stop_timeout: Duration) -> Self {
        Self {
            command,
            http: reqwest::Client::new(),
            chunk_bytes: chunk_bytes.max(1),
            stop_timeout,
            control: Mutex::new(None),
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_settings(config: &MediaConfig) -> Self {
        Self::new(
            PlayerCommand::from_settings(config),
            config.download_chunk_bytes,
            Duration::from_millis(config.stop_timeout_ms),
        )
    }

    async fn halt(&self, playback: Playback) {
        let _ = playback.kill.send(());
        if let Err(e) = playback.task.await {
            tracing::warn!(error = %e, "Playback task failed");
        }
        tracing::info!(source = %playback.source, "Playback stopped");
    }
}

#[async_trait]
impl MediaPlayer for FfplayPlayer {
    async fn play(&self, source: &str) -> voice_turn_core::Result<()> {
        let mut current = self.control.lock().await;
        if let Some(previous) = current.take() {
            self.halt(previous).await;
        }

        let remote = is_remote(source);
        if !remote && !Path::new(source).exists() {
            return Err(PipelineError::Media(format!("media not found: {}", source)).into());
        }

        let mut child = self.command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Media("player stdin unavailable".to_string()))?;

        let feeder = tokio::spawn(feed(
            source.to_string(),
            stdin,
            self.http.clone(),
            self.chunk_bytes,
        ));

        let (kill, kill_rx) = oneshot::channel();
        self.playing.store(true, Ordering::SeqCst);
        let task = tokio::spawn(supervise(
            child,
            feeder,
            kill_rx,
            self.playing.clone(),
            self.stop_timeout,
        ));

        metrics::counter!("media_playbacks_total").increment(1);
        tracing::info!(source, remote, "Playback started");
        *current = Some(Playback {
            source: source.to_string(),
            kill,
            task,
        });
        Ok(())
    }

    async fn stop(&self) -> voice_turn_core::Result<()> {
        let mut current = self.control.lock().await;
        if let Some(playback) = current.take() {
            self.halt(playback).await;
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Wait for the player to finish or a stop request, whichever comes first
async fn supervise(
    mut child: Child,
    feeder: JoinHandle<()>,
    kill: oneshot::Receiver<()>,
    playing: Arc<AtomicBool>,
    stop_timeout: Duration,
) {
    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };

    match finished {
        Some(Ok(status)) => tracing::debug!(%status, "Player exited"),
        Some(Err(e)) => tracing::warn!(error = %e, "Waiting on player failed"),
        None => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Player already gone");
            }
            if tokio::time::timeout(stop_timeout, child.wait()).await.is_err() {
                tracing::warn!(
                    timeout_ms = stop_timeout.as_millis() as u64,
                    "Player did not exit after kill"
                );
            }
        }
    }

    feeder.abort();
    playing.store(false, Ordering::SeqCst);
}

async fn feed(source: String, mut stdin: ChildStdin, http: reqwest::Client, chunk_bytes: usize) {
    let result = if is_remote(&source) {
        feed_remote(&source, &mut stdin, &http, chunk_bytes).await
    } else {
        feed_file(&source, &mut stdin, chunk_bytes).await
    };

    match result {
        Ok(bytes) => tracing::debug!(source = %source, bytes, "Media stream delivered"),
        Err(PipelineError::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!(source = %source, "Player closed the stream")
        }
        Err(e) => tracing::warn!(source = %source, error = %e, "Media stream failed"),
    }
    let _ = stdin.shutdown().await;
}

async fn feed_remote(
    url: &str,
    stdin: &mut ChildStdin,
    http: &reqwest::Client,
    chunk_bytes: usize,
) -> Result<usize, PipelineError> {
    let response = http.get(url).send().await?.error_for_status()?;
    let mut stream = response.bytes_stream();
    let mut total = 0usize;
    while let Some(bytes) = stream.next().await {
        let bytes = bytes?;
        for piece in bytes.chunks(chunk_bytes) {
            stdin.write_all(piece).await?;
            total += piece.len();
        }
    }
    Ok(total)
}

async fn feed_file(
    path: &str,
    stdin: &mut ChildStdin,
    chunk_bytes: usize,
) -> Result<usize, PipelineError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; chunk_bytes];
    let mut total = 0usize;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n]).await?;
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;

    fn media_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; 200_000]).unwrap();
        file
    }

    fn player(program: &str, args: &[&str]) -> FfplayPlayer {
        FfplayPlayer::new(
            PlayerCommand::new(program, args.iter().map(|s| s.to_string()).collect()),
            64 * 1024,
            Duration::from_secs(2),
        )
    }

    async fn wait_idle(player: &FfplayPlayer, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while player.is_playing() {
            if Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    #[tokio::test]
    async fn test_local_file_plays_to_end() {
        let file = media_file();
        let player = player("cat", &[]);
        player.play(file.path().to_str().unwrap()).await.unwrap();
        assert!(wait_idle(&player, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_stop_preempts_playback() {
        let file = media_file();
        let player = player("sleep", &["30"]);
        player.play(file.path().to_str().unwrap()).await.unwrap();
        assert!(player.is_playing());

        let started = Instant::now();
        player.stop().await.unwrap();
        assert!(!player.is_playing());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_play_replaces_current() {
        let file = media_file();
        let player = player("sleep", &["30"]);
        let path = file.path().to_str().unwrap();
        player.play(path).await.unwrap();
        player.play(path).await.unwrap();
        assert!(player.is_playing());
        player.stop().await.unwrap();
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_missing_file_rejected() {
        let player = player("cat", &[]);
        assert!(player.play("/nonexistent/song.mp3").await.is_err());
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_play_bytes_waits_for_exit() {
        let command = PlayerCommand::new("cat", vec![]);
        play_bytes(&command, &[1, 2, 3]).await.unwrap();

        let failing = PlayerCommand::new("false", vec![]);
        assert!(play_bytes(&failing, &[1]).await.is_err());
    }
}
