//! HTTP speech synthesizer
//!
//! Posts text to a PaddleSpeech-compatible `/paddlespeech/tts` endpoint,
//! decodes the base64 WAV in the response and plays it through the external
//! player, returning once playback has finished.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use voice_turn_config::TtsConfig;
use voice_turn_core::SpeechSynthesizer;

use super::normalize::normalize_for_speech;
use crate::media::{play_bytes, PlayerCommand};
use crate::PipelineError;

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    spk_id: u32,
    speed: f32,
    volume: f32,
    sample_rate: u32,
    save_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: serde_json::Value,
    result: Option<SynthesisResult>,
}

#[derive(Debug, Deserialize)]
struct SynthesisResult {
    audio: String,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    duration: Option<f32>,
}

/// PaddleSpeech HTTP backend
pub struct HttpSpeechBackend {
    client: reqwest::Client,
    config: TtsConfig,
    player: PlayerCommand,
}

impl HttpSpeechBackend {
    pub fn new(config: TtsConfig, player: PlayerCommand) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            player,
        })
    }

    /// Synthesize text into WAV bytes
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, PipelineError> {
        let request = SynthesisRequest {
            text,
            spk_id: self.config.speaker_id,
            speed: self.config.speed,
            volume: 1.0,
            sample_rate: 0,
            save_path: None,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Speech(format!("TTS HTTP {}: {}", status, body)));
        }

        let body: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Speech(format!("invalid TTS response: {}", e)))?;

        let result = match (body.success, body.result) {
            (true, Some(result)) => result,
            _ => {
                return Err(PipelineError::Speech(format!(
                    "TTS request rejected: {}",
                    body.message
                )))
            }
        };

        let audio = STANDARD
            .decode(result.audio.as_bytes())
            .map_err(|e| PipelineError::Speech(format!("invalid audio payload: {}", e)))?;

        tracing::debug!(
            bytes = audio.len(),
            sample_rate = result.sample_rate.unwrap_or(0),
            duration = result.duration.unwrap_or(0.0),
            "Speech synthesized"
        );
        Ok(audio)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechBackend {
    async fn speak(&self, text: &str) -> voice_turn_core::Result<()> {
        let text = normalize_for_speech(text);
        if text.trim().is_empty() {
            return Ok(());
        }
        let audio = self.synthesize(&text).await?;
        play_bytes(&self.player, &audio).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "paddlespeech-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with a fixed JSON body, returning the request
    async fn serve_json(listener: TcpListener, body: String) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&request).into_owned()
    }

    async fn backend_for(body: String) -> (HttpSpeechBackend, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/paddlespeech/tts", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_json(listener, body));
        let config = TtsConfig {
            endpoint,
            ..TtsConfig::default()
        };
        let backend =
            HttpSpeechBackend::new(config, PlayerCommand::new("cat", Vec::new())).unwrap();
        (backend, server)
    }

    #[tokio::test]
    async fn test_synthesize_decodes_audio() {
        let audio = STANDARD.encode(b"RIFF....WAVE");
        let body = serde_json::json!({
            "success": true,
            "code": 200,
            "message": {"description": "success"},
            "result": {"audio": audio, "sample_rate": 24000, "duration": 0.5}
        })
        .to_string();
        let (backend, server) = backend_for(body).await;

        let wav = backend.synthesize("你好").await.unwrap();
        assert_eq!(wav, b"RIFF....WAVE");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /paddlespeech/tts"));
        assert!(request.contains("\"spk_id\":0"));
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let body = serde_json::json!({
            "success": false,
            "code": 400,
            "message": {"description": "bad text"}
        })
        .to_string();
        let (backend, _server) = backend_for(body).await;
        let err = backend.synthesize("你好").await.unwrap_err();
        assert!(matches!(err, PipelineError::Speech(_)));
    }
}
