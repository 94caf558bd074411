//! LLM Backend implementations
//!
//! Two wire formats are supported:
//! - Ollama `/api/chat`, newline-delimited JSON chunks
//! - OpenAI-compatible `/chat/completions`, server-sent events
//!
//! Streaming backends forward each text delta on an `mpsc` channel as soon as
//! it is decoded. A closed receiver cancels the generation.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use voice_turn_config::{LlmProvider, ModelConfig};

use crate::prompt::{prepare_messages, Message};
use crate::stream::LineBuffer;
use crate::LlmError;

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Generated text, exactly as the model produced it
    pub text: String,
    /// Deltas received
    pub tokens: usize,
    /// Time to first token (ms)
    pub time_to_first_token_ms: u64,
    /// Total generation time (ms)
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

/// Finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// Collects deltas while a stream is being read
struct StreamProgress {
    start: Instant,
    first_token: Option<u64>,
    text: String,
    tokens: usize,
}

impl StreamProgress {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            first_token: None,
            text: String::new(),
            tokens: 0,
        }
    }

    /// Record a delta and forward it; false when the receiver is gone
    async fn forward(&mut self, delta: &str, tx: &mpsc::Sender<String>) -> bool {
        if delta.is_empty() {
            return true;
        }
        if self.first_token.is_none() {
            self.first_token = Some(self.start.elapsed().as_millis() as u64);
        }
        self.text.push_str(delta);
        self.tokens += 1;
        tx.send(delta.to_string()).await.is_ok()
    }

    fn finish(self, finish_reason: FinishReason) -> GenerationResult {
        let total_time_ms = self.start.elapsed().as_millis() as u64;
        GenerationResult {
            text: self.text,
            tokens: self.tokens,
            time_to_first_token_ms: self.first_token.unwrap_or(total_time_ms),
            total_time_ms,
            finish_reason,
        }
    }
}

/// LLM Backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a complete response
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Generate with streaming, sending each text delta on `tx`
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    /// Check if the server answers
    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}

/// Build the backend selected by `config.provider`
pub fn create_backend(config: &ModelConfig) -> Result<Arc<dyn LlmBackend>, LlmError> {
    let backend: Arc<dyn LlmBackend> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaBackend::new(config.clone())?),
        LlmProvider::OpenAi => Arc::new(OpenAIBackend::new(config.clone())?),
    };
    tracing::info!(
        provider = ?config.provider,
        model = %config.model,
        endpoint = %config.endpoint,
        "LLM backend ready"
    );
    Ok(backend)
}

fn build_client(config: &ModelConfig) -> Result<Client, LlmError> {
    if config.endpoint.trim().is_empty() {
        return Err(LlmError::Configuration("endpoint is empty".to_string()));
    }
    Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| LlmError::Network(e.to_string()))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)))
}

/// Ollama backend
pub struct OllamaBackend {
    config: ModelConfig,
    client: Client,
}

impl OllamaBackend {
    pub fn new(config: ModelConfig) -> Result<Self, LlmError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn request(&self, messages: &[Message], stream: bool) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.config.model.clone(),
            messages: prepare_messages(messages, self.config.no_think)
                .iter()
                .map(OllamaMessage::from)
                .collect(),
            stream,
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature),
                num_predict: Some(self.config.max_tokens as i32),
            }),
            think: self.config.no_think.then_some(false),
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.request(messages, false);

        let response = self.client.post(self.api_url("/chat")).json(&request).send().await?;
        let response: OllamaChatResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: response.message.content,
            tokens: response.eval_count.unwrap_or(0),
            time_to_first_token_ms: total_time_ms,
            total_time_ms,
            finish_reason: match response.done_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let mut progress = StreamProgress::new();
        let request = self.request(messages, true);

        let response = self.client.post(self.api_url("/chat")).json(&request).send().await?;
        let mut stream = ensure_success(response).await?.bytes_stream();

        let mut lines = LineBuffer::new();
        let mut finish_reason = FinishReason::Stop;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                let Ok(chunk) = serde_json::from_str::<OllamaStreamChunk>(&line) else {
                    tracing::debug!(line = %line, "Skipping undecodable stream line");
                    continue;
                };
                if let Some(error) = chunk.error {
                    return Err(LlmError::Api(error));
                }
                if let Some(message) = chunk.message {
                    if !progress.forward(&message.content, &tx).await {
                        return Ok(progress.finish(FinishReason::Cancelled));
                    }
                }
                if chunk.done {
                    if chunk.done_reason.as_deref() == Some("length") {
                        finish_reason = FinishReason::Length;
                    }
                    break 'read;
                }
            }
        }

        Ok(progress.finish(finish_reason))
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    /// Disable extended thinking for models like qwen3/deepseek-r1
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OpenAI-compatible backend
///
/// Works with OpenAI itself and with local servers exposing the same API
/// (vLLM, llama.cpp server, Ollama's `/v1`).
pub struct OpenAIBackend {
    config: ModelConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: ModelConfig) -> Result<Self, LlmError> {
        let remote = !(config.endpoint.contains("localhost") || config.endpoint.contains("127.0.0.1"));
        if remote && config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn request_builder(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    fn request(&self, messages: &[Message], stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: prepare_messages(messages, self.config.no_think)
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stream: Some(stream),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.request(messages, false);

        let response = self.request_builder(&self.chat_url()).json(&request).send().await?;
        let response: OpenAIChatResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: choice.message.content,
            tokens: response.usage.map(|u| u.completion_tokens).unwrap_or(0),
            time_to_first_token_ms: total_time_ms,
            total_time_ms,
            finish_reason: match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let mut progress = StreamProgress::new();
        let request = self.request(messages, true);

        let response = self.request_builder(&self.chat_url()).json(&request).send().await?;
        let mut stream = ensure_success(response).await?.bytes_stream();

        let mut lines = LineBuffer::new();
        let mut finish_reason = FinishReason::Stop;

        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    break 'read;
                }
                let Ok(chunk) = serde_json::from_str::<OpenAIStreamChunk>(data) else {
                    tracing::debug!(line = %line, "Skipping undecodable SSE event");
                    continue;
                };
                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };
                if let Some(content) = choice.delta.and_then(|d| d.content) {
                    if !progress.forward(&content, &tx).await {
                        return Ok(progress.finish(FinishReason::Cancelled));
                    }
                }
                if choice.finish_reason.as_deref() == Some("length") {
                    finish_reason = FinishReason::Length;
                }
            }
        }

        Ok(progress.finish(finish_reason))
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        let builder = self.client.get(&url);
        let builder = match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        };
        builder
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: Option<OpenAIDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer one HTTP request with `parts` written separately, returning the request
    async fn serve_parts(listener: TcpListener, parts: Vec<Vec<u8>>) -> String {
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
        let total: usize = parts.iter().map(Vec::len).sum();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            total
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for part in parts {
            socket.write_all(&part).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        String::from_utf8_lossy(&request).into_owned()
    }

    fn config_for(provider: LlmProvider, endpoint: String) -> ModelConfig {
        ModelConfig {
            provider,
            endpoint,
            ..ModelConfig::with_model("test-model")
        }
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(delta) = rx.recv().await {
            out.push(delta);
        }
        out
    }

    #[tokio::test]
    async fn test_ollama_stream_with_split_utf8() {
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"1:2:\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"正在查询\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
        )
        .as_bytes()
        .to_vec();
        // Cut in the middle of the first CJK character
        let cut = body.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let parts = vec![body[..cut].to_vec(), body[cut..].to_vec()];

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_parts(listener, parts));

        let backend = OllamaBackend::new(config_for(LlmProvider::Ollama, endpoint)).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let collector = tokio::spawn(collect(rx));

        let result = backend
            .generate_stream(&[Message::user("查一下天气")], tx)
            .await
            .unwrap();
        assert_eq!(result.text, "1:2:正在查询");
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(collector.await.unwrap(), vec!["1:2:", "正在查询"]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.contains("\"think\":false"));
        assert!(request.contains("/no_think"));
    }

    #[tokio::test]
    async fn test_ollama_stream_error_line() {
        let parts = vec![b"{\"error\":\"model not found\"}\n".to_vec()];
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_parts(listener, parts));

        let backend = OllamaBackend::new(config_for(LlmProvider::Ollama, endpoint)).unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let err = backend.generate_stream(&[Message::user("hi")], tx).await.unwrap_err();
        assert!(matches!(err, LlmError::Api(msg) if msg.contains("model not found")));
    }

    #[tokio::test]
    async fn test_openai_sse_stream() {
        let parts = vec![
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_vec(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"0:\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"Hi there\"}".to_vec(),
            b"}]}\n\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\ndata: [DONE]\n\n".to_vec(),
        ];
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/v1", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_parts(listener, parts));

        let backend = OpenAIBackend::new(config_for(LlmProvider::OpenAi, endpoint)).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let collector = tokio::spawn(collect(rx));

        let result = backend.generate_stream(&[Message::user("hello")], tx).await.unwrap();
        assert_eq!(result.text, "0:Hi there");
        assert_eq!(result.tokens, 2);
        assert_eq!(result.finish_reason, FinishReason::Length);
        assert_eq!(collector.await.unwrap(), vec!["0:", "Hi there"]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
    }

    #[tokio::test]
    async fn test_stream_cancelled_when_receiver_dropped() {
        let parts = vec![
            b"{\"message\":{\"role\":\"assistant\",\"content\":\"a\"},\"done\":false}\n".to_vec(),
            b"{\"message\":{\"role\":\"assistant\",\"content\":\"b\"},\"done\":true}\n".to_vec(),
        ];
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_parts(listener, parts));

        let backend = OllamaBackend::new(config_for(LlmProvider::Ollama, endpoint)).unwrap();
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let result = backend.generate_stream(&[Message::user("hi")], tx).await.unwrap();
        assert_eq!(result.finish_reason, FinishReason::Cancelled);
    }

    #[test]
    fn test_openai_requires_key_for_remote() {
        let remote = config_for(LlmProvider::OpenAi, "https://api.openai.com/v1".to_string());
        assert!(OpenAIBackend::new(remote.clone()).is_err());

        let keyed = ModelConfig {
            api_key: Some("sk-test".to_string()),
            ..remote
        };
        assert!(OpenAIBackend::new(keyed).is_ok());

        let local = config_for(LlmProvider::OpenAi, "http://localhost:8000/v1".to_string());
        assert!(OpenAIBackend::new(local).is_ok());
    }

    #[test]
    fn test_create_backend_by_provider() {
        let config = config_for(LlmProvider::Ollama, "http://localhost:11434".to_string());
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.model_name(), "test-model");

        let empty = config_for(LlmProvider::Ollama, " ".to_string());
        assert!(matches!(create_backend(&empty), Err(LlmError::Configuration(_))));
    }

    #[test]
    fn test_ollama_request_serialization() {
        let backend = OllamaBackend::new(config_for(
            LlmProvider::Ollama,
            "http://localhost:11434".to_string(),
        ))
        .unwrap();
        let request = backend.request(&[Message::system("sys"), Message::user("hi")], true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi /no_think");
        assert_eq!(json["think"], false);
        assert_eq!(json["stream"], true);
    }
}
