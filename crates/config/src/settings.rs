//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    audio, classifier, endpoints, llm, media, speech, transcription, turn_detection, worker,
};
use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Microphone capture
    #[serde(default)]
    pub audio: AudioConfig,

    /// End-of-turn detection
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Turn-completion model
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Streaming transcription backend
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Decision and worker models
    #[serde(default)]
    pub llm: LlmSettings,

    /// Tool-augmented worker
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Speech synthesis
    #[serde(default)]
    pub tts: TtsConfig,

    /// Long-form media playback
    #[serde(default)]
    pub media: MediaConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_audio()?;
        self.validate_detector()?;
        self.validate_classifier()?;
        self.validate_transcription()?;
        self.validate_llm()?;
        self.validate_worker()?;
        Ok(())
    }

    fn validate_audio(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate != audio::SAMPLE_RATE {
            return Err(ConfigError::invalid(
                "audio.sample_rate",
                format!(
                    "Transcription and turn models expect {}Hz, got {}",
                    audio::SAMPLE_RATE,
                    self.audio.sample_rate
                ),
            ));
        }
        if self.audio.frame_samples == 0 {
            return Err(ConfigError::invalid("audio.frame_samples", "Must be positive"));
        }
        Ok(())
    }

    fn validate_detector(&self) -> Result<(), ConfigError> {
        let d = &self.detector;

        if d.voice_window == 0 {
            return Err(ConfigError::invalid("detector.voice_window", "Must be positive"));
        }
        if d.max_silence_ms == 0 {
            return Err(ConfigError::invalid("detector.max_silence_ms", "Must be positive"));
        }
        if d.min_silence_for_model_check_ms >= d.max_silence_ms {
            return Err(ConfigError::invalid(
                "detector.min_silence_for_model_check_ms",
                format!(
                    "Must be below max_silence_ms ({}), got {}",
                    d.max_silence_ms, d.min_silence_for_model_check_ms
                ),
            ));
        }
        if d.required_complete_verdicts == 0 {
            return Err(ConfigError::invalid(
                "detector.required_complete_verdicts",
                "Must be at least 1",
            ));
        }
        if d.context_secs <= 0.0 {
            return Err(ConfigError::invalid("detector.context_secs", "Must be positive"));
        }
        if d.final_transcript_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "detector.final_transcript_timeout_ms",
                "Must be positive",
            ));
        }
        Ok(())
    }

    fn validate_classifier(&self) -> Result<(), ConfigError> {
        let t = self.classifier.threshold;
        if !(t > 0.0 && t < 1.0) {
            return Err(ConfigError::invalid(
                "classifier.threshold",
                format!("Must be between 0.0 and 1.0 (exclusive), got {}", t),
            ));
        }
        Ok(())
    }

    fn validate_transcription(&self) -> Result<(), ConfigError> {
        let t = &self.transcription;
        if !(t.url.starts_with("ws://") || t.url.starts_with("wss://")) {
            return Err(ConfigError::invalid(
                "transcription.url",
                format!("Expected a ws:// or wss:// URL, got '{}'", t.url),
            ));
        }
        if t.ping_interval_ms == 0 || t.reconnect_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "transcription.ping_interval_ms",
                "Keepalive intervals must be positive",
            ));
        }
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), ConfigError> {
        for (field, model) in [("llm.decision", &self.llm.decision), ("llm.worker", &self.llm.worker)] {
            if model.endpoint.trim().is_empty() {
                return Err(ConfigError::invalid(
                    &format!("{}.endpoint", field),
                    "Endpoint must not be empty",
                ));
            }
            if model.model.trim().is_empty() {
                return Err(ConfigError::invalid(
                    &format!("{}.model", field),
                    "Model name must not be empty",
                ));
            }
            if model.timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    &format!("{}.timeout_ms", field),
                    "Must be positive",
                ));
            }
        }
        Ok(())
    }

    fn validate_worker(&self) -> Result<(), ConfigError> {
        let w = &self.worker;
        if w.max_turns == 0 {
            return Err(ConfigError::invalid("worker.max_turns", "Must be at least 1"));
        }
        if w.history_window < 2 {
            return Err(ConfigError::invalid(
                "worker.history_window",
                "Must keep the system prompt and at least one message",
            ));
        }
        if w.agents.is_empty() {
            return Err(ConfigError::invalid("worker.agents", "At least one agent is required"));
        }
        let mut ids: Vec<u32> = w.agents.iter().map(|a| a.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != w.agents.len() {
            return Err(ConfigError::invalid("worker.agents", "Agent ids must be unique"));
        }
        Ok(())
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate delivered to the detector (Hz)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Samples per frame
    #[serde(default = "default_frame_samples")]
    pub frame_samples: usize,

    /// Input device name; the host default when unset
    #[serde(default)]
    pub input_device: Option<String>,
}

fn default_sample_rate() -> u32 {
    audio::SAMPLE_RATE
}

fn default_frame_samples() -> usize {
    audio::FRAME_SAMPLES
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_samples: default_frame_samples(),
            input_device: None,
        }
    }
}

/// End-of-turn detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Ambient calibration length; 0 skips calibration
    pub calibration_secs: f32,
    /// RMS margin over ambient noise
    pub energy_margin: f32,
    /// Lower bound for calibrated thresholds
    pub min_energy_threshold: f32,
    /// Threshold when calibration is skipped
    pub energy_threshold: f32,
    /// Rolling voice window (frames)
    pub voice_window: usize,
    /// Classifier context (seconds)
    pub context_secs: f32,
    pub max_silence_ms: u64,
    pub min_silence_for_model_check_ms: u64,
    pub model_check_interval_ms: u64,
    pub required_complete_verdicts: u32,
    pub final_transcript_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            calibration_secs: turn_detection::CALIBRATION_SECS,
            energy_margin: turn_detection::ENERGY_MARGIN,
            min_energy_threshold: turn_detection::MIN_ENERGY_THRESHOLD,
            energy_threshold: turn_detection::DEFAULT_ENERGY_THRESHOLD,
            voice_window: turn_detection::VOICE_WINDOW_FRAMES,
            context_secs: turn_detection::CONTEXT_SECS,
            max_silence_ms: turn_detection::MAX_SILENCE_MS,
            min_silence_for_model_check_ms: turn_detection::MIN_SILENCE_FOR_MODEL_CHECK_MS,
            model_check_interval_ms: turn_detection::MODEL_CHECK_INTERVAL_MS,
            required_complete_verdicts: turn_detection::REQUIRED_COMPLETE_VERDICTS,
            final_transcript_timeout_ms: turn_detection::FINAL_TRANSCRIPT_TIMEOUT_MS,
        }
    }
}

/// Turn-completion classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Load the model at startup; silence timeout only when false
    pub enabled: bool,
    pub model_path: String,
    pub threshold: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: classifier::MODEL_PATH.to_string(),
            threshold: classifier::COMPLETE_THRESHOLD,
        }
    }
}

/// Transcription backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub url: String,
    pub mode: String,
    pub chunk_size: [u32; 3],
    pub chunk_interval: u32,
    pub encoder_chunk_look_back: u32,
    pub decoder_chunk_look_back: u32,
    pub wav_name: String,
    pub hotwords: String,
    /// Inverse text normalization
    pub itn: bool,
    pub ping_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: endpoints::TRANSCRIPTION_DEFAULT.to_string(),
            mode: transcription::MODE.to_string(),
            chunk_size: transcription::CHUNK_SIZE,
            chunk_interval: transcription::CHUNK_INTERVAL,
            encoder_chunk_look_back: transcription::ENCODER_CHUNK_LOOK_BACK,
            decoder_chunk_look_back: transcription::DECODER_CHUNK_LOOK_BACK,
            wav_name: transcription::WAV_NAME.to_string(),
            hotwords: String::new(),
            itn: true,
            ping_interval_ms: transcription::PING_INTERVAL_MS,
            reconnect_delay_ms: transcription::RECONNECT_DELAY_MS,
            connect_timeout_ms: transcription::CONNECT_TIMEOUT_MS,
        }
    }
}

/// LLM provider wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama `/api/chat`, NDJSON stream
    #[default]
    Ollama,
    /// OpenAI-compatible `/chat/completions`, SSE stream
    OpenAi,
}

/// One model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    /// Ask reasoning models to skip their thinking phase
    #[serde(default = "default_true")]
    pub no_think: bool,
}

impl ModelConfig {
    pub fn with_model(model: &str) -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: default_llm_endpoint(),
            model: model.to_string(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_llm_timeout_ms(),
            no_think: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_llm_endpoint() -> String {
    endpoints::OLLAMA_DEFAULT.to_string()
}

fn default_temperature() -> f32 {
    llm::TEMPERATURE
}

fn default_max_tokens() -> usize {
    llm::MAX_TOKENS
}

fn default_llm_timeout_ms() -> u64 {
    llm::TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

/// Decision and worker model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Routes each turn and speaks the transition text
    #[serde(default = "default_decision_model")]
    pub decision: ModelConfig,
    /// Drives the tool loop
    #[serde(default = "default_worker_model")]
    pub worker: ModelConfig,
}

fn default_decision_model() -> ModelConfig {
    ModelConfig::with_model(llm::DECISION_MODEL)
}

fn default_worker_model() -> ModelConfig {
    ModelConfig::with_model(llm::WORKER_MODEL)
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            decision: default_decision_model(),
            worker: default_worker_model(),
        }
    }
}

/// A logical sub-agent the decision model can route to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tool names bound to this agent; empty binds every registered tool
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_turns: usize,
    pub history_window: usize,
    pub tool_timeout_secs: u64,
    pub fallback_answer: String,
    pub agents: Vec<AgentDefinition>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_turns: worker::MAX_TURNS,
            history_window: worker::HISTORY_WINDOW,
            tool_timeout_secs: worker::TOOL_TIMEOUT_SECS,
            fallback_answer: worker::FALLBACK_ANSWER.to_string(),
            agents: vec![
                AgentDefinition {
                    id: 1,
                    name: "assistant".to_string(),
                    description: "General assistant with access to every tool".to_string(),
                    tools: Vec::new(),
                },
                AgentDefinition {
                    id: 2,
                    name: "media".to_string(),
                    description: "Plays and stops songs, stories and other audio".to_string(),
                    tools: vec![
                        "play_audio".to_string(),
                        "stop_audio".to_string(),
                        "pre_reply".to_string(),
                    ],
                },
            ],
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub endpoint: String,
    pub speaker_id: u32,
    pub speed: f32,
    pub timeout_ms: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoints::TTS_DEFAULT.to_string(),
            speaker_id: 0,
            speed: 1.0,
            timeout_ms: speech::TTS_TIMEOUT_MS,
        }
    }
}

/// Media player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub player_program: String,
    pub player_args: Vec<String>,
    pub download_chunk_bytes: usize,
    pub stop_timeout_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            player_program: media::PLAYER_PROGRAM.to_string(),
            player_args: media::PLAYER_ARGS.iter().map(|s| s.to_string()).collect(),
            download_chunk_bytes: media::DOWNLOAD_CHUNK_BYTES,
            stop_timeout_ms: media::STOP_TIMEOUT_MS,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Expose Prometheus metrics
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Load settings from `config/` and the environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from an explicit config directory
///
/// Sources, lowest priority first: `{dir}/default.*`, `{dir}/{env}.*`,
/// then `VOICE_TURN__SECTION__KEY` environment variables.
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::from(dir.join("default")).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_TURN")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        transcription = %settings.transcription.url,
        decision_model = %settings.llm.decision.model,
        worker_model = %settings.llm.worker.model,
        "Settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.audio.frame_samples, 960);
        assert_eq!(settings.detector.voice_window, 10);
        assert_eq!(settings.detector.max_silence_ms, 1500);
        assert_eq!(settings.worker.max_turns, 5);
        assert_eq!(settings.llm.decision.model, "qwen3:8b");
        assert_eq!(settings.transcription.chunk_size, [5, 10, 5]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_detector_validation() {
        let mut settings = Settings::default();
        settings.detector.min_silence_for_model_check_ms = 1500;
        assert!(settings.validate().is_err());

        settings.detector.min_silence_for_model_check_ms = 300;
        settings.detector.voice_window = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_classifier_threshold_validation() {
        let mut settings = Settings::default();
        settings.classifier.threshold = 1.0;
        assert!(settings.validate().is_err());
        settings.classifier.threshold = 0.7;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_worker_validation() {
        let mut settings = Settings::default();
        settings.worker.history_window = 1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.worker.agents[1].id = settings.worker.agents[0].id;
        match settings.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "worker.agents"),
            other => panic!("expected invalid agents, got {:?}", other),
        }
    }

    #[test]
    fn test_transcription_url_validation() {
        let mut settings = Settings::default();
        settings.transcription.url = "http://localhost:10095".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
[detector]
max_silence_ms = 2000

[llm.worker]
model = "qwen3:32b"

[[worker.agents]]
id = 7
name = "weather"
tools = ["get_weather"]
"#
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), None).unwrap();
        assert_eq!(settings.detector.max_silence_ms, 2000);
        assert_eq!(settings.detector.voice_window, 10);
        assert_eq!(settings.llm.worker.model, "qwen3:32b");
        assert_eq!(settings.llm.decision.model, "qwen3:8b");
        assert_eq!(settings.worker.agents.len(), 1);
        assert_eq!(settings.worker.agents[0].tools, vec!["get_weather"]);
    }

    #[test]
    fn test_missing_config_dir_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("absent"), Some("production")).unwrap();
        assert_eq!(settings.worker.history_window, 20);
    }
}
