//! Centralized constants for the voice turn-taking engine
//!
//! Single source of truth for default values. Settings defaults and
//! component `Default` impls read from here instead of repeating literals.

/// Service endpoints (defaults for local development)
pub mod endpoints {
    /// Ollama LLM endpoint
    pub const OLLAMA_DEFAULT: &str = "http://localhost:11434";

    /// Streaming transcription websocket
    pub const TRANSCRIPTION_DEFAULT: &str = "ws://127.0.0.1:10095";

    /// Speech synthesis HTTP endpoint
    pub const TTS_DEFAULT: &str = "http://127.0.0.1:8092/paddlespeech/tts";
}

/// Audio capture format
pub mod audio {
    /// Capture and transcription sample rate (Hz)
    pub const SAMPLE_RATE: u32 = 16000;

    /// Samples per capture frame: 60ms at 16kHz
    pub const FRAME_SAMPLES: usize = 960;
}

/// End-of-turn detection
pub mod turn_detection {
    /// Ambient noise measurement at startup (seconds)
    pub const CALIBRATION_SECS: f32 = 1.0;

    /// RMS added on top of measured ambient noise
    pub const ENERGY_MARGIN: f32 = 300.0;

    /// Calibrated thresholds never drop below this RMS
    pub const MIN_ENERGY_THRESHOLD: f32 = 500.0;

    /// Threshold used when calibration is skipped
    pub const DEFAULT_ENERGY_THRESHOLD: f32 = 1000.0;

    /// Rolling voice/silence window length (frames)
    pub const VOICE_WINDOW_FRAMES: usize = 10;

    /// Audio kept for the classifier (seconds)
    pub const CONTEXT_SECS: f32 = 8.0;

    /// Hard silence timeout (ms)
    pub const MAX_SILENCE_MS: u64 = 1500;

    /// Silence needed before the classifier is consulted (ms)
    pub const MIN_SILENCE_FOR_MODEL_CHECK_MS: u64 = 300;

    /// Minimum spacing between classifier submissions (ms)
    pub const MODEL_CHECK_INTERVAL_MS: u64 = 300;

    /// Consecutive "complete" verdicts required to finalize
    pub const REQUIRED_COMPLETE_VERDICTS: u32 = 2;

    /// Wait for the final transcript after flushing (ms)
    pub const FINAL_TRANSCRIPT_TIMEOUT_MS: u64 = 2000;
}

/// Turn-completion classifier
pub mod classifier {
    /// Default ONNX model location
    pub const MODEL_PATH: &str = "models/smart-turn-v3.1.onnx";

    /// Probability above which a turn counts as complete
    pub const COMPLETE_THRESHOLD: f32 = 0.5;

    /// Input window (seconds)
    pub const WINDOW_SECS: usize = 8;

    /// Log-mel bins
    pub const N_MELS: usize = 80;

    /// FFT size (25ms at 16kHz)
    pub const N_FFT: usize = 400;

    /// Hop length (10ms at 16kHz)
    pub const HOP_LENGTH: usize = 160;
}

/// Transcription websocket protocol
pub mod transcription {
    pub const MODE: &str = "2pass";
    pub const CHUNK_SIZE: [u32; 3] = [5, 10, 5];
    pub const CHUNK_INTERVAL: u32 = 10;
    pub const ENCODER_CHUNK_LOOK_BACK: u32 = 4;
    pub const DECODER_CHUNK_LOOK_BACK: u32 = 0;
    pub const WAV_NAME: &str = "microphone";

    /// Keepalive ping period (ms)
    pub const PING_INTERVAL_MS: u64 = 1000;

    /// Delay before reconnecting after a failure (ms)
    pub const RECONNECT_DELAY_MS: u64 = 3000;

    /// Connection attempt timeout (ms)
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;
}

/// Language model defaults
pub mod llm {
    /// Fast model that routes each turn
    pub const DECISION_MODEL: &str = "qwen3:8b";

    /// Larger model that drives tool calls
    pub const WORKER_MODEL: &str = "qwen3:14b";

    pub const TEMPERATURE: f32 = 0.7;
    pub const MAX_TOKENS: usize = 512;
    pub const TIMEOUT_MS: u64 = 60_000;

    /// Assistant messages longer than this are shortened in requests
    pub const HISTORY_TRUNCATE_CHARS: usize = 200;
}

/// Tool-augmented worker
pub mod worker {
    /// Model/tool iterations per dispatch
    pub const MAX_TURNS: usize = 5;

    /// Messages kept in history, including the system prompt
    pub const HISTORY_WINDOW: usize = 20;

    /// Spoken when the worker runs out of turns
    pub const FALLBACK_ANSWER: &str = "Sorry, I couldn't finish that request. Please try again.";

    /// Per-tool execution timeout (seconds)
    pub const TOOL_TIMEOUT_SECS: u64 = 30;
}

/// Decision prefix parsing
pub mod decision {
    /// Parse attempts start once the buffer exceeds this many chars
    pub const PARSE_AFTER_CHARS: usize = 4;

    /// An unresolved buffer longer than this is treated as direct text
    pub const MAX_PREFIX_CHARS: usize = 12;
}

/// Speech output
pub mod speech {
    /// First segment minimum length (chars)
    pub const SEGMENT_MIN_CHARS: usize = 3;

    /// Growth of the minimum after each emitted segment
    pub const SEGMENT_GROWTH_CHARS: usize = 10;

    /// Clause and sentence separators. ASCII '.' is left out so decimals stay whole.
    pub const SEPARATORS: &[char] = &['，', '。', '！', '？', '；', '、', '…', ',', '!', '?', ';'];

    /// Synthesis request timeout (ms)
    pub const TTS_TIMEOUT_MS: u64 = 30_000;
}

/// Media playback
pub mod media {
    pub const PLAYER_PROGRAM: &str = "ffplay";
    pub const PLAYER_ARGS: &[&str] = &["-i", "pipe:0", "-autoexit", "-nodisp", "-loglevel", "quiet"];

    /// Bytes written to the player per chunk
    pub const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

    /// Grace period for the player to exit after a stop (ms)
    pub const STOP_TIMEOUT_MS: u64 = 2000;
}
