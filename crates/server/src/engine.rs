//! Engine assembly
//!
//! Builds every long-lived component from [`Settings`] and owns them for the
//! lifetime of one conversation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voice_turn_agent::{
    build_sessions, decision_prompt, spawn_action_loop, Conversation, ConversationEvent,
    ConversationStats, Dispatcher, Worker,
};
use voice_turn_config::Settings;
use voice_turn_core::SampleRate;
use voice_turn_llm::create_backend;
use voice_turn_pipeline::{
    AudioSource, DetectorConfig, EndOfTurnDetector, FfplayPlayer, HttpSpeechBackend,
    PlayerCommand, SmartTurnClassifier, SpeechQueue, WsTranscriptionClient,
};
use voice_turn_tools::{register_builtin_tools, ToolExecutor, ToolRegistry};

use crate::ServerError;

/// A fully wired turn-taking engine
pub struct Engine {
    conversation: Conversation,
    speech: Arc<SpeechQueue>,
    transcription: Arc<WsTranscriptionClient>,
    action_task: JoinHandle<()>,
    sample_rate: SampleRate,
    frame_samples: usize,
    input_device: Option<String>,
}

impl Engine {
    pub async fn build(settings: &Settings) -> Result<Self, ServerError> {
        settings.validate()?;

        let sample_rate = SampleRate::from_u32(settings.audio.sample_rate).ok_or_else(|| {
            ServerError::Config(format!(
                "unsupported sample rate {}",
                settings.audio.sample_rate
            ))
        })?;

        // Speech output and media playback
        let synthesizer = HttpSpeechBackend::new(
            settings.tts.clone(),
            PlayerCommand::from_settings(&settings.media),
        )?;
        let speech = Arc::new(SpeechQueue::spawn(Arc::new(synthesizer)));
        let player = Arc::new(FfplayPlayer::from_settings(&settings.media));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (actions, action_task) = spawn_action_loop(events_rx, speech.clone(), player);

        // Tools
        let mut registry = ToolRegistry::new().with_max_timeout(settings.worker.tool_timeout_secs);
        register_builtin_tools(&mut registry, events_tx.clone())?;
        let registry = Arc::new(registry);
        tracing::info!(tools = ?registry.tool_names(), "Registered tools");

        // Models
        let decision_llm = create_backend(&settings.llm.decision)?;
        let worker_llm = create_backend(&settings.llm.worker)?;
        for llm in [&decision_llm, &worker_llm] {
            if !llm.is_available().await {
                tracing::warn!(model = llm.model_name(), "LLM endpoint not reachable yet");
            }
        }

        let sessions = build_sessions(&settings.worker, &registry, worker_llm)?;
        let worker = Worker::new(
            &settings.worker,
            registry.clone() as Arc<dyn ToolExecutor>,
            events_tx,
            actions.clone(),
        );
        let prompt = decision_prompt(&registry.list_tools(), &settings.worker.agents);
        let mut dispatcher = Dispatcher::new(
            decision_llm,
            prompt,
            settings.worker.history_window,
            worker,
            actions,
        )
        .with_fallback_answer(settings.worker.fallback_answer.clone());
        for session in sessions {
            dispatcher = dispatcher.with_session(session);
        }

        // Listening side
        let transcription = Arc::new(WsTranscriptionClient::spawn(settings.transcription.clone()));
        let connect_timeout = Duration::from_millis(settings.transcription.connect_timeout_ms);
        if !transcription.wait_connected(connect_timeout).await {
            tracing::warn!(
                url = transcription.url(),
                "Transcription server not connected yet, will keep retrying"
            );
        }

        let classifier = Arc::new(SmartTurnClassifier::from_settings(&settings.classifier));
        let detector = EndOfTurnDetector::new(
            DetectorConfig::from_settings(&settings.detector, sample_rate),
            classifier,
            transcription.clone(),
        )?;

        let conversation = Conversation::new(detector, dispatcher, speech.clone());

        Ok(Self {
            conversation,
            speech,
            transcription,
            action_task,
            sample_rate,
            frame_samples: settings.audio.frame_samples,
            input_device: settings.audio.input_device.clone(),
        })
    }

    /// Open the configured audio input
    ///
    /// Live capture needs the `microphone` feature; otherwise raw PCM16 is
    /// read from standard input at the configured sample rate.
    pub fn open_source(&self) -> Result<Box<dyn AudioSource>, ServerError> {
        #[cfg(feature = "microphone")]
        {
            let source = voice_turn_pipeline::MicrophoneSource::open(
                self.input_device.as_deref(),
                self.frame_samples,
            )?;
            tracing::info!("Capturing from microphone");
            Ok(Box::new(source))
        }

        #[cfg(not(feature = "microphone"))]
        {
            if let Some(device) = &self.input_device {
                tracing::warn!(device = %device, "Built without microphone support, ignoring input device");
            }
            tracing::info!(sample_rate = self.sample_rate.as_u32(), "Reading PCM16 from stdin");
            Ok(Box::new(voice_turn_pipeline::PcmReaderSource::stdin(
                self.sample_rate,
                self.frame_samples,
            )))
        }
    }

    /// Run the conversation until `shutdown` resolves or the input ends
    pub async fn run<F>(
        mut self,
        source: &mut dyn AudioSource,
        shutdown: F,
    ) -> Result<ConversationStats, ServerError>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.conversation.subscribe();
        let event_log = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConversationEvent::Ended { .. }) | Err(RecvError::Closed) => break,
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => tracing::debug!(event = %json, "Conversation event"),
                        Err(e) => tracing::debug!(error = %e, "Unserializable conversation event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Conversation event log lagged");
                    },
                }
            }
        });

        let result = self.conversation.run(source, shutdown).await;

        self.speech.shutdown().await;
        self.transcription.shutdown().await;
        self.action_task.abort();
        event_log.abort();

        Ok(result?)
    }
}
