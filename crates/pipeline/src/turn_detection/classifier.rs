//! Smart-turn end-of-turn classifier
//!
//! ONNX model over 8s of log-mel features; outputs the probability that the
//! speaker has finished. Without the `onnx` feature, or when the model file is
//! missing, the classifier reports itself unavailable and the detector relies
//! on the silence timeout alone.

#[cfg(feature = "onnx")]
use ndarray::Array3;
#[cfg(feature = "onnx")]
use ort::{session::builder::GraphOptimizationLevel, session::Session, value::Tensor};
#[cfg(feature = "onnx")]
use parking_lot::Mutex;
use std::path::Path;

use voice_turn_config::constants::classifier::{HOP_LENGTH, N_FFT, N_MELS, WINDOW_SECS};
use voice_turn_config::ClassifierConfig;
#[cfg(feature = "onnx")]
use voice_turn_core::PCM16_NORMALIZE;
use voice_turn_core::{EndOfTurnPrediction, TurnClassifier};

use super::features::LogMelExtractor;
use crate::PipelineError;

const SAMPLE_RATE: usize = 16000;

/// Smart-turn v3 classifier
pub struct SmartTurnClassifier {
    #[cfg(feature = "onnx")]
    session: Option<Mutex<Session>>,
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    features: LogMelExtractor,
    threshold: f32,
    name: String,
}

impl SmartTurnClassifier {
    /// Classifier that always reports unavailable
    pub fn unavailable(threshold: f32) -> Self {
        Self {
            #[cfg(feature = "onnx")]
            session: None,
            features: default_extractor(),
            threshold,
            name: "unavailable".to_string(),
        }
    }

    /// Load the model, falling back to an unavailable classifier on any failure
    pub fn from_settings(config: &ClassifierConfig) -> Self {
        if !config.enabled {
            tracing::info!("Turn classifier disabled, using silence timeout only");
            return Self::unavailable(config.threshold);
        }
        match Self::load(&config.model_path, config.threshold) {
            Ok(classifier) => classifier,
            Err(e) => {
                tracing::warn!(
                    path = %config.model_path,
                    error = %e,
                    "Turn classifier not loaded, using silence timeout only"
                );
                Self::unavailable(config.threshold)
            }
        }
    }

    /// Load an ONNX model and warm it up
    #[cfg(feature = "onnx")]
    pub fn load(model_path: impl AsRef<Path>, threshold: f32) -> Result<Self, PipelineError> {
        let path = model_path.as_ref();
        if !path.exists() {
            return Err(PipelineError::Model(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .with_intra_threads(1)
            .map_err(|e| PipelineError::Model(e.to_string()))?
            .commit_from_file(path)
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let classifier = Self {
            session: Some(Mutex::new(session)),
            features: default_extractor(),
            threshold,
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "smart-turn".to_string()),
        };

        let warm_up = std::time::Instant::now();
        classifier.infer(&vec![0i16; SAMPLE_RATE])?;
        tracing::info!(
            model = %classifier.name,
            warm_up_ms = warm_up.elapsed().as_millis() as u64,
            "Turn classifier loaded"
        );

        Ok(classifier)
    }

    #[cfg(not(feature = "onnx"))]
    pub fn load(model_path: impl AsRef<Path>, _threshold: f32) -> Result<Self, PipelineError> {
        Err(PipelineError::Model(format!(
            "built without the onnx feature, cannot load {}",
            model_path.as_ref().display()
        )))
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Completion probability for the given context window
    #[cfg(feature = "onnx")]
    fn infer(&self, audio: &[i16]) -> Result<f32, PipelineError> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PipelineError::Model("model not loaded".to_string()))?;

        let samples: Vec<f32> = audio.iter().map(|&s| s as f32 / PCM16_NORMALIZE).collect();
        let features = self.features.extract(&samples);
        let input = Array3::from_shape_vec(
            (1, self.features.n_mels(), self.features.n_frames()),
            features,
        )
        .map_err(|e| PipelineError::Model(e.to_string()))?;
        let input_tensor =
            Tensor::from_array(input).map_err(|e| PipelineError::Model(e.to_string()))?;

        let mut session = session.lock();
        let outputs = session
            .run(ort::inputs!["input_features" => input_tensor])
            .map_err(|e| PipelineError::Model(e.to_string()))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PipelineError::Model(e.to_string()))?;
        data.first()
            .copied()
            .ok_or_else(|| PipelineError::Model("empty output tensor".to_string()))
    }

    #[cfg(not(feature = "onnx"))]
    fn infer(&self, _audio: &[i16]) -> Result<f32, PipelineError> {
        Err(PipelineError::Model("model not loaded".to_string()))
    }
}

impl TurnClassifier for SmartTurnClassifier {
    fn predict(&self, audio: &[i16]) -> voice_turn_core::Result<EndOfTurnPrediction> {
        if !self.is_available() {
            return Ok(EndOfTurnPrediction::UNAVAILABLE);
        }
        let probability = self.infer(audio)?;
        Ok(EndOfTurnPrediction::from_probability(probability, self.threshold))
    }

    #[cfg(feature = "onnx")]
    fn is_available(&self) -> bool {
        self.session.is_some()
    }

    #[cfg(not(feature = "onnx"))]
    fn is_available(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

fn default_extractor() -> LogMelExtractor {
    LogMelExtractor::new(SAMPLE_RATE, N_FFT, HOP_LENGTH, N_MELS, SAMPLE_RATE * WINDOW_SECS)
}
