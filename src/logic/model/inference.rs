//! Inference Engine
//!
//! Owns the loaded model for the lifetime of the process. Input is coerced
//! to the configured shape on every call; a coercion failure only affects
//! that call.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

use super::backend::{open_backend, BackendKind, ModelBackend};
use crate::logic::config::ModelSettings;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("unsupported model format: {0} (expected .tflite or .onnx)")]
    UnsupportedFormat(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("invalid model file: {0}")]
    InvalidModel(String),
    #[error("{} backend not compiled in", .0.as_str())]
    BackendUnavailable(BackendKind),
    #[error("model load failed: {0}")]
    Load(String),
    #[error("input of {actual} elements cannot be reshaped to {expected:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: usize },
    #[error("inference failed: {0}")]
    Runtime(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub output: ArrayD<f32>,
    pub backend: BackendKind,
    pub produced_at: DateTime<Utc>,
}

/// Model metadata
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub model_path: String,
    pub backend: BackendKind,
    pub input_shape: Vec<usize>,
    pub declared_input_shape: Option<Vec<usize>>,
    pub threshold: f32,
    pub loaded_at: DateTime<Utc>,
}

/// Engine status for logs
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub model_name: String,
    pub backend: BackendKind,
    pub avg_latency_ms: f32,
    pub inference_count: u64,
    pub failure_count: u64,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct InferenceEngine {
    backend: Box<dyn ModelBackend>,
    metadata: ModelMetadata,
    latency_sum_us: u64,
    inference_count: u64,
    failure_count: u64,
}

impl InferenceEngine {
    /// Load the configured model. Any failure here is startup-fatal.
    pub fn load(settings: &ModelSettings) -> Result<Self, InferenceError> {
        let backend = open_backend(Path::new(&settings.path))?;
        let engine = Self::with_backend(backend, settings.input_shape.clone(), &settings.path, settings.threshold);

        log::info!(
            "Model loaded from {} using {} backend",
            settings.path,
            engine.backend_kind().as_str().to_uppercase()
        );
        Ok(engine)
    }

    /// Wrap an already-loaded backend.
    pub fn with_backend(
        backend: Box<dyn ModelBackend>,
        input_shape: Vec<usize>,
        model_path: &str,
        threshold: f32,
    ) -> Self {
        let declared_input_shape = backend.declared_input_shape();

        if let Some(declared) = &declared_input_shape {
            if declared != &input_shape {
                log::warn!(
                    "Model expects input shape {:?}, but settings configure {:?}",
                    declared,
                    input_shape
                );
            }
        }

        let metadata = ModelMetadata {
            model_path: model_path.to_string(),
            backend: backend.kind(),
            input_shape,
            declared_input_shape,
            threshold,
            loaded_at: Utc::now(),
        };

        Self {
            backend,
            metadata,
            latency_sum_us: 0,
            inference_count: 0,
            failure_count: 0,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.metadata.backend
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.metadata.input_shape
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Run one prediction on `image`.
    pub fn predict(&mut self, image: &ArrayD<u8>) -> Result<InferenceResult, InferenceError> {
        let start_time = Instant::now();

        let result = coerce_input(image, &self.metadata.input_shape)
            .and_then(|input| self.backend.run(input));

        match result {
            Ok(output) => {
                self.latency_sum_us += start_time.elapsed().as_micros() as u64;
                self.inference_count += 1;
                Ok(InferenceResult {
                    output,
                    backend: self.metadata.backend,
                    produced_at: Utc::now(),
                })
            }
            Err(e) => {
                self.failure_count += 1;
                Err(e)
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        let avg = if self.inference_count > 0 {
            (self.latency_sum_us as f32 / self.inference_count as f32) / 1000.0
        } else {
            0.0
        };

        EngineStatus {
            model_name: self.metadata.model_path.clone(),
            backend: self.metadata.backend,
            avg_latency_ms: avg,
            inference_count: self.inference_count,
            failure_count: self.failure_count,
        }
    }
}

/// Reshape to `shape` in row-major order. Element counts must match.
pub fn coerce_input(image: &ArrayD<u8>, shape: &[usize]) -> Result<ArrayD<u8>, InferenceError> {
    let expected: usize = shape.iter().product();
    if image.len() != expected {
        return Err(InferenceError::ShapeMismatch {
            expected: shape.to_vec(),
            actual: image.len(),
        });
    }

    let values: Vec<u8> = image.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| InferenceError::ShapeMismatch {
        expected: shape.to_vec(),
        actual: image.len(),
    })
}
