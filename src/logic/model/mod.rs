//! Model Module - AI/ML Inference Engine
//!
//! - `backend` - ONNX Runtime / TFLite loaders behind `ModelBackend`
//! - `inference` - the engine the cycle calls
//! - `validate` - offline artifact check

pub mod backend;
pub mod inference;
pub mod validate;


// Re-export common types
pub use backend::{BackendKind, ModelBackend};
pub use inference::{EngineStatus, InferenceEngine, InferenceError, InferenceResult};
pub use validate::{validate_model, ValidationReport};
