//! Model Validation
//!
//! Offline check of a model artifact before deploying it: the file must
//! exist and be non-trivial, it must load, and it must run once on a
//! synthetic input of the shape it declares.

use std::fs;
use std::path::Path;

use super::backend::{open_backend, BackendKind};
use super::inference::InferenceError;
use crate::constants::MIN_MODEL_FILE_BYTES;
use crate::logic::config::ModelSettings;
use crate::logic::sensors::synthetic_image;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub backend: BackendKind,
    pub configured_input_shape: Vec<usize>,
    pub declared_input_shape: Option<Vec<usize>>,
    pub output_shape: Vec<usize>,
}

impl ValidationReport {
    /// `true` when the model does not declare a shape or agrees with settings
    pub fn shapes_agree(&self) -> bool {
        self.declared_input_shape
            .as_ref()
            .map_or(true, |declared| declared == &self.configured_input_shape)
    }
}

pub fn validate_model(settings: &ModelSettings) -> Result<ValidationReport, InferenceError> {
    let path = Path::new(&settings.path);

    let size = fs::metadata(path)
        .map_err(|_| InferenceError::ModelNotFound(settings.path.clone()))?
        .len();
    if size < MIN_MODEL_FILE_BYTES {
        return Err(InferenceError::InvalidModel(format!(
            "{} is {} bytes, looks empty or corrupt",
            settings.path, size
        )));
    }

    let mut backend = open_backend(path)?;
    let declared_input_shape = backend.declared_input_shape();

    let run_shape = match &declared_input_shape {
        Some(declared) => {
            if declared != &settings.input_shape {
                log::warn!(
                    "Model expects input shape {:?}, but settings configure {:?}",
                    declared,
                    settings.input_shape
                );
            }
            declared.clone()
        }
        None => settings.input_shape.clone(),
    };

    let input = synthetic_image(&run_shape, &mut rand::thread_rng());
    let output = backend.run(input)?;

    log::info!("Model loaded and executed successfully");
    log::info!("Output shape: {:?}", output.shape());

    Ok(ValidationReport {
        backend: backend.kind(),
        configured_input_shape: settings.input_shape.clone(),
        declared_input_shape,
        output_shape: output.shape().to_vec(),
    })
}
