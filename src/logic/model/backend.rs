//! Model Backends - ONNX Runtime / TensorFlow Lite
//!
//! Each backend owns its loaded model. Selection happens once, by file
//! extension, in `open_backend`.

use std::path::Path;

use ndarray::ArrayD;

use super::inference::InferenceError;

// ============================================================================
// BACKEND TRAIT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    TfLite,
    Onnx,
}

impl BackendKind {
    /// Pick a backend from the model file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
            Some(ext) if ext == "tflite" => Some(Self::TfLite),
            Some(ext) if ext == "onnx" => Some(Self::Onnx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TfLite => "tflite",
            Self::Onnx => "onnx",
        }
    }
}

/// A loaded model that can run one prediction at a time.
pub trait ModelBackend {
    fn kind(&self) -> BackendKind;

    /// Input shape declared by the model, when it has a static one.
    fn declared_input_shape(&self) -> Option<Vec<usize>>;

    /// Run one synchronous prediction.
    fn run(&mut self, input: ArrayD<u8>) -> Result<ArrayD<f32>, InferenceError>;
}

/// Load `path` with the backend its extension selects.
pub fn open_backend(path: &Path) -> Result<Box<dyn ModelBackend>, InferenceError> {
    let kind = BackendKind::from_path(path)
        .ok_or_else(|| InferenceError::UnsupportedFormat(path.display().to_string()))?;

    if !path.exists() {
        return Err(InferenceError::ModelNotFound(path.display().to_string()));
    }

    match kind {
        BackendKind::Onnx => open_onnx(path),
        BackendKind::TfLite => open_tflite(path),
    }
}

#[cfg(feature = "onnx")]
fn open_onnx(path: &Path) -> Result<Box<dyn ModelBackend>, InferenceError> {
    Ok(Box::new(onnx::OnnxBackend::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn open_onnx(_path: &Path) -> Result<Box<dyn ModelBackend>, InferenceError> {
    Err(InferenceError::BackendUnavailable(BackendKind::Onnx))
}

#[cfg(feature = "tflite")]
fn open_tflite(path: &Path) -> Result<Box<dyn ModelBackend>, InferenceError> {
    Ok(Box::new(tflite_backend::TfLiteBackend::load(path)?))
}

#[cfg(not(feature = "tflite"))]
fn open_tflite(_path: &Path) -> Result<Box<dyn ModelBackend>, InferenceError> {
    Err(InferenceError::BackendUnavailable(BackendKind::TfLite))
}

#[cfg(any(feature = "onnx", test))]
fn static_dims(dims: impl IntoIterator<Item = i64>) -> Option<Vec<usize>> {
    dims.into_iter()
        .map(|d| usize::try_from(d).ok().filter(|&d| d > 0))
        .collect()
}

// ============================================================================
// ONNX IMPLEMENTATION
// ============================================================================

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;

    use ndarray::{ArrayD, IxDyn};
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::{Value, ValueType};

    use super::{static_dims, BackendKind, ModelBackend};
    use crate::logic::model::inference::InferenceError;

    pub struct OnnxBackend {
        session: Session,
        output_name: String,
        input_shape: Option<Vec<usize>>,
    }

    impl OnnxBackend {
        pub fn load(path: &Path) -> Result<Self, InferenceError> {
            log::info!("Loading ONNX model from: {}", path.display());

            let session = Session::builder()
                .map_err(|e| InferenceError::Load(format!("Failed to create session builder: {}", e)))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| InferenceError::Load(format!("Failed to set optimization: {}", e)))?
                .commit_from_file(path)
                .map_err(|e| InferenceError::Load(format!("Failed to load model: {}", e)))?;

            let output_name = session
                .outputs
                .first()
                .map(|o| o.name.clone())
                .ok_or_else(|| InferenceError::Load("No output defined".to_string()))?;

            let input_shape = session.inputs.first().and_then(|input| match &input.input_type {
                ValueType::Tensor { shape, .. } => static_dims(shape.iter().copied()),
                _ => None,
            });

            Ok(Self {
                session,
                output_name,
                input_shape,
            })
        }
    }

    impl ModelBackend for OnnxBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Onnx
        }

        fn declared_input_shape(&self) -> Option<Vec<usize>> {
            self.input_shape.clone()
        }

        fn run(&mut self, input: ArrayD<u8>) -> Result<ArrayD<f32>, InferenceError> {
            let input_tensor =
                Value::from_array(input).map_err(|e| InferenceError::Runtime(format!("Tensor error: {}", e)))?;

            let outputs = self
                .session
                .run(ort::inputs![input_tensor])
                .map_err(|e| InferenceError::Runtime(format!("Inference failed: {}", e)))?;

            let output = outputs
                .get(&self.output_name)
                .ok_or_else(|| InferenceError::Runtime("No output".to_string()))?;

            // Quantized models emit u8; everything else is read as f32.
            let (shape, data): (Vec<usize>, Vec<f32>) = match output.try_extract_tensor::<f32>() {
                Ok((shape, data)) => (to_dims(shape.iter().copied()), data.to_vec()),
                Err(_) => {
                    let (shape, data) = output
                        .try_extract_tensor::<u8>()
                        .map_err(|e| InferenceError::Runtime(format!("Extract error: {}", e)))?;
                    (to_dims(shape.iter().copied()), data.iter().map(|&v| v as f32).collect())
                }
            };

            ArrayD::from_shape_vec(IxDyn(&shape), data)
                .map_err(|e| InferenceError::Runtime(format!("Array error: {}", e)))
        }
    }

    fn to_dims(dims: impl Iterator<Item = i64>) -> Vec<usize> {
        dims.map(|d| d.max(0) as usize).collect()
    }
}

// ============================================================================
// TFLITE IMPLEMENTATION
// ============================================================================

#[cfg(feature = "tflite")]
mod tflite_backend {
    use std::path::Path;

    use ndarray::{ArrayD, IxDyn};
    use tflite::context::ElementKind;
    use tflite::ops::builtin::BuiltinOpResolver;
    use tflite::{FlatBufferModel, Interpreter, InterpreterBuilder};

    use super::{BackendKind, ModelBackend};
    use crate::logic::model::inference::InferenceError;

    pub struct TfLiteBackend {
        interpreter: Interpreter<'static, BuiltinOpResolver>,
        input_index: i32,
        output_index: i32,
        input_shape: Vec<usize>,
    }

    impl TfLiteBackend {
        pub fn load(path: &Path) -> Result<Self, InferenceError> {
            log::info!("Loading TFLite model from: {}", path.display());

            let model = FlatBufferModel::build_from_file(path)
                .map_err(|e| InferenceError::Load(format!("Failed to read model: {}", e)))?;
            let resolver = BuiltinOpResolver::default();
            let builder = InterpreterBuilder::new(model, resolver)
                .map_err(|e| InferenceError::Load(format!("Failed to create interpreter builder: {}", e)))?;
            let mut interpreter = builder
                .build()
                .map_err(|e| InferenceError::Load(format!("Failed to build interpreter: {}", e)))?;
            interpreter
                .allocate_tensors()
                .map_err(|e| InferenceError::Load(format!("Failed to allocate tensors: {}", e)))?;

            let input_index = *interpreter
                .inputs()
                .first()
                .ok_or_else(|| InferenceError::Load("No input defined".to_string()))?;
            let output_index = *interpreter
                .outputs()
                .first()
                .ok_or_else(|| InferenceError::Load("No output defined".to_string()))?;

            let input_shape = interpreter
                .tensor_info(input_index)
                .map(|info| info.dims)
                .ok_or_else(|| InferenceError::Load("Missing input tensor info".to_string()))?;

            Ok(Self {
                interpreter,
                input_index,
                output_index,
                input_shape,
            })
        }
    }

    impl ModelBackend for TfLiteBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::TfLite
        }

        fn declared_input_shape(&self) -> Option<Vec<usize>> {
            Some(self.input_shape.clone())
        }

        fn run(&mut self, input: ArrayD<u8>) -> Result<ArrayD<f32>, InferenceError> {
            let slot = self
                .interpreter
                .tensor_data_mut::<u8>(self.input_index)
                .map_err(|e| InferenceError::Runtime(format!("Input tensor error: {}", e)))?;
            let input = input.as_standard_layout();
            let values = input
                .as_slice()
                .ok_or_else(|| InferenceError::Runtime("Input not contiguous".to_string()))?;
            if slot.len() != values.len() {
                return Err(InferenceError::Runtime(format!(
                    "Model input holds {} values, got {}",
                    slot.len(),
                    values.len()
                )));
            }
            slot.copy_from_slice(values);

            self.interpreter
                .invoke()
                .map_err(|e| InferenceError::Runtime(format!("Inference failed: {}", e)))?;

            let info = self
                .interpreter
                .tensor_info(self.output_index)
                .ok_or_else(|| InferenceError::Runtime("Missing output tensor info".to_string()))?;

            let data: Vec<f32> = match info.element_kind {
                ElementKind::kTfLiteUInt8 => self
                    .interpreter
                    .tensor_data::<u8>(self.output_index)
                    .map_err(|e| InferenceError::Runtime(format!("Extract error: {}", e)))?
                    .iter()
                    .map(|&v| v as f32)
                    .collect(),
                _ => self
                    .interpreter
                    .tensor_data::<f32>(self.output_index)
                    .map_err(|e| InferenceError::Runtime(format!("Extract error: {}", e)))?
                    .to_vec(),
            };

            ArrayD::from_shape_vec(IxDyn(&info.dims), data)
                .map_err(|e| InferenceError::Runtime(format!("Array error: {}", e)))
        }
    }
}
