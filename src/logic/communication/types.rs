//! Communication Types
//!
//! Wire payload and error types shared by the dispatcher and channels.

use ndarray::{ArrayViewD, Axis};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::logic::model::InferenceResult;

// ============================================================================
// ERRORS
// ============================================================================

/// Whole-payload failure. No channel is attempted when this occurs.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize payload: {0}")]
    Serialization(String),
}

/// Failure of one channel for one payload
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("channel disabled")]
    Disabled,
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// One cycle's result plus its auxiliary reading
#[derive(Debug, Clone)]
pub struct Payload {
    pub result: ndarray::ArrayD<f32>,
    pub temperature: Option<f64>,
}

impl Payload {
    pub fn new(result: &InferenceResult, temperature: Option<f64>) -> Self {
        Self {
            result: result.output.clone(),
            temperature,
        }
    }

    /// `{"result": <nested array>, "temperature": <number|null>}`
    pub fn to_json(&self) -> Result<Value, PublishError> {
        let result = tensor_to_json(self.result.view())?;
        let temperature = match self.temperature {
            Some(t) => Value::Number(finite_number(t)?),
            None => Value::Null,
        };

        let mut body = Map::new();
        body.insert("result".to_string(), result);
        body.insert("temperature".to_string(), temperature);
        Ok(Value::Object(body))
    }

    /// Serialized wire body
    pub fn to_wire(&self) -> Result<String, PublishError> {
        let value = self.to_json()?;
        serde_json::to_string(&value).map_err(|e| PublishError::Serialization(e.to_string()))
    }
}

/// Nested arrays mirroring the tensor's dimensions; a 0-d tensor is a bare number.
pub fn tensor_to_json(tensor: ArrayViewD<'_, f32>) -> Result<Value, PublishError> {
    if tensor.ndim() == 0 {
        let value = tensor
            .iter()
            .next()
            .copied()
            .ok_or_else(|| PublishError::Serialization("empty scalar tensor".to_string()))?;
        return Ok(Value::Number(finite_number(value as f64)?));
    }

    tensor
        .axis_iter(Axis(0))
        .map(tensor_to_json)
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn finite_number(value: f64) -> Result<Number, PublishError> {
    Number::from_f64(value)
        .ok_or_else(|| PublishError::Serialization(format!("non-finite value {} has no JSON form", value)))
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel: String,
    pub result: Result<(), ChannelError>,
}

/// Per-channel results of one publish call
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl PublishReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }
}
