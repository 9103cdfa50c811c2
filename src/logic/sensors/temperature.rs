//! Temperature Sensor
//!
//! Only the simulated source exists. A physical sensor is a configuration
//! error and reports `SensorError::Unsupported` instead of falling back.

use rand::Rng;

use super::SensorError;
use crate::constants::{SIMULATED_TEMPERATURE_MAX, SIMULATED_TEMPERATURE_MIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureSource {
    Simulated,
    Hardware,
}

#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    source: TemperatureSource,
}

impl TemperatureSensor {
    pub fn new(source: TemperatureSource) -> Self {
        Self { source }
    }

    pub fn simulated() -> Self {
        Self::new(TemperatureSource::Simulated)
    }

    pub fn source(&self) -> TemperatureSource {
        self.source
    }

    /// Read one value in °C.
    pub fn read(&self) -> Result<f64, SensorError> {
        match self.source {
            TemperatureSource::Simulated => Ok(simulate()),
            TemperatureSource::Hardware => Err(SensorError::Unsupported(
                "physical temperature sensor".to_string(),
            )),
        }
    }
}

/// Uniform in [18.0, 30.0], rounded to 2 decimals
fn simulate() -> f64 {
    let raw = rand::thread_rng().gen_range(SIMULATED_TEMPERATURE_MIN..=SIMULATED_TEMPERATURE_MAX);
    let temp = (raw * 100.0).round() / 100.0;
    log::debug!("Simulated temperature: {} °C", temp);
    temp
}
