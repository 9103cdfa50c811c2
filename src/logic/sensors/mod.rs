//! Sensors Module - Frame Acquisition
//!
//! `FrameSource::acquire` always returns a shape-conformant frame. Camera
//! problems are absorbed here and replaced by a synthetic image.
//!
//! - `camera` - hardware seam + raw frame reformatting
//! - `temperature` - auxiliary scalar reading

pub mod camera;
pub mod temperature;


use chrono::{DateTime, Utc};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::logic::config::Settings;
pub use camera::{Camera, RawFrame};
pub use temperature::{TemperatureSensor, TemperatureSource};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum SensorError {
    /// Requested sensor has no implementation. A configuration error, never retried.
    #[error("unsupported sensor: {0}")]
    Unsupported(String),
    #[error("camera {index} could not be opened: {reason}")]
    CameraOpen { index: i32, reason: String },
    #[error("camera read failed: {0}")]
    CameraRead(String),
    #[error("frame reformat failed: {0}")]
    Reformat(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// One acquisition unit
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: ArrayD<u8>,
    /// Present only when the auxiliary sensor is enabled
    pub aux_reading: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// How the image of a frame was obtained
#[derive(Debug)]
pub enum Acquisition {
    Captured(ArrayD<u8>),
    /// Camera present but read or reformat failed
    Fallback(SensorError),
    /// No camera path on this device (disabled or never opened)
    Unsupported,
}

// ============================================================================
// FRAME SOURCE
// ============================================================================

pub struct FrameSource {
    camera: Option<Box<dyn Camera>>,
    input_shape: Vec<usize>,
    temperature: Option<TemperatureSensor>,
    rng: StdRng,
    released: bool,
}

impl FrameSource {
    /// Build from settings, opening the camera once.
    ///
    /// A camera that fails to open is logged and replaced by synthetic frames.
    /// A physical temperature sensor is rejected as unsupported.
    pub fn new(settings: &Settings) -> Result<Self, SensorError> {
        let sensors = &settings.sensors;

        let camera = if sensors.camera_enabled {
            match camera::open_camera(sensors.camera_index) {
                Ok(cam) => Some(cam),
                Err(e) => {
                    log::warn!("{}. Falling back to synthetic image.", e);
                    None
                }
            }
        } else {
            log::info!("Camera disabled, frames will be synthetic");
            None
        };

        let temperature = if sensors.temperature_enabled {
            let source = if sensors.temperature_simulated {
                TemperatureSource::Simulated
            } else {
                TemperatureSource::Hardware
            };
            Some(TemperatureSensor::new(source))
        } else {
            None
        };

        Self::from_parts(camera, settings.model.input_shape.clone(), temperature)
    }

    /// Build from an explicit camera handle (or none).
    pub fn from_parts(
        camera: Option<Box<dyn Camera>>,
        input_shape: Vec<usize>,
        temperature: Option<TemperatureSensor>,
    ) -> Result<Self, SensorError> {
        if let Some(sensor) = &temperature {
            if sensor.source() == TemperatureSource::Hardware {
                return Err(SensorError::Unsupported(
                    "physical temperature sensor (set sensors.temperature_simulated = true)".to_string(),
                ));
            }
        }

        Ok(Self {
            camera,
            input_shape,
            temperature,
            rng: StdRng::from_entropy(),
            released: false,
        })
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    /// Acquire one frame. Never fails.
    pub fn acquire(&mut self) -> Frame {
        let image = match self.capture_image() {
            Acquisition::Captured(image) => image,
            Acquisition::Fallback(e) => {
                log::warn!("{}. Using synthetic image.", e);
                self.synthetic_image()
            }
            Acquisition::Unsupported => {
                log::warn!("Camera not enabled or unavailable. Using synthetic image.");
                self.synthetic_image()
            }
        };

        let aux_reading = self.temperature.as_ref().and_then(|sensor| match sensor.read() {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Temperature read failed: {}", e);
                None
            }
        });

        Frame {
            image,
            aux_reading,
            captured_at: Utc::now(),
        }
    }

    /// Try the camera path without falling back.
    pub fn capture_image(&mut self) -> Acquisition {
        let Some(camera) = self.camera.as_mut() else {
            return Acquisition::Unsupported;
        };

        let raw = match camera.read() {
            Ok(raw) => raw,
            Err(e) => return Acquisition::Fallback(e),
        };

        match camera::reformat(&raw, &self.input_shape) {
            Ok(image) => Acquisition::Captured(image),
            Err(e) => Acquisition::Fallback(e),
        }
    }

    /// Uniform noise in [0, 255] with the configured shape
    pub fn synthetic_image(&mut self) -> ArrayD<u8> {
        synthetic_image(&self.input_shape, &mut self.rng)
    }

    /// Release the camera. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn synthetic_image<R: Rng>(shape: &[usize], rng: &mut R) -> ArrayD<u8> {
    ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.gen::<u8>())
}
