//! Runtime Settings
//!
//! Loaded once at process start from a JSON file and passed by reference
//! into each component's constructor. Missing fields use `constants` defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid settings: {0}")]
    Invalid(String),
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub sensors: SensorSettings,
    pub communication: CommunicationSettings,
}

/// Model artifact and its expected input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub path: String,
    /// Ordered dimensions, e.g. [1, 224, 224, 3]
    pub input_shape: Vec<usize>,
    pub threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: constants::DEFAULT_MODEL_PATH.to_string(),
            input_shape: constants::DEFAULT_INPUT_SHAPE.to_vec(),
            threshold: constants::DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Seconds between cycles
    pub read_interval: u64,
    pub camera_enabled: bool,
    pub camera_index: i32,
    pub temperature_enabled: bool,
    /// `false` means a physical sensor, which is not supported
    pub temperature_simulated: bool,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            read_interval: constants::DEFAULT_READ_INTERVAL,
            camera_enabled: true,
            camera_index: 0,
            temperature_enabled: false,
            temperature_simulated: true,
        }
    }
}

impl SensorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.read_interval)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationSettings {
    pub mqtt: MqttSettings,
    pub rest: RestSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: "localhost".to_string(),
            port: constants::DEFAULT_MQTT_PORT,
            topic: constants::DEFAULT_MQTT_TOPIC.to_string(),
            client_id: constants::DEFAULT_MQTT_CLIENT_ID.to_string(),
            keep_alive_secs: constants::DEFAULT_MQTT_KEEP_ALIVE,
            connect_timeout_secs: constants::DEFAULT_MQTT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            timeout_secs: constants::DEFAULT_REST_TIMEOUT,
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Settings {
    /// Load settings from `path`, apply env overrides, validate.
    ///
    /// A missing file is not an error: defaults are used and a warning logged.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let mut settings = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: display.clone(),
                source,
            })?;
            serde_json::from_str::<Settings>(&content).map_err(|source| ConfigError::Parse {
                path: display.clone(),
                source,
            })?
        } else {
            log::warn!("Settings file {} not found, using defaults", display);
            Settings::default()
        };

        settings.apply_env_overrides();
        settings.validate()?;

        log::info!("Settings loaded from {}", display);
        Ok(settings)
    }

    /// Load from the path named by `EDGE_SETTINGS_PATH` (or the default path)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(constants::get_settings_path())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(model_path) = constants::get_model_path_override() {
            log::info!("Model path overridden from environment: {}", model_path);
            self.model.path = model_path;
        }
        if let Some(interval) = constants::get_read_interval_override() {
            self.sensors.read_interval = interval;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.input_shape.is_empty() {
            return Err(ConfigError::Invalid("model.input_shape must not be empty".into()));
        }
        if self.model.input_shape.contains(&0) {
            return Err(ConfigError::Invalid(format!(
                "model.input_shape has a zero dimension: {:?}",
                self.model.input_shape
            )));
        }
        if self.sensors.read_interval == 0 {
            return Err(ConfigError::Invalid("sensors.read_interval must be at least 1 second".into()));
        }
        if self.communication.rest.enabled && self.communication.rest.timeout_secs == 0 {
            return Err(ConfigError::Invalid("communication.rest.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.model.input_shape, vec![1, 224, 224, 3]);
        assert_eq!(settings.sensors.read_interval, 5);
        assert!(settings.sensors.camera_enabled);
        assert!(!settings.sensors.temperature_enabled);
        assert!(!settings.communication.mqtt.enabled);
        assert_eq!(settings.communication.rest.timeout_secs, 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "model": {{ "path": "models/detector.onnx", "input_shape": [1, 96, 96, 3] }},
                "communication": {{ "rest": {{ "enabled": true, "endpoint": "http://10.0.0.2:5000/api/results" }} }}
            }}"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.model.path, "models/detector.onnx");
        assert_eq!(settings.model.input_shape, vec![1, 96, 96, 3]);
        assert_eq!(settings.model.threshold, 0.5);
        assert!(settings.communication.rest.enabled);
        assert_eq!(settings.communication.rest.timeout_secs, 2);
        assert_eq!(settings.communication.mqtt.topic, "rpi/ai/results");
    }

    #[test]
    fn test_sample_settings_load() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/settings.json");
        let settings = Settings::load(&path).unwrap();
        assert!(settings.model.path.ends_with(".onnx"));
        assert_eq!(settings.model.input_shape, vec![1, 224, 224, 3]);
        assert!(settings.communication.mqtt.enabled);
        assert!(!settings.communication.rest.enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.model.input_shape, vec![1, 224, 224, 3]);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(Settings::load(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut settings = Settings::default();
        settings.model.input_shape = vec![1, 0, 224, 3];
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));

        settings.model.input_shape = vec![];
        assert!(settings.validate().is_err());
    }
}
