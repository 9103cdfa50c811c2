//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every field of `Settings` falls back to one of these.

/// Default settings file location
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.json";

/// Default model artifact
pub const DEFAULT_MODEL_PATH: &str = "models/model.onnx";

/// Default model input shape [batch, height, width, channels]
pub const DEFAULT_INPUT_SHAPE: [usize; 4] = [1, 224, 224, 3];

/// Default prediction threshold
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Default read interval (seconds)
pub const DEFAULT_READ_INTERVAL: u64 = 5;

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default MQTT topic
pub const DEFAULT_MQTT_TOPIC: &str = "rpi/ai/results";

/// Default MQTT client id
pub const DEFAULT_MQTT_CLIENT_ID: &str = "edge-perception";

/// Default MQTT keep-alive (seconds)
pub const DEFAULT_MQTT_KEEP_ALIVE: u64 = 60;

/// How long to wait for the broker's CONNACK at startup (seconds)
pub const DEFAULT_MQTT_CONNECT_TIMEOUT: u64 = 5;

/// Default REST request timeout (seconds)
pub const DEFAULT_REST_TIMEOUT: u64 = 2;

/// Simulated temperature range (°C)
pub const SIMULATED_TEMPERATURE_MIN: f64 = 18.0;
pub const SIMULATED_TEMPERATURE_MAX: f64 = 30.0;

/// Smallest model file accepted by `validate`
pub const MIN_MODEL_FILE_BYTES: u64 = 1024;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Edge Perception";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get settings file path from environment or use default
pub fn get_settings_path() -> String {
    std::env::var("EDGE_SETTINGS_PATH")
        .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string())
}

/// Model path override from environment
pub fn get_model_path_override() -> Option<String> {
    std::env::var("EDGE_MODEL_PATH")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

/// Read interval override from environment
pub fn get_read_interval_override() -> Option<u64> {
    std::env::var("EDGE_READ_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
}
