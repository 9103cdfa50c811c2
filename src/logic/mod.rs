//! Logic Module - Perception Pipeline
//!
//! - `sensors/` - frame acquisition with synthetic fallback
//! - `model/` - model loading and inference
//! - `communication/` - payload fan-out to MQTT / REST
//! - `inference_loop` - the fixed-interval cycle tying them together

pub mod config;
pub mod sensors;
pub mod model;
pub mod communication;
pub mod inference_loop;
