//! Edge Perception - Library Root
//!
//! Acquire a sensor frame, run inference over the image, publish the result.
//! `main.rs` wires these together; everything here is usable on its own.

pub mod constants;
pub mod logic;
