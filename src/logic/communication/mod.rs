//! Communication Module - Result Publishing
//!
//! Serializes a payload once, then fans it out to every enabled channel.
//! Channels fail independently: one failing never stops the others.

pub mod mqtt;
pub mod rest;
pub mod types;

#[cfg(test)]
mod tests;

use std::panic::{self, AssertUnwindSafe};

pub use mqtt::MqttChannel;
pub use rest::RestChannel;
pub use types::{ChannelError, ChannelOutcome, Payload, PublishError, PublishReport};

use crate::logic::config::CommunicationSettings;

// ============================================================================
// CHANNEL TRAIT
// ============================================================================

/// One independent delivery path
pub trait Channel: Send {
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Deliver one serialized payload.
    fn publish(&mut self, body: &str) -> Result<(), ChannelError>;

    /// Release connections. Idempotent, never fails.
    fn stop(&mut self);
}

// ============================================================================
// DISPATCHER
// ============================================================================

pub struct Dispatcher {
    channels: Vec<Box<dyn Channel>>,
}

impl Dispatcher {
    /// Build the configured channels. MQTT connects here.
    pub fn new(settings: &CommunicationSettings) -> Self {
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();

        if settings.mqtt.enabled {
            channels.push(Box::new(MqttChannel::new(&settings.mqtt)));
        }
        if settings.rest.enabled {
            channels.push(Box::new(RestChannel::new(&settings.rest)));
        }

        let dispatcher = Self::with_channels(channels);
        log::info!(
            "Publishing to {} channel(s): {:?}",
            dispatcher.enabled_channels().len(),
            dispatcher.enabled_channels()
        );
        dispatcher
    }

    pub fn with_channels(channels: Vec<Box<dyn Channel>>) -> Self {
        Self { channels }
    }

    pub fn enabled_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name())
            .collect()
    }

    /// Serialize once, then attempt every enabled channel.
    ///
    /// Serialization failure aborts before any channel is touched.
    pub fn publish(&mut self, payload: &Payload) -> Result<PublishReport, PublishError> {
        let body = payload.to_wire().map_err(|e| {
            log::error!("{}", e);
            e
        })?;

        let mut report = PublishReport::default();

        for channel in self.channels.iter_mut().filter(|c| c.is_enabled()) {
            let result = channel.publish(&body);

            if let Err(e) = &result {
                log::error!("{} publish failed: {}", channel.name(), e);
            }

            report.outcomes.push(ChannelOutcome {
                channel: channel.name().to_string(),
                result,
            });
        }

        Ok(report)
    }

    /// Stop every channel. Idempotent. A channel that panics does not keep
    /// the others from stopping.
    pub fn stop(&mut self) {
        for channel in self.channels.iter_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| channel.stop())).is_err() {
                log::error!("{} channel panicked while stopping", channel.name());
            }
        }
    }
}
