//! REST Channel
//!
//! One POST per payload with a short timeout. Each call stands alone: a
//! failure never disables the channel, the next cycle simply tries again.

use std::time::Duration;

use super::types::ChannelError;
use super::Channel;
use crate::logic::config::RestSettings;

pub struct RestChannel {
    name: String,
    endpoint: String,
    enabled: bool,
    agent: ureq::Agent,
}

impl RestChannel {
    pub fn new(settings: &RestSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build();

        let enabled = settings.enabled && !settings.endpoint.trim().is_empty();
        if settings.enabled && !enabled {
            log::warn!("REST channel enabled without an endpoint, disabling it");
        }

        Self {
            name: "rest".to_string(),
            endpoint: settings.endpoint.clone(),
            enabled,
            agent,
        }
    }
}

impl Channel for RestChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn publish(&mut self, body: &str) -> Result<(), ChannelError> {
        if !self.enabled {
            return Err(ChannelError::Disabled);
        }

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(body);

        match response {
            Ok(resp) => {
                let status = resp.status();
                log::info!("REST POST to {} [status {}]", self.endpoint, status);
                if (200..300).contains(&status) {
                    Ok(())
                } else {
                    Err(ChannelError::Status(status))
                }
            }
            Err(ureq::Error::Status(code, _)) => Err(ChannelError::Status(code)),
            Err(e) => Err(ChannelError::Network(e.to_string())),
        }
    }

    fn stop(&mut self) {}
}
