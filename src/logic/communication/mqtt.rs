//! MQTT Channel
//!
//! Connects once at construction. A broker that cannot be reached then
//! leaves the channel disabled for the rest of the process. The connection
//! is serviced by a channel-owned I/O thread; `publish` only enqueues.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS};

use super::types::ChannelError;
use super::Channel;
use crate::logic::config::MqttSettings;

const REQUEST_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct MqttChannel {
    name: String,
    topic: String,
    client: Option<Client>,
    io_thread: Option<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl MqttChannel {
    /// Connect to the broker. On failure the channel is returned disabled.
    pub fn new(settings: &MqttSettings) -> Self {
        match Self::connect(settings) {
            Ok(channel) => channel,
            Err(e) => {
                log::error!(
                    "Failed to connect to MQTT broker {}:{}: {}",
                    settings.broker,
                    settings.port,
                    e
                );
                Self {
                    name: "mqtt".to_string(),
                    topic: settings.topic.clone(),
                    client: None,
                    io_thread: None,
                    stopping: Arc::new(AtomicBool::new(true)),
                }
            }
        }
    }

    /// Connect and wait for the broker's CONNACK.
    pub fn connect(settings: &MqttSettings) -> Result<Self, ChannelError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.broker, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        wait_for_connack(&mut connection, Duration::from_secs(settings.connect_timeout_secs))?;

        log::info!("MQTT connected to {}:{}", settings.broker, settings.port);

        let stopping = Arc::new(AtomicBool::new(false));
        let io_stopping = stopping.clone();
        let io_thread = thread::Builder::new()
            .name("mqtt-io".to_string())
            .spawn(move || drive_connection(connection, io_stopping))
            .map_err(|e| ChannelError::Connect(format!("failed to spawn I/O thread: {}", e)))?;

        Ok(Self {
            name: "mqtt".to_string(),
            topic: settings.topic.clone(),
            client: Some(client),
            io_thread: Some(io_thread),
            stopping,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Channel for MqttChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn publish(&mut self, body: &str) -> Result<(), ChannelError> {
        let client = self.client.as_ref().ok_or(ChannelError::Disabled)?;

        client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, body.as_bytes().to_vec())
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        log::debug!("MQTT published to {}: {}", self.topic, body);
        Ok(())
    }

    fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);

        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect() {
                log::debug!("MQTT disconnect request failed: {}", e);
            }
            // Dropping the last client closes the request queue and ends the I/O loop.
            drop(client);
        }

        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                log::warn!("MQTT I/O thread panicked");
            }
            log::info!("MQTT disconnected");
        }
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_for_connack(connection: &mut Connection, timeout: Duration) -> Result<(), ChannelError> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ChannelError::Connect("timed out waiting for CONNACK".to_string()));
        }

        match connection.recv_timeout(remaining) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ChannelError::Connect(format!("broker refused connection: {:?}", ack.code)))
                };
            }
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => return Err(ChannelError::Connect(e.to_string())),
            Err(_) => return Err(ChannelError::Connect("timed out waiting for CONNACK".to_string())),
        }
    }
}

/// Keepalive, outgoing queue flush and reconnects
fn drive_connection(mut connection: Connection, stopping: Arc<AtomicBool>) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!("MQTT connection error: {}. Retrying.", e);
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    log::debug!("MQTT I/O loop finished");
}
