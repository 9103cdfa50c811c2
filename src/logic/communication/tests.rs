//! Dispatcher and Channel Tests

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ndarray::{arr2, ArrayD, IxDyn};
use parking_lot::Mutex;

use super::*;
use crate::logic::config::{CommunicationSettings, MqttSettings, RestSettings};

/// Records every body it receives
struct RecordingChannel {
    name: String,
    received: Arc<Mutex<Vec<String>>>,
    stops: Arc<Mutex<usize>>,
}

impl RecordingChannel {
    fn new(name: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let channel = Self {
            name: name.to_string(),
            received: received.clone(),
            stops: Arc::new(Mutex::new(0)),
        };
        (channel, received)
    }
}

impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn publish(&mut self, body: &str) -> Result<(), ChannelError> {
        self.received.lock().push(body.to_string());
        Ok(())
    }

    fn stop(&mut self) {
        *self.stops.lock() += 1;
    }
}

struct FailingChannel;

impl Channel for FailingChannel {
    fn name(&self) -> &str {
        "failing"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn publish(&mut self, _body: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Network("broker went away".to_string()))
    }

    fn stop(&mut self) {}
}

struct DisabledChannel {
    attempts: Arc<Mutex<usize>>,
}

impl Channel for DisabledChannel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn publish(&mut self, _body: &str) -> Result<(), ChannelError> {
        *self.attempts.lock() += 1;
        Err(ChannelError::Disabled)
    }

    fn stop(&mut self) {}
}

struct PanickingChannel;

impl Channel for PanickingChannel {
    fn name(&self) -> &str {
        "panicking"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn publish(&mut self, _body: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    fn stop(&mut self) {
        panic!("socket already torn down");
    }
}

fn sample_payload() -> Payload {
    Payload {
        result: arr2(&[[0.25f32, 0.75]]).into_dyn(),
        temperature: Some(23.5),
    }
}

/// Accept one HTTP request, answer with `status_line`, return the request body.
fn serve_once(status_line: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
        }

        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).unwrap();

        let response = format!("{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status_line);
        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8(body).unwrap()
    });

    (format!("http://{}/api/results", addr), handle)
}

/// Read one MQTT control packet: fixed header byte, varint length, body.
fn read_mqtt_packet(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 1];
    stream.read_exact(&mut header).unwrap();

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).unwrap();
        remaining |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut packet = vec![header[0]];
    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).unwrap();
    packet.extend(body);
    packet
}

/// Accept one client, acknowledge its CONNECT, then record everything it
/// sends until the socket closes.
fn fake_broker() -> (u16, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let connect = read_mqtt_packet(&mut stream);
        assert_eq!(connect[0] >> 4, 1, "first packet must be CONNECT");
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
        seen
    });

    (port, handle)
}

fn rest_settings(endpoint: &str) -> RestSettings {
    RestSettings {
        enabled: true,
        endpoint: endpoint.to_string(),
        timeout_secs: 2,
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

#[test]
fn test_payload_wire_format() {
    let value: serde_json::Value = serde_json::from_str(&sample_payload().to_wire().unwrap()).unwrap();
    assert_eq!(value, serde_json::json!({ "result": [[0.25, 0.75]], "temperature": 23.5 }));
}

#[test]
fn test_missing_temperature_is_null() {
    let payload = Payload {
        result: ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap(),
        temperature: None,
    };
    let value = payload.to_json().unwrap();
    assert_eq!(value, serde_json::json!({ "result": [1.0, 2.0, 3.0], "temperature": null }));
}

#[test]
fn test_nested_arrays_follow_dimensions() {
    let tensor = ArrayD::from_shape_vec(IxDyn(&[2, 1, 2]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let value = types::tensor_to_json(tensor.view()).unwrap();
    assert_eq!(value, serde_json::json!([[[1.0, 2.0]], [[3.0, 4.0]]]));
}

#[test]
fn test_scalar_tensor_is_bare_number() {
    let tensor = ArrayD::from_elem(IxDyn(&[]), 0.5f32);
    assert_eq!(types::tensor_to_json(tensor.view()).unwrap(), serde_json::json!(0.5));
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[test]
fn test_failure_isolation() {
    let (healthy, received) = RecordingChannel::new("healthy");
    let mut dispatcher = Dispatcher::with_channels(vec![Box::new(FailingChannel), Box::new(healthy)]);

    let payload = sample_payload();
    let report = dispatcher.publish(&payload).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.outcome("failing").unwrap().result,
        Err(ChannelError::Network(_))
    ));

    let received = received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], payload.to_wire().unwrap());
}

#[test]
fn test_serialization_failure_sends_nothing() {
    let (first, first_rx) = RecordingChannel::new("first");
    let (second, second_rx) = RecordingChannel::new("second");
    let mut dispatcher = Dispatcher::with_channels(vec![Box::new(first), Box::new(second)]);

    let payload = Payload {
        result: arr2(&[[0.1f32, f32::NAN]]).into_dyn(),
        temperature: None,
    };

    let err = dispatcher.publish(&payload).unwrap_err();
    assert!(matches!(err, PublishError::Serialization(_)));
    assert!(first_rx.lock().is_empty());
    assert!(second_rx.lock().is_empty());
}

#[test]
fn test_non_finite_temperature_is_serialization_error() {
    let payload = Payload {
        result: arr2(&[[0.1f32]]).into_dyn(),
        temperature: Some(f64::INFINITY),
    };
    assert!(payload.to_wire().is_err());
}

#[test]
fn test_disabled_channels_are_skipped() {
    let attempts = Arc::new(Mutex::new(0));
    let (healthy, received) = RecordingChannel::new("healthy");
    let mut dispatcher = Dispatcher::with_channels(vec![
        Box::new(DisabledChannel { attempts: attempts.clone() }),
        Box::new(healthy),
    ]);

    assert_eq!(dispatcher.enabled_channels(), vec!["healthy"]);

    let report = dispatcher.publish(&sample_payload()).unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(*attempts.lock(), 0);
    assert_eq!(received.lock().len(), 1);
}

#[test]
fn test_no_channels_is_empty_report() {
    let mut dispatcher = Dispatcher::new(&CommunicationSettings::default());
    let report = dispatcher.publish(&sample_payload()).unwrap();
    assert!(report.outcomes.is_empty());
}

#[test]
fn test_stop_reaches_every_channel_and_is_repeatable() {
    let (channel, _) = RecordingChannel::new("recording");
    let stops = channel.stops.clone();
    let mut dispatcher = Dispatcher::with_channels(vec![Box::new(channel)]);

    dispatcher.stop();
    dispatcher.stop();
    assert_eq!(*stops.lock(), 2);
}

#[test]
fn test_stop_continues_past_panicking_channel() {
    let (channel, _) = RecordingChannel::new("recording");
    let stops = channel.stops.clone();
    let mut dispatcher = Dispatcher::with_channels(vec![Box::new(PanickingChannel), Box::new(channel)]);

    dispatcher.stop();
    assert_eq!(*stops.lock(), 1);
}

// ============================================================================
// REST CHANNEL
// ============================================================================

#[test]
fn test_rest_success_posts_json_body() {
    let (endpoint, server) = serve_once("HTTP/1.1 200 OK");
    let mut channel = RestChannel::new(&rest_settings(&endpoint));
    let body = sample_payload().to_wire().unwrap();

    assert!(channel.publish(&body).is_ok());
    assert_eq!(server.join().unwrap(), body);
}

#[test]
fn test_rest_non_2xx_is_failure() {
    let (endpoint, server) = serve_once("HTTP/1.1 500 Internal Server Error");
    let mut channel = RestChannel::new(&rest_settings(&endpoint));

    let result = channel.publish("{}");
    server.join().unwrap();

    assert!(matches!(result, Err(ChannelError::Status(500))));
    // Still enabled for the next cycle
    assert!(channel.is_enabled());
}

#[test]
fn test_rest_unreachable_is_network_failure() {
    let mut channel = RestChannel::new(&rest_settings("http://127.0.0.1:1/api/results"));
    assert!(matches!(channel.publish("{}"), Err(ChannelError::Network(_))));
    assert!(channel.is_enabled());
}

#[test]
fn test_rest_without_endpoint_is_disabled() {
    let channel = RestChannel::new(&rest_settings("  "));
    assert!(!channel.is_enabled());
}

// ============================================================================
// MQTT CHANNEL
// ============================================================================

#[test]
fn test_mqtt_unreachable_broker_disables_channel() {
    let settings = MqttSettings {
        enabled: true,
        broker: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout_secs: 2,
        ..Default::default()
    };

    let mut channel = MqttChannel::new(&settings);
    assert!(!channel.is_enabled());
    assert_eq!(channel.topic(), "rpi/ai/results");
    assert!(matches!(channel.publish("{}"), Err(ChannelError::Disabled)));

    channel.stop();
    channel.stop();
}

#[test]
fn test_mqtt_connect_reports_error() {
    let settings = MqttSettings {
        enabled: true,
        broker: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout_secs: 2,
        ..Default::default()
    };
    assert!(matches!(MqttChannel::connect(&settings), Err(ChannelError::Connect(_))));
}

#[test]
fn test_mqtt_publishes_then_disconnects() {
    let (port, broker) = fake_broker();
    let settings = MqttSettings {
        enabled: true,
        broker: "127.0.0.1".to_string(),
        port,
        connect_timeout_secs: 5,
        ..Default::default()
    };

    let mut channel = MqttChannel::new(&settings);
    assert!(channel.is_enabled());

    let body = sample_payload().to_wire().unwrap();
    assert!(channel.publish(&body).is_ok());

    let started = Instant::now();
    channel.stop();
    channel.stop();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(!channel.is_enabled());
    assert!(matches!(channel.publish(&body), Err(ChannelError::Disabled)));

    let seen = broker.join().unwrap();
    assert!(seen.windows(body.len()).any(|w| w == body.as_bytes()));
    assert!(seen.windows(2).any(|w| w == [0xE0, 0x00]));
}
