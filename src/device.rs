//! ThingsBoard device glue.
//!
//! Binds the generic connection layer to the ThingsBoard MQTT conventions:
//! telemetry publishing, the RPC request subscription and correlated RPC
//! responses. The RPC worker consumes [`ConnectionEvent`]s and hands finished
//! responses to a dedicated sender task over a channel, so the transport's
//! event delivery is never blocked by publishing.

use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::rpc::{parse_command, RpcHandler};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Topic all telemetry is published on.
pub const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
/// Subscription pattern for inbound RPC requests.
pub const RPC_REQUEST_FILTER: &str = "v1/devices/me/rpc/request/+";
const RPC_REQUEST_PREFIX: &str = "v1/devices/me/rpc/request/";
const RPC_RESPONSE_PREFIX: &str = "v1/devices/me/rpc/response/";

/// Valid temperature range in °C; readings outside are never transmitted.
pub const TEMPERATURE_MIN: f64 = -100.0;
pub const TEMPERATURE_MAX: f64 = 500.0;

/// Response topic for the given correlation id.
pub fn rpc_response_topic(request_id: &str) -> String {
    format!("{RPC_RESPONSE_PREFIX}{request_id}")
}

/// Correlation id from an RPC request topic, `None` for foreign topics.
pub fn extract_request_id(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(RPC_REQUEST_PREFIX)
        .filter(|id| !id.is_empty())
}

pub fn validate_temperature(temperature: f64) -> bool {
    temperature.is_finite()
        && (TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature)
}

fn telemetry_payload(spot_id: i32, temperature: f64) -> String {
    let mut values = serde_json::Map::new();
    values.insert(format!("temperature_spot_{spot_id}"), json!(temperature));
    serde_json::Value::Object(values).to_string()
}

fn telemetry_payload_at(spot_id: i32, temperature: f64, timestamp_ms: i64) -> String {
    let mut values = serde_json::Map::new();
    values.insert(format!("temperature_spot_{spot_id}"), json!(temperature));
    json!({ "ts": timestamp_ms, "values": values }).to_string()
}

/// One ThingsBoard device identity on top of the connection manager.
pub struct ThingsBoardDevice {
    connection: Arc<ConnectionManager>,
    qos: u8,
}

impl ThingsBoardDevice {
    pub fn new(connection: Arc<ConnectionManager>, qos: u8) -> Self {
        ThingsBoardDevice { connection, qos }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Publishes one telemetry reading for a spot.
    ///
    /// Readings outside the valid temperature range are skipped before any
    /// transport call.
    pub async fn send_telemetry(&self, spot_id: i32, temperature: f64) -> bool {
        if !validate_temperature(temperature) {
            warn!(
                "Invalid temperature reading {}°C from spot {} (outside {}°C to {}°C range), skipping",
                temperature, spot_id, TEMPERATURE_MIN, TEMPERATURE_MAX
            );
            return false;
        }

        let payload = telemetry_payload(spot_id, temperature);
        debug!("Sending telemetry to {}: {}", TELEMETRY_TOPIC, payload);
        self.connection
            .publish(TELEMETRY_TOPIC, payload.as_bytes(), self.qos, false)
            .await
    }

    /// Publishes one telemetry reading with an explicit timestamp.
    pub async fn send_telemetry_at(
        &self,
        spot_id: i32,
        temperature: f64,
        timestamp_ms: i64,
    ) -> bool {
        if !validate_temperature(temperature) {
            warn!(
                "Invalid temperature reading {}°C from spot {} (outside {}°C to {}°C range), skipping",
                temperature, spot_id, TEMPERATURE_MIN, TEMPERATURE_MAX
            );
            return false;
        }

        let payload = telemetry_payload_at(spot_id, temperature, timestamp_ms);
        debug!("Sending timestamped telemetry to {}: {}", TELEMETRY_TOPIC, payload);
        self.connection
            .publish(TELEMETRY_TOPIC, payload.as_bytes(), self.qos, false)
            .await
    }

    /// Publishes an RPC response on the correlated response topic.
    pub async fn send_rpc_response(&self, request_id: &str, response: &str) -> bool {
        let topic = rpc_response_topic(request_id);
        debug!("Sending RPC response to {}", topic);
        self.connection
            .publish(&topic, response.as_bytes(), self.qos, false)
            .await
    }
}

/// Spawns the RPC worker loop.
///
/// The worker reacts to connection events: it (re)subscribes to the RPC
/// request pattern after every successful connect, parses and dispatches
/// inbound requests, and forwards responses to a sender task. The loop ends
/// when the event channel closes or the connection reports a terminal
/// failure.
pub fn spawn_rpc_worker(
    device: Arc<ThingsBoardDevice>,
    handler: RpcHandler,
    mut events: mpsc::Receiver<ConnectionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (response_tx, mut response_rx) = mpsc::channel::<(String, String)>(32);

        let sender_device = device.clone();
        let sender = tokio::spawn(async move {
            while let Some((request_id, response)) = response_rx.recv().await {
                if !sender_device.send_rpc_response(&request_id, &response).await {
                    error!("Failed to send RPC response for request {}", request_id);
                }
            }
        });

        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Connected => {
                    info!("Subscribing to RPC topic: {}", RPC_REQUEST_FILTER);
                    if !device.connection().subscribe(RPC_REQUEST_FILTER, 1).await {
                        error!("Failed to queue RPC subscription request");
                    }
                }
                ConnectionEvent::Message { topic, payload } => {
                    let Some(request_id) = extract_request_id(&topic) else {
                        debug!("Ignoring non-RPC message on topic: {}", topic);
                        continue;
                    };

                    let payload = String::from_utf8_lossy(&payload);
                    info!("Processing RPC command with request ID: {}", request_id);

                    let command = parse_command(request_id, &payload);
                    let response = handler.handle(command).await;
                    let encoded = response.to_json_string();

                    if response_tx
                        .send((request_id.to_string(), encoded))
                        .await
                        .is_err()
                    {
                        error!("RPC response sender is gone, dropping response");
                    }
                }
                ConnectionEvent::ConnectionLost { cause } => {
                    warn!("Connection lost: {} (reconnection in progress)", cause);
                }
                ConnectionEvent::Failed { reason } => {
                    error!("Connection permanently failed: {}", reason);
                    break;
                }
                ConnectionEvent::Disconnected => {
                    info!("Disconnected from broker");
                }
            }
        }

        drop(response_tx);
        let _ = sender.await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_extraction_matches_topic_convention() {
        assert_eq!(
            extract_request_id("v1/devices/me/rpc/request/42"),
            Some("42")
        );
        assert_eq!(extract_request_id("v1/devices/me/rpc/request/"), None);
        assert_eq!(extract_request_id("v1/devices/me/telemetry"), None);
        assert_eq!(extract_request_id("v1/devices/me/rpc/response/42"), None);
    }

    #[test]
    fn response_topic_echoes_correlation_id() {
        assert_eq!(
            rpc_response_topic("abc-123"),
            "v1/devices/me/rpc/response/abc-123"
        );
    }

    #[test]
    fn temperature_gate_covers_the_valid_range() {
        assert!(validate_temperature(-100.0));
        assert!(validate_temperature(0.0));
        assert!(validate_temperature(500.0));
        assert!(!validate_temperature(-100.1));
        assert!(!validate_temperature(500.1));
        assert!(!validate_temperature(f64::NAN));
    }

    #[test]
    fn telemetry_payload_shapes() {
        let plain: serde_json::Value =
            serde_json::from_str(&telemetry_payload(2, 23.5)).unwrap();
        assert_eq!(plain["temperature_spot_2"], 23.5);

        let stamped: serde_json::Value =
            serde_json::from_str(&telemetry_payload_at(2, 23.5, 1700000000000)).unwrap();
        assert_eq!(stamped["ts"], 1700000000000i64);
        assert_eq!(stamped["values"]["temperature_spot_2"], 23.5);
    }
}
