//! Broker connection lifecycle management.
//!
//! The manager owns one `rumqttc` client at a time. `connect` is
//! non-blocking: it spawns a driver task that polls the event loop, applies
//! the state machine below and forwards everything observable as
//! [`ConnectionEvent`]s.
//!
//! ```text
//! Disconnected ─connect()─▶ Connecting ─ack─▶ Connected
//!      ▲                        │  auth rejected        │ transport drop
//!      │                        ▼                       ▼
//!      │                     Failed ◀─budget/disabled─ Reconnecting ─┐
//!      └──── disconnect() ──────────────────────────────▲────────────┘
//!                                                  backoff, retry
//! ```
//!
//! Authentication rejections are non-retriable and land in `Failed`
//! immediately; every other connect or transport failure drives the backoff
//! path while auto-reconnect is enabled.

use super::ConnectionEvent;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Counters and timestamps for one client instance.
///
/// Mutated only by the manager and its driver task; reset happens solely via
/// [`ConnectionManager::reset_stats`], never on an ordinary reconnect.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    pub connect_attempts: u32,
    pub reconnect_attempts: u32,
    pub messages_sent: u64,
    pub connection_failures: u32,
    pub errors: u32,
    pub last_error: Option<String>,
    pub last_connect: Option<chrono::DateTime<chrono::Local>>,
    pub last_message: Option<chrono::DateTime<chrono::Local>>,
}

/// Exponential backoff settings for the reconnection path.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 means unlimited retries.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            enabled: true,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt:
    /// `min(initial · 2^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Whether the given 1-based attempt still fits the budget.
    pub fn attempt_allowed(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }
}

/// Broker endpoint identification.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

struct ActiveLink {
    client: AsyncClient,
    driver: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    policy: ReconnectPolicy,
    events: mpsc::Sender<ConnectionEvent>,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<RwLock<ConnectionStats>>,
    link: Mutex<Option<ActiveLink>>,
}

impl ConnectionManager {
    pub fn new(
        settings: ConnectionSettings,
        policy: ReconnectPolicy,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        ConnectionManager {
            settings,
            policy,
            events,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            stats: Arc::new(RwLock::new(ConnectionStats::default())),
            link: Mutex::new(None),
        }
    }

    /// Initiates a broker connection and returns immediately.
    ///
    /// Success or failure arrives asynchronously as [`ConnectionEvent`]s.
    /// Calling while already connected is a no-op returning `true`.
    pub async fn connect(
        &self,
        username: &str,
        password: &str,
        keep_alive_seconds: u64,
        clean_session: bool,
    ) -> bool {
        let mut link = self.link.lock().await;

        if *self.state.read().await == ConnectionState::Connected {
            debug!("Already connected to MQTT broker");
            return true;
        }
        if let Some(stale) = link.take() {
            // A previous driver may still be winding down after a failure.
            stale.driver.abort();
        }

        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options
            .set_keep_alive(Duration::from_secs(keep_alive_seconds))
            .set_clean_session(clean_session);
        if !username.is_empty() {
            options.set_credentials(username, password);
        }

        info!(
            "Connecting to MQTT broker: {}:{} (client: {})",
            self.settings.host, self.settings.port, self.settings.client_id
        );

        {
            let mut stats = self.stats.write().await;
            stats.connect_attempts += 1;
        }
        *self.state.write().await = ConnectionState::Connecting;

        let (client, eventloop) = AsyncClient::new(options, 100);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let driver = tokio::spawn(drive(
            eventloop,
            self.state.clone(),
            self.stats.clone(),
            self.events.clone(),
            self.policy.clone(),
            shutdown_rx,
        ));

        *link = Some(ActiveLink {
            client,
            driver,
            shutdown: shutdown_tx,
        });
        true
    }

    /// Shuts the connection down, waiting up to `timeout_ms` for the driver
    /// to wind down gracefully. The state is `Disconnected` afterwards even
    /// when the timeout struck.
    pub async fn disconnect(&self, timeout_ms: u64) -> bool {
        let Some(active) = self.link.lock().await.take() else {
            *self.state.write().await = ConnectionState::Disconnected;
            return true;
        };

        info!("Disconnecting from MQTT broker");
        let _ = active.client.disconnect().await;
        let _ = active.shutdown.send(true);

        let graceful =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), active.driver).await {
                Ok(_) => true,
                Err(_) => {
                    warn!("Disconnect timeout, forcing disconnection");
                    false
                }
            };

        *self.state.write().await = ConnectionState::Disconnected;
        graceful
    }

    /// Publishes a message, failing immediately when not connected.
    pub async fn publish(&self, topic: &str, payload: &[u8], qos: u8, retained: bool) -> bool {
        let link = self.link.lock().await;

        let connected = *self.state.read().await == ConnectionState::Connected;
        let Some(active) = link.as_ref().filter(|_| connected) else {
            warn!("Cannot publish to '{}': not connected to MQTT broker", topic);
            self.stats.write().await.errors += 1;
            return false;
        };

        match active
            .client
            .publish(topic, qos_level(qos), retained, payload)
            .await
        {
            Ok(()) => {
                let mut stats = self.stats.write().await;
                stats.messages_sent += 1;
                stats.last_message = Some(chrono::Local::now());
                true
            }
            Err(e) => {
                error!("Failed to publish to topic '{}': {}", topic, e);
                self.stats.write().await.errors += 1;
                false
            }
        }
    }

    /// Queues a subscription request on the active connection.
    pub async fn subscribe(&self, topic: &str, qos: u8) -> bool {
        let link = self.link.lock().await;

        let Some(active) = link.as_ref() else {
            warn!("Cannot subscribe to '{}': no active connection", topic);
            return false;
        };

        match active.client.subscribe(topic, qos_level(qos)).await {
            Ok(()) => {
                debug!("Queued subscription for topic '{}'", topic);
                true
            }
            Err(e) => {
                error!("Failed to subscribe to topic '{}': {}", topic, e);
                self.stats.write().await.errors += 1;
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.stats.read().await.clone()
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = ConnectionStats::default();
    }
}

/// Event-loop driver: polls the transport, applies the state machine and
/// realizes reconnect delays without blocking anything but itself.
async fn drive(
    mut eventloop: EventLoop,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<RwLock<ConnectionStats>>,
    events: mpsc::Sender<ConnectionEvent>,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            polled = eventloop.poll() => polled,
        };

        match polled {
            // rumqttc surfaces refused CONNACKs as errors, so an ack here is
            // always a successful (re)connect.
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Successfully connected to MQTT broker");
                *state.write().await = ConnectionState::Connected;
                {
                    let mut stats = stats.write().await;
                    stats.last_connect = Some(chrono::Local::now());
                    stats.reconnect_attempts = 0;
                }
                let _ = events.send(ConnectionEvent::Connected).await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = events
                    .send(ConnectionEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    })
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                let cause = e.to_string();
                {
                    let mut stats = stats.write().await;
                    stats.connection_failures += 1;
                    stats.last_error = Some(cause.clone());
                }

                if is_auth_failure(&e) {
                    error!("MQTT authentication rejected: {}", cause);
                    *state.write().await = ConnectionState::Failed;
                    let _ = events.send(ConnectionEvent::Failed { reason: cause }).await;
                    return;
                }

                if !policy.enabled {
                    error!("MQTT connection failed and auto-reconnect is disabled: {}", cause);
                    *state.write().await = ConnectionState::Failed;
                    let _ = events.send(ConnectionEvent::Failed { reason: cause }).await;
                    return;
                }

                let attempt = {
                    let mut stats = stats.write().await;
                    stats.reconnect_attempts += 1;
                    stats.reconnect_attempts
                };

                if !policy.attempt_allowed(attempt) {
                    error!(
                        "MQTT reconnect attempt budget ({}) exhausted",
                        policy.max_attempts
                    );
                    *state.write().await = ConnectionState::Failed;
                    let _ = events
                        .send(ConnectionEvent::Failed {
                            reason: format!("reconnect attempts exhausted: {cause}"),
                        })
                        .await;
                    return;
                }

                *state.write().await = ConnectionState::Reconnecting;
                let _ = events
                    .send(ConnectionEvent::ConnectionLost {
                        cause: cause.clone(),
                    })
                    .await;

                let delay = policy.delay_for(attempt);
                warn!(
                    "MQTT connection lost ({}), reconnect attempt {} in {:?}",
                    cause, attempt, delay
                );

                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    *state.write().await = ConnectionState::Disconnected;
    let _ = events.send(ConnectionEvent::Disconnected).await;
}

/// Authentication and authorization rejections are terminal.
fn is_auth_failure(error: &ConnectionError) -> bool {
    matches!(
        error,
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
        )
    )
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            initial_delay_ms: initial,
            max_delay_ms: max,
            max_attempts: 0,
        }
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = policy(1000, 30000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(6), Duration::from_millis(30000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(30000));
    }

    #[test]
    fn backoff_sequence_is_non_decreasing_and_bounded() {
        let policy = policy(250, 8000);
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(8000));
            previous = delay;
        }
    }

    #[test]
    fn zero_max_attempts_means_unlimited() {
        let unlimited = ReconnectPolicy::default();
        assert!(unlimited.attempt_allowed(1));
        assert!(unlimited.attempt_allowed(10_000));

        let bounded = ReconnectPolicy {
            max_attempts: 3,
            ..ReconnectPolicy::default()
        };
        assert!(bounded.attempt_allowed(3));
        assert!(!bounded.attempt_allowed(4));
    }

    #[test]
    fn qos_levels_map_to_transport_values() {
        assert_eq!(qos_level(0), QoS::AtMostOnce);
        assert_eq!(qos_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_level(2), QoS::ExactlyOnce);
    }

    fn manager() -> (ConnectionManager, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let settings = ConnectionSettings {
            host: "localhost".into(),
            port: 1883,
            client_id: "test-device".into(),
        };
        (
            ConnectionManager::new(settings, ReconnectPolicy::default(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn fresh_manager_is_disconnected() {
        let (manager, _rx) = manager();
        assert!(!manager.is_connected().await);
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn publish_while_disconnected_fails_without_transport_call() {
        let (manager, _rx) = manager();

        assert!(!manager.publish("v1/devices/me/telemetry", b"{}", 1, false).await);

        let stats = manager.stats().await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.messages_sent, 0);
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_clean_no_op() {
        let (manager, _rx) = manager();
        assert!(manager.disconnect(100).await);
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stats_reset_clears_counters() {
        let (manager, _rx) = manager();
        manager.publish("t", b"x", 0, false).await;
        assert_eq!(manager.stats().await.errors, 1);

        manager.reset_stats().await;
        assert_eq!(manager.stats().await.errors, 0);
    }
}
