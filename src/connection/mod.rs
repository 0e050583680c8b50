//! # Connection Module
//!
//! Owns the single physical MQTT broker connection and its lifecycle. The
//! [`manager::ConnectionManager`] wraps `rumqttc`'s async client and event
//! loop in a state machine with failure classification and exponential
//! backoff reconnection.
//!
//! ## Event Delivery
//!
//! Instead of callback interfaces bound to object lifetimes, everything the
//! transport observes is delivered as one [`ConnectionEvent`] sum type over
//! an mpsc channel. Consumers react to lifecycle transitions and inbound
//! messages from a single receive loop, and the transport's event loop is
//! never blocked by consumer work.

pub mod manager;

pub use manager::{
    ConnectionManager, ConnectionSettings, ConnectionState, ConnectionStats, ReconnectPolicy,
};

/// Everything the transport layer reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Broker accepted the connection; subscriptions can be (re)established.
    Connected,
    /// Transport dropped or a connect attempt failed; reconnection is running.
    ConnectionLost { cause: String },
    /// Terminal failure, no further attempts without external intervention.
    Failed { reason: String },
    /// The connection was shut down deliberately.
    Disconnected,
    /// An inbound message on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
}
