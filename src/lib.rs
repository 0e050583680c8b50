//! Thermal MQTT device client.
//!
//! Simulates a multi-zone thermal camera as a ThingsBoard-style IoT device:
//! a resilient MQTT connection publishes periodic sensor telemetry while a
//! remotely controllable registry of virtual measurement spots is driven
//! through server-side RPC.
//!
//! Subsystems, leaf-first:
//! - [`thermal`] - temperature sources, spot model, registry and persistence
//! - [`rpc`] - request parsing, validation, dispatch and response encoding
//! - [`connection`] - broker connection lifecycle with backoff reconnection
//! - [`device`] - ThingsBoard topic conventions tying the layers together
//! - [`config`] - TOML configuration for all of the above

pub mod config;
pub mod connection;
pub mod device;
pub mod rpc;
pub mod thermal;
