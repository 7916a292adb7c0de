//! MQTT implementation of the bridge transport
//!
//! The module separates pure functions from I/O operations:
//!
//! - [`connection`] - Connection options, client ids and state types
//! - [`message_handler`] - Event routing and topic matching
//! - [`health_monitor`] - Publisher connection state transitions
//! - [`client`] - Shared publisher connection
//! - [`subscriber`] - Per-request subscription connections
//!
//! # Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use mqtt_http_bridge::config::MqttSection;
//! use mqtt_http_bridge::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     host: "localhost".to_string(),
//!     port: 1883,
//!     username: String::new(),
//!     password: String::new(),
//!     client_id: None,
//! };
//!
//! let client = MqttClient::connect(config)?;
//! client.publish("sensors/1", Bytes::from("21.5"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod subscriber;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError};
pub use health_monitor::{ConnectionEvent, HealthMonitor};
pub use message_handler::{EventRoute, MessageHandler};
