//! MQTT HTTP Bridge
//!
//! HTTP endpoints that publish messages to an MQTT broker and stream broker
//! topics back to long-lived HTTP responses.
//!
//! # Overview
//!
//! - [`config`] reads the process environment into immutable [`Settings`]
//! - [`transport`] owns broker connections: one shared publisher and one
//!   dedicated connection per subscribe request
//! - [`server`] is the warp HTTP surface and its request pipeline
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_http_bridge::{server, MqttClient, Settings};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let settings = Arc::new(Settings::from_env());
//! let transport = Arc::new(MqttClient::connect(settings.mqtt.clone())?);
//!
//! server::serve(settings, transport, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod server;
pub mod testing;
pub mod transport;

pub use config::{KeepAliveSection, MqttSection, Settings};
pub use error::{BridgeError, BridgeResult};
pub use transport::mqtt::MqttClient;
pub use transport::{Subscription, Transport};
