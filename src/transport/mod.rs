//! Transport layer between the HTTP bridge and the MQTT broker
//!
//! The HTTP handlers only see the [`Transport`] trait, so they can be driven
//! by the rumqttc-backed [`mqtt::MqttClient`] in production and by
//! [`crate::testing::mocks::MockTransport`] in tests.

use bytes::Bytes;

pub mod mqtt;
pub mod subscription;

pub use mqtt::{ConnectionState, MqttError};
pub use subscription::{Subscription, SubscriptionCloser, SubscriptionSink, SubscriptionState};

/// Broker operations the HTTP bridge depends on
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish `payload` to `topic` on the shared connection (QoS 0, not retained)
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError>;

    /// Open a dedicated subscription to `topic`; the returned handle owns the
    /// connection and closes it when dropped
    fn open_subscription(&self, topic: &str) -> Result<Subscription, MqttError>;

    /// Current state of the shared publisher connection
    fn connection_state(&self) -> ConnectionState;

    /// Number of subscribe bridges currently open
    fn active_subscriptions(&self) -> usize;
}
