//! Pure connection state management for MQTT connections
//!
//! This module contains pure functions for connection state management and
//! option construction shared by the publisher and per-request connections.

use crate::config::MqttSection;
use rumqttc::v5::MqttOptions;
use std::time::Duration;
use thiserror::Error;

/// Delay between reconnection attempts, matching the underlying client's
/// conventional reconnect period
pub const RECONNECT_PERIOD: Duration = Duration::from_secs(1);

/// Upper bound on how long a closing connection may take to flush DISCONNECT
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT keep-alive interval
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

const CLIENT_ID_PREFIX: &str = "mqtt-http-bridge";

/// Broker host used when `MQTT_HOST` is empty
pub const DEFAULT_BROKER_HOST: &str = "localhost";

/// Connection state for a broker connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// ConnAck received, ready for operations
    Connected,
    /// Connection lost, retrying (attempt count)
    Reconnecting(u32),
    /// Closed on request; terminal
    Closed,
}

impl ConnectionState {
    /// Short lowercase label used in logs and health output
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting(_) => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),
}

/// Generate a client id for connections without an explicit one
pub fn generate_client_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{CLIENT_ID_PREFIX}-{}", &suffix[..8])
}

/// Resolve the client id for a new connection: the configured id when
/// present, a fresh generated id otherwise
pub fn resolve_client_id(config: &MqttSection) -> Result<String, MqttError> {
    match &config.client_id {
        Some(id) if id.is_empty() || id.starts_with(' ') => {
            Err(MqttError::InvalidClientId(id.clone()))
        }
        Some(id) => Ok(id.clone()),
        None => Ok(generate_client_id()),
    }
}

/// Pure function to configure MQTT options from settings
///
/// Every connection the bridge opens goes through here so the shared
/// publisher and the per-request subscribers use identical credentials.
pub fn configure_mqtt_options(config: &MqttSection) -> Result<MqttOptions, MqttError> {
    let client_id = resolve_client_id(config)?;
    let host = if config.host.is_empty() {
        DEFAULT_BROKER_HOST.to_string()
    } else {
        config.host.clone()
    };
    let mut mqtt_options = MqttOptions::new(client_id, host, config.port);

    if !config.username.is_empty() || !config.password.is_empty() {
        mqtt_options.set_credentials(config.username.clone(), config.password.clone());
    }

    mqtt_options.set_keep_alive(KEEP_ALIVE_INTERVAL);
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mqtt_config() -> MqttSection {
        MqttSection {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: None,
        }
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert!(a.starts_with("mqtt-http-bridge-"));
        assert_eq!(a.len(), "mqtt-http-bridge-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_configured_client_id_is_used_verbatim() {
        let mut config = test_mqtt_config();
        config.client_id = Some("bridge-1".to_string());
        assert_eq!(resolve_client_id(&config).unwrap(), "bridge-1");

        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(options.client_id(), "bridge-1");
    }

    #[test]
    fn test_client_id_generated_when_not_configured() {
        let options = configure_mqtt_options(&test_mqtt_config()).unwrap();
        assert!(options.client_id().starts_with("mqtt-http-bridge-"));
    }

    #[test]
    fn test_invalid_client_id_rejected() {
        let mut config = test_mqtt_config();
        config.client_id = Some(" leading-space".to_string());
        assert!(matches!(
            configure_mqtt_options(&config),
            Err(MqttError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_options_carry_host_and_port() {
        let mut config = test_mqtt_config();
        config.host = "broker.local".to_string();
        config.port = 1884;
        config.username = "bridge".to_string();
        config.password = "secret".to_string();

        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), KEEP_ALIVE_INTERVAL);

        // Unset host falls back to localhost on the configured port
        config.host = String::new();
        let options = configure_mqtt_options(&config).unwrap();
        assert_eq!(
            options.broker_address(),
            (DEFAULT_BROKER_HOST.to_string(), 1884)
        );
    }

    #[test]
    fn test_connection_state_labels() {
        assert_eq!(ConnectionState::Connecting.label(), "connecting");
        assert_eq!(ConnectionState::Connected.label(), "connected");
        assert_eq!(ConnectionState::Reconnecting(3).label(), "reconnecting");
        assert_eq!(ConnectionState::Closed.label(), "closed");
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::DisconnectFailed("test".to_string().into()),
            MqttError::InvalidClientId(String::new()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
