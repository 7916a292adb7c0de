//! Environment-driven configuration for the HTTP-to-MQTT bridge
//!
//! Settings are read once at startup and shared read-only afterwards. There is
//! no error path: every missing or unparseable variable falls back to its
//! default.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default MQTT port used when `MQTT_PORT` is empty or not a number
pub const DEFAULT_MQTT_PORT: u16 = 1883;
/// Default HTTP listen port
pub const DEFAULT_HTTP_PORT: u16 = 5000;
/// Default topic and message for the keep-alive endpoint
pub const DEFAULT_KEEP_ALIVE: &str = "keep_alive";

const REDACTED: &str = "***";

/// Process-wide bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Log request bodies
    pub debug: bool,
    /// Shared secret compared against the `key` body field. `None` disables
    /// authorization entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    pub http_port: u16,
    pub mqtt: MqttSection,
    pub keep_alive: KeepAliveSection,
}

/// Broker connection settings shared by every connection the bridge opens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Explicit client id; generated per connection when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Topic and payload published by `GET /keep_alive/`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeepAliveSection {
    pub topic: String,
    pub message: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());

        Self {
            mqtt: MqttSection {
                host: lookup("MQTT_HOST").unwrap_or_default(),
                port: parse_port("MQTT_PORT", non_empty("MQTT_PORT"), DEFAULT_MQTT_PORT),
                username: lookup("MQTT_USER").unwrap_or_default(),
                password: lookup("MQTT_PASS").unwrap_or_default(),
                client_id: non_empty("MQTT_CLIENT_ID"),
            },
            keep_alive: KeepAliveSection {
                topic: non_empty("KEEP_ALIVE_TOPIC").unwrap_or_else(|| DEFAULT_KEEP_ALIVE.into()),
                message: non_empty("KEEP_ALIVE_MESSAGE")
                    .unwrap_or_else(|| DEFAULT_KEEP_ALIVE.into()),
            },
            debug: non_empty("DEBUG_MODE").is_some_and(|v| parse_flag(&v)),
            auth_key: non_empty("AUTH_KEY"),
            http_port: parse_port("HTTP_PORT", non_empty("HTTP_PORT"), DEFAULT_HTTP_PORT),
        }
    }

    /// Whether requests must carry a matching `key` field
    pub fn auth_enabled(&self) -> bool {
        self.auth_key.is_some()
    }

    /// Copy of the settings with secrets masked, suitable for logging
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.mqtt.password.is_empty() {
            copy.mqtt.password = REDACTED.to_string();
        }
        if copy.auth_key.is_some() {
            copy.auth_key = Some(REDACTED.to_string());
        }
        copy
    }
}

fn parse_port(name: &str, raw: Option<String>, default: u16) -> u16 {
    match raw {
        None => default,
        Some(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %value, default, "Invalid port, using default");
            default
        }),
    }
}

/// Any non-empty value enables a flag except `0` and `false`
///
/// Stricter than a plain truthiness check, where `DEBUG_MODE=false` would
/// still enable debug logging.
fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "" | "0" | "false")
}
