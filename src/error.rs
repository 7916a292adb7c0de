//! Error types for the HTTP surface of the bridge
//!
//! `BridgeError` is returned by the request pipeline and doubles as a warp
//! rejection so handlers can short-circuit with `?`. Broker-level failures use
//! [`MqttError`](crate::transport::mqtt::MqttError) and never reach HTTP
//! callers except through [`BridgeError::Transport`] on the subscribe path.

use crate::transport::mqtt::MqttError;
use thiserror::Error;
use warp::http::StatusCode;

/// Main error type for bridge request handling
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unauthorized")]
    Unauthorized,

    /// Carries the exact response text, which differs between endpoints
    #[error("{0}")]
    TopicNotSpecified(&'static str),

    #[error("Upload failed: {message}")]
    Upload { message: String },

    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    #[error("Payload too large: JSON body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),
}

impl BridgeError {
    /// Create upload error
    pub fn upload<S: Into<String>>(message: S) -> Self {
        Self::Upload {
            message: message.into(),
        }
    }

    /// Create invalid body error
    pub fn invalid_body<S: Into<String>>(message: S) -> Self {
        Self::InvalidBody {
            message: message.into(),
        }
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            BridgeError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            BridgeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BridgeError::TopicNotSpecified(_)
            | BridgeError::Upload { .. }
            | BridgeError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl warp::reject::Reject for BridgeError {}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
