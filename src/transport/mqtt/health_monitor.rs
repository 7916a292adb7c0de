//! Pure connection state tracking for the shared publisher connection

use super::connection::ConnectionState;
use tracing::{info, warn};

/// Pure state transition and health logic
pub struct HealthMonitor;

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network or protocol error from the event loop
    NetworkError(String),
    /// Local shutdown requested
    ShutdownRequested,
}

impl HealthMonitor {
    /// Determine next state after connection event (pure function)
    ///
    /// `Closed` is absorbing. Losing the connection from any live state moves
    /// to `Reconnecting`, counting consecutive attempts until the next ConnAck.
    pub fn determine_next_state(
        current: &ConnectionState,
        event: &ConnectionEvent,
    ) -> ConnectionState {
        match (current, event) {
            (ConnectionState::Closed, _) => ConnectionState::Closed,
            (_, ConnectionEvent::ShutdownRequested) => ConnectionState::Closed,
            (_, ConnectionEvent::ConnAckReceived) => ConnectionState::Connected,
            (ConnectionState::Reconnecting(attempt), _) => {
                ConnectionState::Reconnecting(attempt.saturating_add(1))
            }
            (_, ConnectionEvent::DisconnectedByBroker | ConnectionEvent::NetworkError(_)) => {
                ConnectionState::Reconnecting(1)
            }
        }
    }

    /// Check if connection state counts as healthy (pure function)
    pub fn is_healthy(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!(event = "connect", "MQTT connection established");
            }
            (ConnectionState::Reconnecting(_), ConnectionState::Connected) => {
                info!(event = "connect", "MQTT reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting(_)) => {
                warn!(event = "offline", "MQTT connection lost");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(event = "reconnect", attempt, "MQTT reconnecting");
            }
            (_, ConnectionState::Closed) => {
                info!(event = "close", "MQTT connection closed");
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connack_connects_from_any_live_state() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting(4),
        ] {
            assert_eq!(
                HealthMonitor::determine_next_state(&state, &ConnectionEvent::ConnAckReceived),
                ConnectionState::Connected
            );
        }
    }

    #[test]
    fn test_errors_move_to_reconnecting_and_count_attempts() {
        let state = HealthMonitor::determine_next_state(
            &ConnectionState::Connected,
            &ConnectionEvent::NetworkError("connection refused".to_string()),
        );
        assert_eq!(state, ConnectionState::Reconnecting(1));

        let state = HealthMonitor::determine_next_state(
            &state,
            &ConnectionEvent::NetworkError("connection refused".to_string()),
        );
        assert_eq!(state, ConnectionState::Reconnecting(2));

        let state =
            HealthMonitor::determine_next_state(&state, &ConnectionEvent::ConnAckReceived);
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn test_broker_disconnect_moves_to_reconnecting() {
        assert_eq!(
            HealthMonitor::determine_next_state(
                &ConnectionState::Connected,
                &ConnectionEvent::DisconnectedByBroker
            ),
            ConnectionState::Reconnecting(1)
        );
    }

    #[test]
    fn test_closed_is_terminal() {
        let events = vec![
            ConnectionEvent::ConnAckReceived,
            ConnectionEvent::DisconnectedByBroker,
            ConnectionEvent::NetworkError("late".to_string()),
            ConnectionEvent::ShutdownRequested,
        ];

        for event in events {
            assert_eq!(
                HealthMonitor::determine_next_state(&ConnectionState::Closed, &event),
                ConnectionState::Closed
            );
        }
    }

    #[test]
    fn test_shutdown_closes_from_any_state() {
        assert_eq!(
            HealthMonitor::determine_next_state(
                &ConnectionState::Connecting,
                &ConnectionEvent::ShutdownRequested
            ),
            ConnectionState::Closed
        );
        assert_eq!(
            HealthMonitor::determine_next_state(
                &ConnectionState::Reconnecting(2),
                &ConnectionEvent::ShutdownRequested
            ),
            ConnectionState::Closed
        );
    }

    #[test]
    fn test_only_connected_is_healthy() {
        assert!(HealthMonitor::is_healthy(&ConnectionState::Connected));
        assert!(!HealthMonitor::is_healthy(&ConnectionState::Connecting));
        assert!(!HealthMonitor::is_healthy(&ConnectionState::Reconnecting(1)));
        assert!(!HealthMonitor::is_healthy(&ConnectionState::Closed));
    }
}
