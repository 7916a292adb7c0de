//! Impure I/O operations for the MQTT transport
//!
//! [`MqttClient`] owns the long-lived publisher connection shared by every
//! publish and keep-alive request, and opens dedicated per-request
//! connections for the subscribe bridge.

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, DISCONNECT_GRACE, RECONNECT_PERIOD,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor};
use super::message_handler::{EventRoute, MessageHandler};
use super::subscriber;
use crate::config::MqttSection;
use crate::transport::{Subscription, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Outstanding requests the publisher connection buffers before publishes
/// start failing fast
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// MQTT transport backed by rumqttc
pub struct MqttClient {
    config: MqttSection,
    client: AsyncClient,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MqttClient {
    /// Open the shared publisher connection
    ///
    /// Returns immediately; the connection is established in the background
    /// and its lifecycle is only logged. Must be called within a tokio runtime.
    pub fn connect(config: MqttSection) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(&config)?;
        let client_id = mqtt_options.client_id();
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            host = %config.host,
            port = config.port,
            %client_id,
            "Connecting shared MQTT publisher"
        );

        let span = crate::mqtt_span!(role = "publisher", %client_id);
        let handle =
            tokio::spawn(run_publisher_loop(event_loop, state_tx, shutdown_rx).instrument(span));

        Ok(Self {
            config,
            client,
            state_rx,
            shutdown_tx,
            event_loop_handle: Mutex::new(Some(handle)),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get current connection state of the publisher connection
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch publisher connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Queue a publish on the shared connection without waiting for the
    /// broker. Fails only when the request cannot be queued.
    pub fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic, "Queued publish on shared connection");
        Ok(())
    }

    /// Open a dedicated connection subscribed to `topic`
    pub fn open_subscription(&self, topic: &str) -> Result<Subscription, MqttError> {
        subscriber::open_subscription(&self.config, topic, self.active_subscriptions.clone())
    }

    /// Number of subscribe bridges currently holding a connection
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Disconnect the publisher connection and wait for its event loop
    pub async fn shutdown(&self) -> Result<(), MqttError> {
        let disconnect = self
            .client
            .try_disconnect()
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)));

        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(DISCONNECT_GRACE * 2, handle).await {
                Ok(Ok(())) => info!("Publisher event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Publisher event loop ended with error: {}", e)
                }
                Err(_) => warn!("Publisher event loop didn't shut down gracefully, forcing abort"),
                _ => {}
            }
        }

        disconnect
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        MqttClient::publish(self, topic, payload)
    }

    fn open_subscription(&self, topic: &str) -> Result<Subscription, MqttError> {
        MqttClient::open_subscription(self, topic)
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }

    fn active_subscriptions(&self) -> usize {
        MqttClient::active_subscriptions(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        // Async disconnect is not possible here; shutdown() is the graceful path
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

/// Drive the publisher event loop, logging every lifecycle event
async fn run_publisher_loop(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping publisher event loop");
                    flush_disconnect(&mut event_loop).await;
                    apply_event(&state_tx, ConnectionEvent::ShutdownRequested);
                    break;
                }
            }

            event_result = event_loop.poll() => {
                match event_result {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        log_route(&route);
                        match route {
                            EventRoute::ConnectionAcknowledged => {
                                apply_event(&state_tx, ConnectionEvent::ConnAckReceived);
                            }
                            EventRoute::Disconnected => {
                                apply_event(&state_tx, ConnectionEvent::DisconnectedByBroker);
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        error!(event = "error", "MQTT publisher connection error: {}", e);
                        apply_event(&state_tx, ConnectionEvent::NetworkError(e.to_string()));

                        let keep_going = tokio::select! {
                            changed = shutdown_rx.changed() => {
                                changed.is_ok() && !*shutdown_rx.borrow()
                            }
                            _ = tokio::time::sleep(RECONNECT_PERIOD) => true,
                        };
                        if !keep_going {
                            apply_event(&state_tx, ConnectionEvent::ShutdownRequested);
                            break;
                        }
                    }
                }
            }
        }
    }
    info!(event = "end", "MQTT publisher event loop stopped");
}

fn apply_event(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
    state_tx.send_if_modified(|current| {
        let next = HealthMonitor::determine_next_state(current, &event);
        if next == *current {
            return false;
        }
        HealthMonitor::log_state_transition(current, &next);
        *current = next;
        true
    });
}

fn log_route(route: &EventRoute) {
    match route {
        EventRoute::MessageReceived { topic, payload } => {
            info!(
                event = "message",
                topic = %topic,
                bytes = payload.len(),
                "Message on publisher connection"
            );
        }
        EventRoute::Disconnected => warn!(event = "disconnect", "Broker sent DISCONNECT"),
        EventRoute::PacketReceived(packet) => debug!(event = "packetreceive", packet = %packet),
        EventRoute::PacketSent(packet) => debug!(event = "packetsend", packet = %packet),
        EventRoute::ConnectionAcknowledged
        | EventRoute::SubscriptionConfirmed { .. }
        | EventRoute::DisconnectSent => debug!(event = route.event_name()),
    }
}

/// Let an already-queued DISCONNECT reach the broker before stopping
async fn flush_disconnect(event_loop: &mut EventLoop) {
    let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
        while let Ok(event) = event_loop.poll().await {
            if MessageHandler::route_mqtt_event(&event) == EventRoute::DisconnectSent {
                break;
            }
        }
    })
    .await;
}
