//! Dedicated broker connection backing one subscribe request
//!
//! Each call to [`open_subscription`] creates a fresh rumqttc client and event
//! loop, subscribes to the requested topic on every ConnAck, and pushes
//! matching payloads into the returned [`Subscription`]. Closing or dropping
//! the subscription disconnects and stops the event loop task.

use super::connection::{configure_mqtt_options, MqttError, DISCONNECT_GRACE, RECONNECT_PERIOD};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::transport::subscription::{
    Delivery, Subscription, SubscriptionCloser, SubscriptionSink,
};
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Open a dedicated connection subscribed to `topic`
///
/// `active` counts live subscriptions; it is incremented here and decremented
/// when the subscription closes.
pub fn open_subscription(
    config: &MqttSection,
    topic: &str,
    active: Arc<AtomicUsize>,
) -> Result<Subscription, MqttError> {
    let mqtt_options = configure_mqtt_options(config)?;
    let client_id = mqtt_options.client_id();
    let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let closer = MqttSubscriptionCloser {
        client: client.clone(),
        shutdown_tx,
        active: active.clone(),
    };
    let (subscription, sink) = Subscription::new(topic, Box::new(closer));
    active.fetch_add(1, Ordering::SeqCst);
    sink.mark_connecting();

    let span = crate::mqtt_span!(role = "subscription", %client_id, topic = %topic);
    tokio::spawn(run_subscription_loop(client, event_loop, sink, shutdown_rx).instrument(span));

    Ok(subscription)
}

struct MqttSubscriptionCloser {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
}

impl SubscriptionCloser for MqttSubscriptionCloser {
    fn close(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        let _ = self.shutdown_tx.send(true);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_subscription_loop(
    client: AsyncClient,
    mut event_loop: EventLoop,
    sink: SubscriptionSink,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Opening per-request MQTT connection");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    drain_until_disconnected(&mut event_loop).await;
                    break;
                }
            }

            event_result = event_loop.poll() => {
                match event_result {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        handle_route(route, &client, &sink);
                    }
                    Err(e) => {
                        warn!(event = "error", "Per-request MQTT connection error: {}", e);
                        if !wait_before_reconnect(&mut shutdown_rx).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    info!(event = "end", "Per-request MQTT connection closed");
}

fn handle_route(route: EventRoute, client: &AsyncClient, sink: &SubscriptionSink) {
    match route {
        EventRoute::ConnectionAcknowledged => {
            // Subscribe on every ConnAck: clean-start reconnects lose the session
            match client.try_subscribe(sink.topic(), QoS::AtMostOnce) {
                Ok(()) => {
                    sink.mark_subscribed();
                    debug!(event = "connect", "Subscribed to {}", sink.topic());
                }
                Err(e) => warn!("Failed to subscribe to {}: {}", sink.topic(), e),
            }
        }
        EventRoute::MessageReceived { topic, payload } => {
            if sink.deliver(&topic, payload) == Delivery::ReceiverGone {
                debug!("Response stream gone, waiting for shutdown signal");
            }
        }
        other => {
            tracing::trace!(target: "mqtt_transport", event = other.event_name(), "{:?}", other);
        }
    }
}

/// Keep polling until our DISCONNECT has been written or the grace period
/// runs out
async fn drain_until_disconnected(event_loop: &mut EventLoop) {
    let drained = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match event_loop.poll().await {
                Ok(event) => {
                    if MessageHandler::route_mqtt_event(&event) == EventRoute::DisconnectSent {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("Disconnect not flushed within grace period, dropping connection");
    }
}

/// Sleep for the reconnect period unless shutdown arrives first
/// Returns true if the loop should keep going
async fn wait_before_reconnect(shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(RECONNECT_PERIOD) => true,
    }
}
