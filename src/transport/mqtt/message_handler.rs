//! Pure message routing for MQTT events
//!
//! This module turns raw rumqttc events into routing decisions and holds the
//! topic matching rule used by the subscribe bridge.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Whether a message received on `topic` belongs to a subscription for
    /// `expected`. Exact string equality: wildcard filters are not expanded.
    pub fn should_forward(topic: &str, expected: &str) -> bool {
        topic == expected
    }

    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::PacketReceived(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(outgoing) => EventRoute::PacketSent(format!("{outgoing:?}")),
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker sent DISCONNECT
    Disconnected,
    /// SubAck received
    SubscriptionConfirmed { packet_id: u16 },
    /// Our DISCONNECT has been written to the network
    DisconnectSent,
    /// Any other inbound packet (PingResp, PubAck, ...)
    PacketReceived(String),
    /// Any other outbound packet
    PacketSent(String),
}

impl EventRoute {
    /// Lifecycle event name reported in logs
    pub fn event_name(&self) -> &'static str {
        match self {
            EventRoute::ConnectionAcknowledged => "connect",
            EventRoute::MessageReceived { .. } => "message",
            EventRoute::Disconnected => "disconnect",
            EventRoute::SubscriptionConfirmed { .. } => "suback",
            EventRoute::DisconnectSent => "end",
            EventRoute::PacketReceived(_) => "packetreceive",
            EventRoute::PacketSent(_) => "packetsend",
        }
    }
}
