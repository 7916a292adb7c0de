//! Bounded-lifetime subscription feeding one HTTP response stream
//!
//! A [`Subscription`] is the consumer half: it yields matching payloads and
//! owns the connection behind them through a [`SubscriptionCloser`]. The
//! producer half, [`SubscriptionSink`], is driven by whatever connection
//! delivers broker events. Dropping the subscription closes the connection,
//! so every termination path of the HTTP response tears it down exactly once.

use crate::transport::mqtt::MessageHandler;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Lifecycle of a subscribe bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, no connection yet
    Idle,
    /// Dedicated connection opened, waiting for ConnAck
    Connecting,
    /// SUBSCRIBE issued for the requested topic
    Subscribed,
    /// At least one message forwarded
    Streaming,
    /// Connection torn down; terminal
    Closed,
}

/// Events driving [`SubscriptionState`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    ConnectionOpened,
    Connected,
    MessageForwarded,
    Closed,
}

impl SubscriptionState {
    /// Next state after `event` (pure function). `Closed` is absorbing.
    pub fn next(self, event: SubscriptionEvent) -> Self {
        use SubscriptionEvent as E;
        use SubscriptionState as S;

        match (self, event) {
            (S::Closed, _) | (_, E::Closed) => S::Closed,
            (S::Idle, E::ConnectionOpened) => S::Connecting,
            (S::Connecting, E::Connected) => S::Subscribed,
            (S::Subscribed | S::Streaming, E::MessageForwarded) => S::Streaming,
            (state, _) => state,
        }
    }

    pub fn is_closed(self) -> bool {
        self == SubscriptionState::Closed
    }
}

/// Releases the connection behind a subscription
pub trait SubscriptionCloser: Send + 'static {
    /// Tear down the connection. Called at most once.
    fn close(&mut self);
}

/// Outcome of offering a message to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Forwarded,
    /// Topic did not match the subscription
    Ignored,
    /// The subscription has been dropped or closed
    ReceiverGone,
}

/// Producer half of a subscription
#[derive(Debug)]
pub struct SubscriptionSink {
    topic: String,
    tx: mpsc::UnboundedSender<Bytes>,
    state: Arc<watch::Sender<SubscriptionState>>,
}

impl SubscriptionSink {
    /// Requested topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Record that the dedicated connection has been opened
    pub fn mark_connecting(&self) {
        transition(&self.state, SubscriptionEvent::ConnectionOpened);
    }

    /// Record that the connection is up and the topic subscribed
    pub fn mark_subscribed(&self) {
        transition(&self.state, SubscriptionEvent::Connected);
    }

    /// Forward `payload` if `topic` matches the subscription exactly
    pub fn deliver(&self, topic: &str, payload: Bytes) -> Delivery {
        if !MessageHandler::should_forward(topic, &self.topic) {
            debug!(topic, expected = %self.topic, "Dropping message on non-matching topic");
            return Delivery::Ignored;
        }

        if self.tx.send(payload).is_err() {
            return Delivery::ReceiverGone;
        }

        transition(&self.state, SubscriptionEvent::MessageForwarded);
        Delivery::Forwarded
    }

    /// Whether the consumer half is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.state.borrow().is_closed()
    }
}

/// Consumer half of a subscription; a stream of raw payloads
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<watch::Sender<SubscriptionState>>,
    closer: Option<Box<dyn SubscriptionCloser>>,
}

impl Subscription {
    /// Create a subscription for `topic` whose connection is released by
    /// `closer`. The returned sink must be handed to the connection.
    pub fn new(
        topic: impl Into<String>,
        closer: Box<dyn SubscriptionCloser>,
    ) -> (Self, SubscriptionSink) {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SubscriptionState::Idle);
        let state = Arc::new(state_tx);

        let sink = SubscriptionSink {
            topic: topic.clone(),
            tx,
            state: state.clone(),
        };
        let subscription = Self {
            topic,
            rx,
            state,
            closer: Some(closer),
        };
        (subscription, sink)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Next forwarded payload; `None` once the connection side is gone
    pub async fn next_message(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Tear down the dedicated connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut closer) = self.closer.take() {
            debug!(topic = %self.topic, "Closing subscription");
            transition(&self.state, SubscriptionEvent::Closed);
            self.rx.close();
            closer.close();
        }
    }
}

impl Stream for Subscription {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .finish()
    }
}

fn transition(state: &watch::Sender<SubscriptionState>, event: SubscriptionEvent) {
    state.send_if_modified(|current| {
        let next = current.next(event);
        let changed = next != *current;
        *current = next;
        changed
    });
}
