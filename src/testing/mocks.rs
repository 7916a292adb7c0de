//! Mock implementations for testing
//!
//! [`MockTransport`] records publishes and hands out in-memory subscriptions
//! whose sinks stay with the mock, so tests can push broker messages into an
//! open `/subscribe/` stream and observe when its connection is closed.

use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::subscription::{Delivery, SubscriptionCloser, SubscriptionSink};
use crate::transport::{Subscription, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type PublishedMessage = (String, Bytes);

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    published: Mutex<Vec<PublishedMessage>>,
    opened_topics: Mutex<Vec<String>>,
    sinks: Mutex<Vec<SubscriptionSink>>,
    state: Mutex<ConnectionState>,
    closes: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    pub should_fail: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Mock whose publisher connection is up
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            opened_topics: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Connected),
            closes: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            should_fail: false,
        }
    }

    /// Mock whose publishes and subscriptions fail
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new()
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    /// Topics passed to `open_subscription`, in order
    pub fn opened_topics(&self) -> Vec<String> {
        lock(&self.opened_topics).clone()
    }

    /// Number of subscription connections closed so far
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate ConnAck on every open subscription connection
    pub fn connect_subscriptions(&self) {
        for sink in lock(&self.sinks).iter() {
            sink.mark_subscribed();
        }
    }

    /// Simulate a broker message reaching every open subscription connection.
    /// Returns how many subscriptions forwarded it.
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        lock(&self.sinks)
            .iter()
            .filter(|sink| sink.deliver(topic, payload.clone()) == Delivery::Forwarded)
            .count()
    }

    /// Drop every sink so open response streams end
    pub fn end_subscriptions(&self) {
        lock(&self.sinks).clear();
    }

    /// Wait until at least `count` subscriptions have been opened
    pub async fn wait_for_subscriptions(&self, count: usize) -> bool {
        for _ in 0..200 {
            if lock(&self.opened_topics).len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn failure(&self, what: &str) -> Box<dyn std::error::Error + Send + Sync> {
        format!("Mock {what} failure").into()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), MqttError> {
        if self.should_fail {
            return Err(MqttError::PublishFailed(self.failure("publish")));
        }

        lock(&self.published).push((topic.to_string(), payload));
        Ok(())
    }

    fn open_subscription(&self, topic: &str) -> Result<Subscription, MqttError> {
        if self.should_fail {
            return Err(MqttError::SubscriptionFailed(self.failure("subscribe")));
        }

        let closer = MockCloser {
            closes: self.closes.clone(),
            active: self.active.clone(),
        };
        let (subscription, sink) = Subscription::new(topic, Box::new(closer));
        sink.mark_connecting();

        self.active.fetch_add(1, Ordering::SeqCst);
        lock(&self.opened_topics).push(topic.to_string());
        lock(&self.sinks).push(sink);
        Ok(subscription)
    }

    fn connection_state(&self) -> ConnectionState {
        lock(&self.state).clone()
    }

    fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct MockCloser {
    closes: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl SubscriptionCloser for MockCloser {
    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
