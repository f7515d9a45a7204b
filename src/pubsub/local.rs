//! In-process broker: one `tokio::sync::broadcast` channel per topic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::PubSubError;
use crate::pubsub::{PubSub, Subscription};

const DEFAULT_CAPACITY: usize = 256;

/// In-memory [`PubSub`] implementation.
///
/// Cheap to clone; clones share topics.
#[derive(Clone)]
pub struct LocalBroker {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Arc<str>>>>>,
    capacity: usize,
}

impl LocalBroker {
    /// Creates a broker with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a broker buffering up to `capacity` messages per topic.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Arc<str>> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalBroker {
    async fn publish(&self, topic: &str, message: &str) -> Result<usize, PubSubError> {
        Ok(self.sender(topic).send(Arc::from(message)).unwrap_or(0))
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, PubSubError> {
        Ok(Subscription::new(topic, self.sender(topic).subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_reach_subscribers_of_the_topic() {
        let broker = LocalBroker::new();
        let mut control = broker.subscribe("control").await.expect("subscribe");
        let mut other = broker.subscribe("other").await.expect("subscribe");

        let reached = broker.publish("control", "hello").await.expect("publish");
        assert_eq!(reached, 1);

        assert_eq!(control.recv().await.as_deref(), Some("hello"));
        assert!(other.rx.try_recv().is_err());
        assert_eq!(control.topic(), "control");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let broker = LocalBroker::new();
        assert_eq!(broker.publish("nobody", "x").await.expect("publish"), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let broker = LocalBroker::with_capacity(2);
        let mut sub = broker.subscribe("t").await.expect("subscribe");
        for i in 0..5 {
            broker.publish("t", &i.to_string()).await.expect("publish");
        }
        assert_eq!(sub.recv().await.as_deref(), Some("3"));
        assert_eq!(sub.recv().await.as_deref(), Some("4"));
    }
}
