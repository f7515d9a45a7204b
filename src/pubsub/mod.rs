//! # Pub/sub control topic.
//!
//! External collaborators (a dashboard, an operator script) drive the fleet by
//! publishing JSON on one named topic:
//!
//! ```text
//! {"type":"broadcast","data":{...}}   forward `data` to every connected cluster
//! {"type":"restart"}                  restart the whole fleet
//! ```
//!
//! The transport sits behind [`PubSub`]. [`LocalBroker`] is the in-process
//! implementation used by the binary and tests.

mod control;
mod local;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::error::PubSubError;

pub use control::ControlMessage;
pub use local::LocalBroker;

/// Topic-based message transport.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Publishes `message` on `topic`. Returns the number of live subscribers reached.
    async fn publish(&self, topic: &str, message: &str) -> Result<usize, PubSubError>;

    /// Subscribes to messages published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, PubSubError>;
}

/// Stream of raw messages on one topic.
pub struct Subscription {
    topic: Arc<str>,
    rx: broadcast::Receiver<Arc<str>>,
}

impl Subscription {
    /// Wraps a broadcast receiver.
    pub fn new(topic: impl Into<Arc<str>>, rx: broadcast::Receiver<Arc<str>>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the topic is closed.
    ///
    /// Messages missed by a lagging subscriber are skipped with a warning.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, skipped = n, "control subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
