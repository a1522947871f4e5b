//! In-memory change feed for tests/dev.

use std::collections::HashMap;
use std::sync::{Mutex, mpsc};

use thiserror::Error;

use crate::collection::Topic;
use crate::feed::{ChangeFeed, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryFeedError {
    /// Publish failed due to internal lock poisoning.
    #[error("change feed lock poisoned")]
    Poisoned,
}

/// In-memory topic pub/sub.
///
/// - No IO / no async
/// - Best-effort fan-out per topic
/// - Dead subscribers are pruned on publish
#[derive(Debug)]
pub struct InMemoryChangeFeed<M> {
    subscribers: Mutex<HashMap<Topic, Vec<mpsc::Sender<M>>>>,
}

impl<M> InMemoryChangeFeed<M> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M> Default for InMemoryChangeFeed<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }
}

impl<M> ChangeFeed<M> for InMemoryChangeFeed<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryFeedError;

    fn publish(&self, topic: Topic, message: M) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| InMemoryFeedError::Poisoned)?;

        if let Some(list) = subs.get_mut(&topic) {
            list.retain(|tx| tx.send(message.clone()).is_ok());
            if list.is_empty() {
                subs.remove(&topic);
            }
        }

        Ok(())
    }

    fn subscribe(&self, topic: Topic, initial: Option<M>) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        if let Some(msg) = initial {
            // The receiver is alive, so this cannot fail.
            let _ = tx.send(msg);
        }

        // If the lock is poisoned, we still return a subscription; it just
        // won't receive anything past the initial snapshot.
        match self.subscribers.lock() {
            Ok(mut subs) => subs.entry(topic).or_default().push(tx),
            Err(_) => tracing::warn!(collection = %topic.collection, "change feed poisoned; subscription is detached"),
        }

        Subscription::new(rx)
    }

    fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.get(&topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
