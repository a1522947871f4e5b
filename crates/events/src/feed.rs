//! Snapshot publishing/subscription abstraction (mechanics only).
//!
//! A change feed distributes full-collection snapshots to every subscriber of
//! a [`Topic`]. Delivery is at-least-once and carries no ordering guarantee
//! across topics; consumers recompute from each snapshot, which makes
//! duplicate and out-of-order deliveries harmless.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::collection::Topic;

/// A subscription to one topic.
///
/// ```ignore
/// let sub = store.subscribe(tenant_id, Collection::Sales);
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(snapshot) => reconcile(snapshot)?,
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption (one session).
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued and keep only the newest message.
    ///
    /// Full snapshots supersede each other, so intermediate deliveries can be
    /// skipped without losing information.
    pub fn drain_latest(&self) -> Option<M> {
        let mut latest = None;
        while let Ok(msg) = self.receiver.try_recv() {
            latest = Some(msg);
        }
        latest
    }
}

/// Topic-keyed pub/sub for collection snapshots.
///
/// `subscribe` accepts an optional initial message that is delivered to the
/// new subscriber only; stores use it to hand every (re)connecting session the
/// current full snapshot before any later change.
pub trait ChangeFeed<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, topic: Topic, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self, topic: Topic, initial: Option<M>) -> Subscription<M>;

    /// Number of live subscribers on a topic (best effort).
    fn subscriber_count(&self, topic: Topic) -> usize;
}

impl<M, F> ChangeFeed<M> for Arc<F>
where
    F: ChangeFeed<M> + ?Sized,
{
    type Error = F::Error;

    fn publish(&self, topic: Topic, message: M) -> Result<(), Self::Error> {
        (**self).publish(topic, message)
    }

    fn subscribe(&self, topic: Topic, initial: Option<M>) -> Subscription<M> {
        (**self).subscribe(topic, initial)
    }

    fn subscriber_count(&self, topic: Topic) -> usize {
        (**self).subscriber_count(topic)
    }
}
