//! "Message received" notifications.
//!
//! Every subscription gets its own unbounded channel. Publishing happens on
//! the connection's receive task, so messages from one connection arrive in
//! wire order; there is no ordering across connections.
//!
//! Publishing never waits for a subscriber. A subscription that is not
//! drained keeps every message (and its payload) queued, and the peer sees
//! no TCP backpressure from it. Consumers that can fall behind should watch
//! [`Subscription::pending`] or drop the subscription.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::ConnectionHandler;
use crate::message::MessageRef;

/// A decoded message together with the connection it came from.
#[derive(Debug, Clone)]
pub struct MessageReceived {
    /// The decoded message.
    pub message: MessageRef,
    /// Connection that received it. Use it to reply.
    pub handler: Arc<ConnectionHandler>,
}

/// Receiving end of a listener subscription.
///
/// Yields every message published after the subscription was created. Ends
/// (`recv` returns `None`) once the listener has stopped and all queued
/// notifications have been taken.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<MessageReceived>,
}

impl Subscription {
    /// Wait for the next notification.
    pub async fn recv(&mut self) -> Option<MessageReceived> {
        self.rx.recv().await
    }

    /// Take a notification if one is queued.
    pub fn try_recv(&mut self) -> Option<MessageReceived> {
        self.rx.try_recv().ok()
    }

    /// Notifications queued and not yet taken.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[derive(Default)]
struct SubscriberList {
    senders: Vec<mpsc::UnboundedSender<MessageReceived>>,
    closed: bool,
}

/// Fan-out of notifications to all live subscriptions.
#[derive(Default)]
pub(crate) struct Subscribers {
    inner: Mutex<SubscriberList>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.senders.push(tx);
        }
        Subscription { rx }
    }

    /// Deliver to every subscription, forgetting the ones that were dropped.
    pub(crate) fn publish(&self, event: MessageReceived) {
        let mut inner = self.inner.lock();
        inner.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// End all subscriptions. Later subscriptions start out closed.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.senders.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, ConnectionId};
    use crate::message::{FramedMessage, MessageRegistry, RawMessage};
    use crate::protocol::Header;
    use bytes::Bytes;

    fn event(handle: u32) -> MessageReceived {
        let (server, _client) = tokio::io::duplex(64);
        let handler = ConnectionHandler::new(
            ConnectionId(1),
            None,
            server,
            Arc::new(MessageRegistry::new()),
            ConnectionConfig::default(),
        );
        MessageReceived {
            message: Arc::new(RawMessage::new(Header::new(1, 0, handle, 0), Bytes::new())),
            handler,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let subscribers = Subscribers::default();
        let mut a = subscribers.subscribe();
        let mut b = subscribers.subscribe();

        subscribers.publish(event(1));

        assert_eq!(a.recv().await.unwrap().message.handle().get(), 1);
        assert_eq!(b.recv().await.unwrap().message.handle().get(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let subscribers = Subscribers::default();
        subscribers.publish(event(1));

        let mut late = subscribers.subscribe();
        assert!(late.try_recv().is_none());

        subscribers.publish(event(2));
        assert_eq!(late.recv().await.unwrap().message.handle().get(), 2);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let subscribers = Subscribers::default();
        let kept = subscribers.subscribe();
        drop(subscribers.subscribe());

        subscribers.publish(event(1));
        assert_eq!(subscribers.len(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let subscribers = Subscribers::default();
        let mut before = subscribers.subscribe();
        subscribers.publish(event(1));
        subscribers.close();

        assert!(before.recv().await.is_some());
        assert!(before.recv().await.is_none());

        let mut after = subscribers.subscribe();
        assert!(after.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_undrained_subscription_queues_without_blocking() {
        let subscribers = Subscribers::default();
        let mut slow = subscribers.subscribe();

        for i in 1..=200u32 {
            subscribers.publish(event(i));
        }
        assert_eq!(slow.pending(), 200);

        assert_eq!(slow.recv().await.unwrap().message.handle().get(), 1);
        assert_eq!(slow.pending(), 199);
    }
}
