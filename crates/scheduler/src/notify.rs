//! Delivery notifications.
//!
//! One [`DeliveryEvent`] is published per completed dispatch. Transport to
//! clients (websocket, SSE, ...) lives outside this crate and subscribes here.

use {async_trait::async_trait, courier_common::DeliveryEvent, tokio::sync::broadcast, tracing::trace};

/// Receives a [`DeliveryEvent`] after every completed dispatch.
///
/// Publishing must not fail the dispatch that triggered it.
#[async_trait]
pub trait DeliveryNotifier: Send + Sync {
    async fn publish(&self, event: DeliveryEvent);
}

/// Fan-out over a tokio broadcast channel. Slow subscribers lag and drop the
/// oldest events rather than blocking dispatch.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl DeliveryNotifier for BroadcastNotifier {
    async fn publish(&self, event: DeliveryEvent) {
        let message_id = event.message_id.clone();
        if self.tx.send(event).is_err() {
            trace!(%message_id, "delivery event dropped, no subscribers");
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl DeliveryNotifier for NoopNotifier {
    async fn publish(&self, _event: DeliveryEvent) {}
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::Utc,
        courier_common::{ChannelType, Direction, MessageStatus},
    };

    fn event(id: &str) -> DeliveryEvent {
        DeliveryEvent {
            message_id: id.into(),
            recipient: "+15551234567".into(),
            contact_id: None,
            channel: ChannelType::Sms,
            direction: Direction::Outbound,
            content: "hi".into(),
            status: MessageStatus::Sent,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.publish(event("m1")).await;
        notifier.publish(event("m2")).await;

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().message_id, "m1");
            assert_eq!(rx.recv().await.unwrap().message_id, "m2");
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::default();
        notifier.publish(event("m1")).await;
        NoopNotifier.publish(event("m2")).await;
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
