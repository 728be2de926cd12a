use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::core::notifications::{Notification, Topic};

/// Delivery side of the real-time channel. Publishing never blocks and never
/// reports failure to the caller.
pub trait Notifier: Send + Sync {
    fn publish(&self, topic: Topic, payload: Notification);
}

/// In-process pub/sub hub with one broadcast channel per topic
///
/// Channels are created lazily by the first subscriber and removed once a
/// publish finds no receivers left.
pub struct BroadcastNotifier {
    topics: DashMap<Topic, broadcast::Sender<Notification>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Notification> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .get(&topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: Topic, payload: Notification) {
        let delivered = match self.topics.get(&topic) {
            Some(sender) => sender.send(payload).ok(),
            None => None,
        };

        match delivered {
            Some(receivers) => {
                tracing::trace!("Published to {} ({} receivers)", topic, receivers);
            }
            None => {
                tracing::trace!("No subscribers on {}, dropping notification", topic);
                self.topics
                    .remove_if(&topic, |_, sender| sender.receiver_count() == 0);
            }
        }
    }
}
