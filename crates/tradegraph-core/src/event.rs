use crate::traits::Notifier;

/// A topic-tagged notification as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct Notification {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, notification: Notification) {
        // Ignore error if no receivers
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for EventBus {
    fn notify(&self, topic: &str, payload: serde_json::Value) {
        self.publish(Notification {
            topic: topic.to_string(),
            payload,
        });
    }
}
