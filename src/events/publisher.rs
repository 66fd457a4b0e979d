use tokio::sync::broadcast;

use super::types::{ProgressEvent, PublishedEvent};

/// High-throughput event publisher for batch lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Publishing with no subscribers is not an error;
    /// progress must not depend on anyone listening.
    pub fn publish(&self, event: ProgressEvent) {
        let published = PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        };
        let _ = self.sender.send(published);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}
