//! Call lifecycle event fan-out

use crate::domain::call::CallEvent;
use tokio::sync::broadcast;

/// Event broadcaster
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<CallEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: CallEvent) {
        // Ignore send errors (no receivers)
        let _ = self.tx.send(event);
    }

    pub fn publish_all(&self, events: Vec<CallEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}
