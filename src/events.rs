use std::collections::VecDeque;

use tokio::sync::{broadcast, RwLock};

use crate::config::{EVENT_BUFFER_SIZE, EVENT_CHANNEL_CAPACITY};

/// Fan-out of engine events to any number of subscribers, with a bounded
/// buffer of recent events for late joiners.
pub struct EventBus<T: Clone> {
    buffer: RwLock<VecDeque<T>>,
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(EVENT_BUFFER_SIZE)),
            sender,
        }
    }

    pub async fn publish(&self, event: T) {
        let mut buf = self.buffer.write().await;
        if buf.len() >= EVENT_BUFFER_SIZE {
            buf.pop_front();
        }
        buf.push_back(event.clone());
        drop(buf);

        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub async fn history(&self) -> Vec<T> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
