use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-provider change feed. Slow subscribers lag and skip; senders never block.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a provider's events. Creates the channel if needed.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, provider_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&provider_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a provider's channel; subscribers see the stream close.
    pub fn remove(&self, provider_id: &Ulid) {
        self.channels.remove(provider_id);
    }
}
