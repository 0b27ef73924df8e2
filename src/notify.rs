use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

#[allow(dead_code)]
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY per hotel.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a hotel. Creates the channel if needed.
    #[allow(dead_code)]
    pub fn subscribe(&self, hotel_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(hotel_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, hotel_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&hotel_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the hotel is deleted).
    #[allow(dead_code)]
    pub fn remove(&self, hotel_id: &Ulid) {
        self.channels.remove(hotel_id);
    }
}
