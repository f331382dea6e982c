//! Real-time event fan-out to per-stream subscriber groups.
//!
//! Subscribers hold the receiving half of an unbounded channel; a send into a
//! closed channel marks the subscriber dead and it is evicted during the same
//! broadcast. There is no back-pressure by design: slow consumers are
//! dropped, not waited on.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

use crate::monitor::event::StreamEvent;

/// A live subscription to one stream's events. Dropping it (or the receiver)
/// causes eviction on the next broadcast.
pub struct Subscription {
    pub id: Uuid,
    pub stream_id: String,
    pub rx: UnboundedReceiver<String>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, HashMap<Uuid, UnboundedSender<String>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, stream_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut subs = self.subscribers.lock().expect("bus lock");
        subs.entry(stream_id.to_string())
            .or_default()
            .insert(id, tx);
        debug!(stream_id, subscriber = %id, total = subs[stream_id].len(), "Subscriber connected");
        Subscription {
            id,
            stream_id: stream_id.to_string(),
            rx,
        }
    }

    pub fn unsubscribe(&self, stream_id: &str, id: Uuid) {
        let mut subs = self.subscribers.lock().expect("bus lock");
        if let Some(group) = subs.get_mut(stream_id) {
            group.remove(&id);
            if group.is_empty() {
                subs.remove(stream_id);
            }
        }
        debug!(stream_id, subscriber = %id, "Subscriber disconnected");
    }

    /// Serialize once and send to every subscriber of the stream. Subscribers
    /// whose channel is closed are evicted. Returns the delivered count.
    pub fn broadcast(&self, stream_id: &str, mut event: StreamEvent) -> usize {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        let message = match serde_json::to_string(&event) {
            Ok(m) => m,
            Err(_) => return 0,
        };

        let mut subs = self.subscribers.lock().expect("bus lock");
        let Some(group) = subs.get_mut(stream_id) else {
            return 0;
        };

        let mut dead = Vec::new();
        let mut delivered = 0;
        for (id, tx) in group.iter() {
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            group.remove(&id);
        }
        if group.is_empty() {
            subs.remove(stream_id);
        }
        delivered
    }

    /// Send to exactly one subscriber. Returns whether the send succeeded.
    pub fn send_personal(&self, stream_id: &str, subscriber: Uuid, mut event: StreamEvent) -> bool {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        let Ok(message) = serde_json::to_string(&event) else {
            return false;
        };
        let subs = self.subscribers.lock().expect("bus lock");
        subs.get(stream_id)
            .and_then(|group| group.get(&subscriber))
            .is_some_and(|tx| tx.send(message).is_ok())
    }

    pub fn connection_count(&self, stream_id: &str) -> usize {
        self.subscribers
            .lock()
            .expect("bus lock")
            .get(stream_id)
            .map(|g| g.len())
            .unwrap_or(0)
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.subscribers
            .lock()
            .expect("bus lock")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::event::EventKind;

    fn event(kind: EventKind) -> StreamEvent {
        StreamEvent::new(kind, "s1", serde_json::json!({"n": 1}))
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("s1");
        let mut b = bus.subscribe("s1");
        let mut other = bus.subscribe("s2");

        let delivered = bus.broadcast("s1", event(EventKind::ManifestUpdated));
        assert_eq!(delivered, 2);

        let msg = a.rx.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "manifest_updated");
        assert!(parsed["timestamp"].is_string(), "timestamp attached");
        assert!(b.rx.try_recv().is_ok());
        assert!(other.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_evicted() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        let keep = bus.subscribe("s1");
        drop(sub.rx);

        let delivered = bus.broadcast("s1", event(EventKind::Error));
        assert_eq!(delivered, 1);
        assert_eq!(bus.connection_count("s1"), 1);
        drop(keep);
    }

    #[tokio::test]
    async fn unsubscribe_removes_empty_stream_entry() {
        let bus = EventBus::new();
        let sub = bus.subscribe("s1");
        assert_eq!(bus.connection_count("s1"), 1);
        bus.unsubscribe("s1", sub.id);
        assert_eq!(bus.connection_count("s1"), 0);
        assert!(bus.stream_ids().is_empty());
    }

    #[tokio::test]
    async fn send_personal_targets_one_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("s1");
        let mut b = bus.subscribe("s1");

        assert!(bus.send_personal("s1", a.id, event(EventKind::Pong)));
        assert!(a.rx.try_recv().is_ok());
        assert!(b.rx.try_recv().is_err());

        assert!(!bus.send_personal("s1", Uuid::new_v4(), event(EventKind::Pong)));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.broadcast("nobody", event(EventKind::Alarm)), 0);
    }

    #[tokio::test]
    async fn producer_timestamp_is_preserved() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("s1");
        let ts = chrono::Utc::now() - chrono::Duration::hours(1);
        let mut ev = event(EventKind::AdDetected);
        ev.timestamp = Some(ts);
        bus.broadcast("s1", ev);
        let parsed: serde_json::Value =
            serde_json::from_str(&sub.rx.try_recv().unwrap()).unwrap();
        let got: chrono::DateTime<chrono::Utc> =
            parsed["timestamp"].as_str().unwrap().parse().unwrap();
        assert_eq!(got, ts);
    }
}
