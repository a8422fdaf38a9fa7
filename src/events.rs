// ABOUTME: Event hub — in-process pub/sub pushing JSON event envelopes to clients.
// ABOUTME: Best-effort delivery; a failed send drops the subscriber.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::sync::mpsc;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Fan-out point for state-transition events (`chat.reply`,
/// `approval.resolved`). Subscribers receive pre-serialised envelopes;
/// ordering holds per subscriber, not across them.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber; the returned id detaches it again.
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Serialise `{type:"event", event, payload}` once and send it to every
    /// subscriber. Sends happen on a snapshot taken outside the lock; closed
    /// channels are pruned afterwards.
    pub fn broadcast(&self, event: &str, payload: Value) {
        let envelope = json!({"type": "event", "event": event, "payload": payload}).to_string();

        let snapshot: Vec<(u64, mpsc::UnboundedSender<String>)> = self
            .lock()
            .iter()
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(envelope.clone()).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            tracing::debug!("dropping {} disconnected event subscriber(s)", dead.len());
            self.lock().retain(|s| !dead.contains(&s.id));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().expect("event hub lock poisoned")
    }
}
