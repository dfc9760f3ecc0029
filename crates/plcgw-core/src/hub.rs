// ── Broadcast hub ──
//
// Tracks live-feed clients and fans out serialized messages. Each client
// owns a bounded queue drained by its connection task; the hub only ever
// uses `try_send`, so a slow client can never stall a broadcast. A client
// whose queue is closed or full is removed by the call that found it so.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::model::ConnectionStatus;
use crate::store::PointSnapshot;

/// Default per-client queue depth.
pub const CLIENT_QUEUE_CAPACITY: usize = 32;

pub type ClientId = u64;

/// Message pushed to live-feed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum FeedMessage {
    /// The entire point-value cache.
    Data(Arc<PointSnapshot>),
    Status(ConnectionStatus),
    /// Reply to a client ping.
    Pong,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    #[serde(flatten)]
    message: &'a FeedMessage,
    timestamp: DateTime<Utc>,
    protocol_tag: &'a str,
}

pub struct BroadcastHub {
    clients: DashMap<ClientId, mpsc::Sender<Arc<str>>>,
    next_id: AtomicU64,
    protocol_tag: String,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(protocol_tag: impl Into<String>, queue_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            protocol_tag: protocol_tag.into(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Serialize `message` into the wire envelope.
    pub fn encode(&self, message: &FeedMessage) -> Option<Arc<str>> {
        let envelope = Envelope {
            message,
            timestamp: Utc::now(),
            protocol_tag: &self.protocol_tag,
        };
        match serde_json::to_string(&envelope) {
            Ok(text) => Some(text.into()),
            Err(e) => {
                warn!(error = %e, "failed to serialize feed message");
                None
            }
        }
    }

    /// Register a client. `initial` is queued before the client becomes
    /// visible to `broadcast`, so it is always the first thing received.
    pub fn subscribe(&self, initial: &[FeedMessage]) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity.max(initial.len() + 1));

        // The queue is sized to hold every initial message.
        for message in initial {
            if let Some(text) = self.encode(message) {
                let queued = tx.try_send(text);
                debug_assert!(queued.is_ok(), "initial feed message did not fit the queue");
            }
        }

        self.clients.insert(id, tx);
        debug!(client = id, clients = self.clients.len(), "feed client subscribed");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: ClientId) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            debug!(client = id, clients = self.clients.len(), "feed client unsubscribed");
        }
        removed
    }

    /// Send `message` to every client. Returns the number of clients that
    /// accepted it; the rest are removed.
    pub fn broadcast(&self, message: &FeedMessage) -> usize {
        let Some(text) = self.encode(message) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for entry in &self.clients {
            match entry.value().try_send(Arc::clone(&text)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(client = *entry.key(), "feed client queue full, dropping client");
                    dead.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => dead.push(*entry.key()),
            }
        }

        for id in dead {
            self.unsubscribe(id);
        }
        delivered
    }

    /// Send `message` to one client, removing it if the send fails.
    pub fn send_to(&self, id: ClientId, message: &FeedMessage) -> bool {
        let Some(text) = self.encode(message) else {
            return false;
        };
        let sent = match self.clients.get(&id) {
            Some(sender) => sender.try_send(text).is_ok(),
            None => return false,
        };
        if !sent {
            self.unsubscribe(id);
        }
        sent
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn status() -> FeedMessage {
        FeedMessage::Status(ConnectionStatus::default())
    }

    #[test]
    fn envelope_carries_kind_payload_timestamp_and_tag() {
        let hub = BroadcastHub::new("s7", 4);
        let text = hub.encode(&status()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(json["kind"], "status");
        assert_eq!(json["protocolTag"], "s7");
        assert_eq!(json["payload"]["connected"], false);
        assert!(json["timestamp"].is_string());

        let pong: serde_json::Value =
            serde_json::from_str(&hub.encode(&FeedMessage::Pong).unwrap()).unwrap();
        assert_eq!(pong["kind"], "pong");
    }

    #[test]
    fn initial_messages_arrive_first() {
        let hub = BroadcastHub::new("s7", 4);
        let data = FeedMessage::Data(Arc::new(PointSnapshot::new()));
        let (_, mut rx) = hub.subscribe(&[data, status()]);
        hub.broadcast(&status());

        let kinds: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|text| {
                let json: serde_json::Value = serde_json::from_str(&text).unwrap();
                json["kind"].as_str().unwrap().to_owned()
            })
            .collect();
        assert_eq!(kinds, vec!["data", "status", "status"]);
    }

    #[test]
    fn initial_messages_fit_a_small_queue() {
        let hub = BroadcastHub::new("s7", 1);
        let data = FeedMessage::Data(Arc::new(PointSnapshot::new()));
        let (_, mut rx) = hub.subscribe(&[data, status()]);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn closed_client_is_pruned_without_affecting_others() {
        let hub = BroadcastHub::new("s7", 4);
        let (_, dead_rx) = hub.subscribe(&[]);
        let (_, mut live_rx) = hub.subscribe(&[]);
        drop(dead_rx);

        assert_eq!(hub.broadcast(&status()), 1);
        assert_eq!(hub.client_count(), 1);
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn full_client_is_pruned() {
        let hub = BroadcastHub::new("s7", 1);
        let (_, _stalled_rx) = hub.subscribe(&[]);

        assert_eq!(hub.broadcast(&status()), 1);
        assert_eq!(hub.broadcast(&status()), 0);
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn send_to_reaches_only_that_client() {
        let hub = BroadcastHub::new("s7", 4);
        let (a, mut rx_a) = hub.subscribe(&[]);
        let (_, mut rx_b) = hub.subscribe(&[]);

        assert!(hub.send_to(a, &FeedMessage::Pong));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(!hub.send_to(999, &FeedMessage::Pong));
    }
}
