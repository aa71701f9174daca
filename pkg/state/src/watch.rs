use pkg_constants::state::EVENT_CHANNEL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// One store mutation. `value` is the written bytes for a `Put`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

/// Outcome of asking the log for the events after a sequence number.
#[derive(Debug)]
pub enum Replay {
    /// Every event after the requested sequence, in order.
    Events(Vec<WatchEvent>),
    /// Some of them were already evicted; the caller must relist.
    Gap { oldest_retained: u64 },
}

/// Sequenced record of every store mutation.
///
/// Recent events are kept in a bounded ring buffer for replay, and each new
/// event is broadcast to live subscribers. A subscriber that falls behind the
/// broadcast channel can catch up with [`EventLog::replay`] as long as the
/// ring buffer still covers the gap.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<Ring>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct Ring {
    seq: u64,
    events: VecDeque<WatchEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(Ring {
                seq: 0,
                events: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            })),
            sender,
        }
    }

    /// Record a mutation. Called by `StateStore` while it holds its write lock.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let mut ring = self.inner.write().await;
        ring.seq += 1;
        let event = WatchEvent {
            seq: ring.seq,
            event_type,
            key,
            value,
        };
        if ring.events.len() >= ring.capacity {
            ring.events.pop_front();
        }
        ring.events.push_back(event.clone());
        // No receivers is fine: controllers may not have started yet.
        let _ = self.sender.send(event);
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Events with a sequence number greater than `after`.
    pub async fn replay(&self, after: u64) -> Replay {
        let ring = self.inner.read().await;
        let oldest_retained = ring.events.front().map_or(ring.seq + 1, |e| e.seq);
        if after + 1 < oldest_retained {
            return Replay::Gap { oldest_retained };
        }
        Replay::Events(
            ring.events
                .iter()
                .filter(|e| e.seq > after)
                .cloned()
                .collect(),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}
