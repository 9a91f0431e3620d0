use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// One inbound push-stream message as it was received.
#[derive(Clone, Debug, Serialize)]
pub struct LoggedEvent {
    pub seq: u64,
    #[serde(rename = "receivedAt")]
    pub received_at: DateTime<Utc>,
    #[serde(rename = "eventType")]
    pub event_type: Option<String>,
    /// Reconciler outcome label, e.g. `applied` or `unknown_entity`.
    pub outcome: &'static str,
    pub payload: Value,
}

/// Bounded diagnostic record of inbound events, newest first.
pub struct EventLog {
    entries: Mutex<VecDeque<LoggedEvent>>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn record(&self, event_type: Option<String>, outcome: &'static str, payload: Value) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return seq;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(LoggedEvent {
            seq,
            received_at: Utc::now(),
            event_type,
            outcome,
            payload,
        });
        seq
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<LoggedEvent> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
