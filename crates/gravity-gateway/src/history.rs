//! In-memory ring of recent requests, for the health endpoint and
//! troubleshooting. Observability only; nothing reads it on the hot path.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub at: DateTime<Utc>,
    pub model: String,
    pub family: &'static str,
    pub status: u16,
    pub duration_ms: u64,
    pub stream: bool,
}

pub struct RequestHistory {
    ring: Mutex<VecDeque<RequestRecord>>,
    capacity: usize,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, record: RequestRecord) {
        let mut ring = self.ring.lock().expect("history mutex poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.ring.lock().expect("history mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent first.
    pub fn recent(&self, n: usize) -> Vec<RequestRecord> {
        let ring = self.ring.lock().expect("history mutex poisoned");
        ring.iter().rev().take(n).cloned().collect()
    }
}
