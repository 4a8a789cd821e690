use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{AdmissionError, CounterStore, Result, WindowCount};

struct Window {
    count: u64,
    ends_at: Instant,
}

/// Per-process counters. Each increment holds the entry's shard lock, so
/// rollover and increment are atomic per key.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop windows that have already rolled over
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.windows.retain(|_, w| w.ends_at > now);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AdmissionError::StoreUnavailable("memory counter store disabled".into()));
        }

        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            ends_at: now + window,
        });

        if entry.ends_at <= now {
            entry.count = 0;
            entry.ends_at = now + window;
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            reset_after: entry.ends_at - now,
        })
    }
}
