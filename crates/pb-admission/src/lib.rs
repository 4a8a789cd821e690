//! Admission control
//!
//! Two composed fixed windows per caller identity: a coarse global window on
//! every request and a tighter one on sensitive routes. Every attempt is
//! counted, allowed or denied, so a rejected caller cannot avoid the count.
//! Counters live in a shared store whose atomic increment-with-expiry makes
//! window rollover atomic per identity.

pub mod limiter;
pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use limiter::{AdmissionLimiter, Allowance, Decision, FixedWindowLimiter, LimitLayer, WindowLimit};
pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<redis::RedisError> for AdmissionError {
    fn from(e: redis::RedisError) -> Self {
        AdmissionError::StoreUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Counter value right after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Attempts in the current window, this one included
    pub count: u64,
    /// Time until the window rolls over
    pub reset_after: Duration,
}

/// Shared counter store
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, opening a window of `window` when none is live.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount>;
}
