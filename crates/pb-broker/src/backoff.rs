use std::future::Future;
use std::time::Duration;

use pb_common::Result;
use pb_config::BrokerConfig;
use rand::Rng;
use tracing::{error, warn};

/// Capped exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts: max_attempts.max(1),
            failures: 0,
        }
    }

    pub fn from_config(config: &BrokerConfig) -> Self {
        Self::new(config.initial_backoff(), config.max_backoff(), config.connect_max_attempts)
    }

    /// Attempts that have failed so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` once `max_attempts` attempts have failed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }

        let exponent = (self.failures - 1).min(16);
        let delay = self.initial.saturating_mul(1u32 << exponent).min(self.max);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..=1.0);
        Some(delay.mul_f64(jitter))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Run `op` until it succeeds, fails fatally, or the backoff is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(what: &str, mut backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        operation = %what,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(operation = %what, attempts = backoff.failures(), error = %e, "Giving up");
                    return Err(e);
                }
            },
        }
    }
}
