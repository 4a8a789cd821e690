use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use metrics::counter;
use nonzero_ext::nonzero;
use pb_config::RateLimitConfig;
use tracing::{debug, warn};

use crate::CounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitLayer {
    Global,
    Sensitive,
}

impl LimitLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Sensitive => "sensitive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub max: u64,
    pub window: Duration,
}

/// What an admitted caller has left in its tightest window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub limit: u64,
    /// Unknown while running on the local fallback
    pub remaining: Option<u64>,
    pub reset_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed(Allowance),
    Denied { layer: LimitLayer, retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Whole seconds for a `Retry-After` header, rounded up
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Denied { retry_after, .. } => {
                let millis = retry_after.as_millis() as u64;
                Some(millis.div_ceil(1000).max(1))
            }
            Self::Allowed(_) => None,
        }
    }
}

/// Fixed window over the shared counter store.
///
/// When the store cannot be reached the limiter degrades to a per-process
/// governor limiter with the same quota. The fallback only counts admitted
/// requests: while the store is down, denied attempts do not extend the
/// lockout, and a caller regains one slot every `window / max` instead of
/// waiting out the whole window.
pub struct FixedWindowLimiter {
    layer: LimitLayer,
    limit: WindowLimit,
    key_prefix: String,
    store: Arc<dyn CounterStore>,
    fallback: DefaultKeyedRateLimiter<String>,
}

impl FixedWindowLimiter {
    pub fn new(layer: LimitLayer, limit: WindowLimit, key_prefix: impl Into<String>, store: Arc<dyn CounterStore>) -> Self {
        let burst = u32::try_from(limit.max)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(nonzero!(1u32));
        let period = limit.window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            layer,
            limit,
            key_prefix: key_prefix.into(),
            store,
            fallback: RateLimiter::keyed(quota),
        }
    }

    pub fn layer(&self) -> LimitLayer {
        self.layer
    }

    pub fn limit(&self) -> WindowLimit {
        self.limit
    }

    fn key(&self, identity: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, self.layer.as_str(), identity)
    }

    /// Count one attempt for `identity` and decide
    pub async fn consume(&self, identity: &str) -> Decision {
        match self.store.increment(&self.key(identity), self.limit.window).await {
            Ok(window) if window.count <= self.limit.max => Decision::Allowed(Allowance {
                limit: self.limit.max,
                remaining: Some(self.limit.max - window.count),
                reset_after: Some(window.reset_after),
            }),
            Ok(window) => Decision::Denied {
                layer: self.layer,
                retry_after: window.reset_after,
            },
            Err(e) => {
                counter!("postbus_admission_fallback_total", "layer" => self.layer.as_str()).increment(1);
                warn!(layer = self.layer.as_str(), error = %e, "Counter store unavailable, using local limiter");
                self.consume_local(identity)
            }
        }
    }

    fn consume_local(&self, identity: &str) -> Decision {
        match self.fallback.check_key(&identity.to_string()) {
            Ok(()) => Decision::Allowed(Allowance {
                limit: self.limit.max,
                remaining: None,
                reset_after: None,
            }),
            Err(not_until) => Decision::Denied {
                layer: self.layer,
                retry_after: not_until.wait_time_from(DefaultClock::default().now()),
            },
        }
    }

    /// Forget idle fallback state
    pub fn retain_recent(&self) {
        self.fallback.retain_recent();
    }
}

/// Global window on every request, plus the sensitive window on sensitive routes
pub struct AdmissionLimiter {
    enabled: bool,
    global: FixedWindowLimiter,
    sensitive: FixedWindowLimiter,
    sensitive_routes: Vec<String>,
}

impl AdmissionLimiter {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        let global = FixedWindowLimiter::new(
            LimitLayer::Global,
            WindowLimit {
                max: config.global_max,
                window: config.global_window(),
            },
            config.key_prefix.clone(),
            store.clone(),
        );
        let sensitive = FixedWindowLimiter::new(
            LimitLayer::Sensitive,
            WindowLimit {
                max: config.sensitive_max,
                window: config.sensitive_window(),
            },
            config.key_prefix.clone(),
            store,
        );

        Self {
            enabled: config.enabled,
            global,
            sensitive,
            sensitive_routes: config.sensitive_routes.clone(),
        }
    }

    /// Path equals a sensitive route or sits below it
    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive_routes.iter().any(|route| {
            let route = route.trim_end_matches('/');
            path == route
                || path
                    .strip_prefix(route)
                    .map(|rest| rest.starts_with('/'))
                    .unwrap_or(false)
        })
    }

    /// Count the attempt in every applicable layer, then decide.
    pub async fn consume(&self, identity: &str, path: &str) -> Decision {
        if !self.enabled {
            return Decision::Allowed(Allowance {
                limit: self.global.limit().max,
                remaining: None,
                reset_after: None,
            });
        }

        let global = self.global.consume(identity).await;
        let sensitive = if self.is_sensitive(path) {
            Some(self.sensitive.consume(identity).await)
        } else {
            None
        };

        let decision = match (global, sensitive) {
            (_, Some(denied @ Decision::Denied { .. })) => denied,
            (denied @ Decision::Denied { .. }, _) => denied,
            (Decision::Allowed(g), Some(Decision::Allowed(s))) => Decision::Allowed(tighter(g, s)),
            (allowed, None) => allowed,
        };

        match &decision {
            Decision::Allowed(_) => {
                counter!("postbus_admission_allowed_total").increment(1);
            }
            Decision::Denied { layer, retry_after } => {
                counter!("postbus_admission_denied_total", "layer" => layer.as_str()).increment(1);
                debug!(
                    identity = %identity,
                    path = %path,
                    layer = layer.as_str(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Admission denied"
                );
            }
        }

        decision
    }

    pub fn retain_recent(&self) {
        self.global.retain_recent();
        self.sensitive.retain_recent();
    }
}

fn tighter(a: Allowance, b: Allowance) -> Allowance {
    match (a.remaining, b.remaining) {
        (Some(ra), Some(rb)) if rb < ra => b,
        (Some(_), Some(_)) => a,
        (None, Some(_)) => b,
        _ => a,
    }
}
