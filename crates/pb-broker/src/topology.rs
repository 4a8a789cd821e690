//! Exchange and binding model
//!
//! The exchange is declared non-durable: facts in flight are lost when the
//! broker restarts. Delivery is best effort and derived views may go stale.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pb_common::{PostBusError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    Topic,
    Direct,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Direct => "direct",
            Self::Fanout => "fanout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// Non-durable topic exchange
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: false,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    fn describe_conflict(&self, existing: &ExchangeSpec) -> String {
        format!(
            "declared as {}{} but requested as {}{}",
            existing.kind.as_str(),
            if existing.durable { " (durable)" } else { "" },
            self.kind.as_str(),
            if self.durable { " (durable)" } else { "" },
        )
    }
}

/// Exchanges this process has declared.
///
/// Redeclaring an identical spec is a no-op; a differing spec for a known
/// name is a `TopologyConflict`.
#[derive(Debug, Default)]
pub struct DeclaredExchanges {
    specs: DashMap<String, ExchangeSpec>,
}

impl DeclaredExchanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(true)` when an identical spec is already known.
    pub fn check(&self, spec: &ExchangeSpec) -> Result<bool> {
        match self.specs.get(&spec.name) {
            Some(existing) if *existing == *spec => Ok(true),
            Some(existing) => Err(PostBusError::topology_conflict(
                &spec.name,
                spec.describe_conflict(&existing),
            )),
            None => Ok(false),
        }
    }

    /// Record a spec. Returns `Ok(false)` if it was already recorded.
    pub fn record(&self, spec: &ExchangeSpec) -> Result<bool> {
        match self.specs.entry(spec.name.clone()) {
            Entry::Occupied(entry) if entry.get() == spec => Ok(false),
            Entry::Occupied(entry) => Err(PostBusError::topology_conflict(
                &spec.name,
                spec.describe_conflict(entry.get()),
            )),
            Entry::Vacant(entry) => {
                entry.insert(spec.clone());
                Ok(true)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<ExchangeSpec> {
        self.specs.get(name).map(|s| s.clone())
    }

    pub fn all(&self) -> Vec<ExchangeSpec> {
        self.specs.iter().map(|s| s.value().clone()).collect()
    }
}

/// A topic binding pattern. `*` matches exactly one dotted segment and `#`
/// matches zero or more.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingPattern(String);

impl RoutingPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() || pattern.split('.').any(str::is_empty) {
            return Err(PostBusError::Config(format!(
                "invalid routing pattern '{}'",
                pattern
            )));
        }
        Ok(Self(pattern))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        let pattern: Vec<&str> = self.0.split('.').collect();
        let key: Vec<&str> = routing_key.split('.').collect();
        match_segments(&pattern, &key)
    }
}

impl std::fmt::Display for RoutingPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some((&"#", rest)), _) => {
            match_segments(rest, key) || (!key.is_empty() && match_segments(pattern, &key[1..]))
        }
        (Some(_), None) => false,
        (Some((&"*", rest)), Some((_, key_rest))) => match_segments(rest, key_rest),
        (Some((segment, rest)), Some((head, key_rest))) => {
            segment == head && match_segments(rest, key_rest)
        }
    }
}

/// One queue bound to one pattern on one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub pattern: RoutingPattern,
}
