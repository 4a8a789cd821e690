//! Routing key to handler mapping

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use pb_broker::RoutingPattern;
use pb_common::Fact;
use tracing::debug;

use crate::error::Result;

/// Applies a fact to local derived state.
///
/// Implementations must be idempotent: handling the same fact twice leaves
/// the same end state as handling it once.
#[async_trait]
pub trait FactHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, fact: &Fact) -> Result<()>;
}

/// Dispatches each fact to the handler registered for its routing key.
/// Facts with no registered handler are ignored.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn FactHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for an exact routing key, replacing any previous one
    pub fn register(&mut self, routing_key: impl Into<String>, handler: Arc<dyn FactHandler>) -> &mut Self {
        self.handlers.insert(routing_key.into(), handler);
        self
    }

    pub fn with(mut self, routing_key: impl Into<String>, handler: Arc<dyn FactHandler>) -> Self {
        self.register(routing_key, handler);
        self
    }

    pub fn handler_for(&self, routing_key: &str) -> Option<&Arc<dyn FactHandler>> {
        self.handlers.get(routing_key)
    }

    pub fn routing_keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// One binding pattern per registered key
    pub fn patterns(&self) -> pb_common::Result<Vec<RoutingPattern>> {
        self.routing_keys().map(RoutingPattern::new).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl FactHandler for HandlerRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn handle(&self, fact: &Fact) -> Result<()> {
        match self.handler_for(fact.routing_key()) {
            Some(handler) => handler.handle(fact).await,
            None => {
                debug!(routing_key = %fact.routing_key(), fact_id = %fact.id, "No handler registered, ignoring");
                Ok(())
            }
        }
    }
}
