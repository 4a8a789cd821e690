//! Broker adapter and fact publisher
//!
//! - `Broker`: owns the connection, declares the topic exchange, publishes
//!   raw messages and opens exclusive, auto-deleting subscriptions.
//! - `AmqpBroker`: RabbitMQ implementation over lapin. Publishing and each
//!   subscription use separate channels.
//! - `InMemoryBroker`: process-local implementation for tests.
//! - `BrokerPublisher`: serializes facts and routes them by key.

pub mod amqp;
pub mod backoff;
pub mod delivery;
pub mod memory;
pub mod publisher;
pub mod topology;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pb_common::Result;

pub use amqp::AmqpBroker;
pub use backoff::{retry_with_backoff, Backoff};
pub use delivery::{Acknowledger, Delivery, DeliveryStream, Subscription, SubscriptionHandle};
pub use memory::{InMemoryBroker, MemoryBrokerStats};
pub use publisher::{BrokerPublisher, FactPublisher};
pub use topology::{Binding, DeclaredExchanges, ExchangeKind, ExchangeSpec, RoutingPattern};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message ready to be routed onto an exchange
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub message_id: String,
    pub published_at: DateTime<Utc>,
    pub content_type: String,
}

impl OutboundMessage {
    pub fn json(message_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            body,
            message_id: message_id.into(),
            published_at: Utc::now(),
            content_type: JSON_CONTENT_TYPE.to_string(),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Name used in logs and consumer tags
    fn identifier(&self) -> &str;

    /// Declare an exchange. Idempotent for identical parameters; conflicting
    /// parameters fail with `TopologyConflict`.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()>;

    /// Fire-and-forget publish. No confirm is awaited.
    async fn publish(&self, exchange: &str, routing_key: &str, message: OutboundMessage) -> Result<()>;

    /// Create a fresh exclusive queue bound to `patterns` and start consuming.
    async fn subscribe(&self, exchange: &str, patterns: &[RoutingPattern], prefetch: u16) -> Result<Subscription>;

    fn is_connected(&self) -> bool;

    /// Re-establish the connection and redeclare known exchanges
    async fn reconnect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
