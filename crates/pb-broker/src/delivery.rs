use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use pb_common::Result;

use crate::topology::{Binding, RoutingPattern};

/// Settles one delivery with the broker
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A raw message received from a bound queue, not yet decoded.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Set by the broker when this message was requeued at least once
    pub redelivered: bool,
    pub message_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, body: Vec<u8>, acker: impl Acknowledger + 'static) -> Self {
        Self {
            routing_key: routing_key.into(),
            body,
            redelivered: false,
            message_id: None,
            published_at: None,
            acker: Box::new(acker),
        }
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .field("message_id", &self.message_id)
            .finish()
    }
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Tears down the consumer and its exclusive queue
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    async fn cancel(&self) -> Result<()>;
}

/// Pull-based stream of deliveries from one exclusive queue.
///
/// The stream ends when the underlying channel or connection closes.
pub struct Subscription {
    queue: String,
    bindings: Vec<Binding>,
    stream: DeliveryStream,
    handle: Box<dyn SubscriptionHandle>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, stream: DeliveryStream, handle: impl SubscriptionHandle + 'static) -> Self {
        Self {
            queue: queue.into(),
            bindings: Vec::new(),
            stream,
            handle: Box::new(handle),
        }
    }

    /// Record the bindings that feed this queue
    pub fn bound_to(mut self, exchange: &str, patterns: &[RoutingPattern]) -> Self {
        self.bindings = patterns
            .iter()
            .map(|pattern| Binding {
                exchange: exchange.to_string(),
                queue: self.queue.clone(),
                pattern: pattern.clone(),
            })
            .collect();
        self
    }

    /// Broker-assigned queue name
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Cancel the consumer. Unacknowledged deliveries return to the broker.
    pub async fn close(self) -> Result<()> {
        self.handle.cancel().await
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        self.stream.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("bindings", &self.bindings)
            .finish()
    }
}
