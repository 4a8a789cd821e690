//! Process-local broker with topic routing, exclusive queues and requeue.
//! Backs the subscriber and service tests without a live RabbitMQ.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pb_common::{PostBusError, Result};
use tokio::sync::Notify;
use tracing::debug;

use crate::delivery::{Acknowledger, Delivery, Subscription, SubscriptionHandle};
use crate::topology::{DeclaredExchanges, ExchangeSpec, RoutingPattern};
use crate::{Broker, OutboundMessage};

/// Counters for assertions in tests
#[derive(Debug, Default)]
pub struct MemoryBrokerStats {
    published: AtomicU64,
    enqueued: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    requeued: AtomicU64,
}

impl MemoryBrokerStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Copies placed on queues, one per matching binding
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::SeqCst)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::SeqCst)
    }
}

struct MemoryQueue {
    exchange: String,
    patterns: Vec<RoutingPattern>,
    messages: Mutex<VecDeque<Delivery>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryQueue {
    fn accepts(&self, exchange: &str, routing_key: &str) -> bool {
        self.exchange == exchange && self.patterns.iter().any(|p| p.matches(routing_key))
    }

    fn push_back(&self, delivery: Delivery) {
        self.messages.lock().push_back(delivery);
        self.notify.notify_one();
    }

    fn push_front(&self, delivery: Delivery) {
        self.messages.lock().push_front(delivery);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.messages.lock().clear();
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn recv(&self) -> Option<Delivery> {
        loop {
            if self.is_closed() {
                return None;
            }
            let next = self.messages.lock().pop_front();
            if next.is_some() {
                return next;
            }
            self.notify.notified().await;
        }
    }
}

struct MemoryAcker {
    queue: Weak<MemoryQueue>,
    routing_key: String,
    body: Vec<u8>,
    message_id: Option<String>,
    published_at: Option<DateTime<Utc>>,
    stats: Arc<MemoryBrokerStats>,
}

impl MemoryAcker {
    fn delivery(self, redelivered: bool) -> Delivery {
        let routing_key = self.routing_key.clone();
        let body = self.body.clone();
        let message_id = self.message_id.clone();
        let published_at = self.published_at;

        Delivery::new(routing_key, body, self)
            .with_redelivered(redelivered)
            .with_message_id(message_id)
            .with_published_at(published_at)
    }

    fn duplicate(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            routing_key: self.routing_key.clone(),
            body: self.body.clone(),
            message_id: self.message_id.clone(),
            published_at: self.published_at,
            stats: self.stats.clone(),
        }
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.stats.nacked.fetch_add(1, Ordering::SeqCst);
        if !requeue {
            return Ok(());
        }

        if let Some(queue) = self.queue.upgrade().filter(|q| !q.is_closed()) {
            queue.push_front(self.duplicate().delivery(true));
            self.stats.requeued.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

type QueueMap = Arc<Mutex<HashMap<String, Arc<MemoryQueue>>>>;

struct MemorySubscriptionHandle {
    queues: QueueMap,
    name: String,
}

#[async_trait]
impl SubscriptionHandle for MemorySubscriptionHandle {
    async fn cancel(&self) -> Result<()> {
        let removed = self.queues.lock().remove(&self.name);
        if let Some(queue) = removed {
            queue.close();
        }
        Ok(())
    }
}

pub struct InMemoryBroker {
    identifier: String,
    declared: DeclaredExchanges,
    queues: QueueMap,
    connected: AtomicBool,
    closed: AtomicBool,
    stats: Arc<MemoryBrokerStats>,
}

impl InMemoryBroker {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            declared: DeclaredExchanges::new(),
            queues: Arc::new(Mutex::new(HashMap::new())),
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            stats: Arc::new(MemoryBrokerStats::default()),
        }
    }

    pub fn stats(&self) -> &MemoryBrokerStats {
        &self.stats
    }

    /// Live exclusive queues
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Simulate a dropped connection: every exclusive queue is deleted and
    /// every open subscription stream ends.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let drained: Vec<Arc<MemoryQueue>> = self.queues.lock().drain().map(|(_, q)| q).collect();
        for queue in drained {
            queue.close();
        }
        debug!(broker = %self.identifier, "In-memory broker disconnected");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PostBusError::ShutdownInProgress);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        self.ensure_open()?;
        if !self.is_connected() {
            return Err(PostBusError::connection("not connected"));
        }
        self.declared.record(spec)?;
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: OutboundMessage) -> Result<()> {
        self.ensure_open()?;
        if !self.is_connected() {
            return Err(PostBusError::publish("channel is not open"));
        }
        if self.declared.get(exchange).is_none() {
            return Err(PostBusError::publish(format!("no exchange '{}'", exchange)));
        }

        self.stats.published.fetch_add(1, Ordering::SeqCst);

        let targets: Vec<Arc<MemoryQueue>> = self
            .queues
            .lock()
            .values()
            .filter(|q| q.accepts(exchange, routing_key))
            .cloned()
            .collect();

        for queue in targets {
            let acker = MemoryAcker {
                queue: Arc::downgrade(&queue),
                routing_key: routing_key.to_string(),
                body: message.body.clone(),
                message_id: Some(message.message_id.clone()),
                published_at: Some(message.published_at),
                stats: self.stats.clone(),
            };
            queue.push_back(acker.delivery(false));
            self.stats.enqueued.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }

    async fn subscribe(&self, exchange: &str, patterns: &[RoutingPattern], _prefetch: u16) -> Result<Subscription> {
        self.ensure_open()?;
        if !self.is_connected() {
            return Err(PostBusError::connection("not connected"));
        }
        if self.declared.get(exchange).is_none() {
            return Err(PostBusError::connection(format!("no exchange '{}'", exchange)));
        }

        let name = format!("amq.gen-{}", uuid::Uuid::new_v4().simple());
        let queue = Arc::new(MemoryQueue {
            exchange: exchange.to_string(),
            patterns: patterns.to_vec(),
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.queues.lock().insert(name.clone(), queue.clone());

        let stream = futures::stream::unfold(queue, |queue| async move {
            let delivery = queue.recv().await?;
            Some((delivery, queue))
        });

        Ok(Subscription::new(
            name.clone(),
            Box::pin(stream),
            MemorySubscriptionHandle {
                queues: self.queues.clone(),
                name,
            },
        )
        .bound_to(exchange, patterns))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.ensure_open()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.disconnect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    const EXCHANGE: &str = "x_events";

    async fn broker() -> InMemoryBroker {
        let broker = InMemoryBroker::new("test");
        broker.declare_exchange(&ExchangeSpec::topic(EXCHANGE)).await.unwrap();
        broker
    }

    fn patterns(p: &[&str]) -> Vec<RoutingPattern> {
        p.iter().map(|p| RoutingPattern::new(*p).unwrap()).collect()
    }

    fn message(body: &str) -> OutboundMessage {
        OutboundMessage::json("m-1", body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_fanout_to_every_matching_queue() {
        let broker = broker().await;
        let mut search = broker.subscribe(EXCHANGE, &patterns(&["post.*"]), 1).await.unwrap();
        let mut media = broker.subscribe(EXCHANGE, &patterns(&["post.deleted"]), 1).await.unwrap();

        broker.publish(EXCHANGE, "post.created", message("a")).await.unwrap();
        broker.publish(EXCHANGE, "post.deleted", message("b")).await.unwrap();

        assert_eq!(search.next().await.unwrap().body, b"a");
        assert_eq!(search.next().await.unwrap().body, b"b");
        assert_eq!(media.next().await.unwrap().routing_key, "post.deleted");
        assert_eq!(broker.stats().enqueued(), 3);
    }

    #[tokio::test]
    async fn test_publish_without_bindings_is_dropped() {
        let broker = broker().await;
        broker.publish(EXCHANGE, "post.created", message("a")).await.unwrap();

        assert_eq!(broker.stats().published(), 1);
        assert_eq!(broker.stats().enqueued(), 0);
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers_first() {
        let broker = broker().await;
        let mut sub = broker.subscribe(EXCHANGE, &patterns(&["#"]), 1).await.unwrap();

        broker.publish(EXCHANGE, "post.created", message("first")).await.unwrap();
        broker.publish(EXCHANGE, "post.created", message("second")).await.unwrap();

        let first = sub.next().await.unwrap();
        assert!(!first.redelivered);
        first.nack(true).await.unwrap();

        let again = sub.next().await.unwrap();
        assert_eq!(again.body, b"first");
        assert!(again.redelivered);
        assert_eq!(again.message_id.as_deref(), Some("m-1"));
        again.ack().await.unwrap();

        assert_eq!(sub.next().await.unwrap().body, b"second");
        assert_eq!(broker.stats().requeued(), 1);
        assert_eq!(broker.stats().acked(), 1);
    }

    #[tokio::test]
    async fn test_close_deletes_queue_and_ends_stream() {
        let broker = broker().await;
        let sub = broker.subscribe(EXCHANGE, &patterns(&["#"]), 1).await.unwrap();
        assert_eq!(broker.queue_count(), 1);

        sub.close().await.unwrap();
        assert_eq!(broker.queue_count(), 0);

        broker.publish(EXCHANGE, "post.created", message("a")).await.unwrap();
        assert_eq!(broker.stats().enqueued(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams_and_fails_publish() {
        let broker = broker().await;
        let mut sub = broker.subscribe(EXCHANGE, &patterns(&["#"]), 1).await.unwrap();

        broker.disconnect();
        let next = tokio::time::timeout(Duration::from_secs(1), sub.next()).await.unwrap();
        assert!(next.is_none());

        let err = broker.publish(EXCHANGE, "post.created", message("a")).await.unwrap_err();
        assert!(matches!(err, PostBusError::Publish(_)));
        assert!(broker.subscribe(EXCHANGE, &patterns(&["#"]), 1).await.is_err());

        broker.reconnect().await.unwrap();
        assert!(broker.is_connected());
        assert!(broker.subscribe(EXCHANGE, &patterns(&["#"]), 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscription_reports_bindings() {
        let broker = broker().await;
        let sub = broker
            .subscribe(EXCHANGE, &patterns(&["post.created", "post.deleted"]), 1)
            .await
            .unwrap();

        let bound: Vec<&str> = sub.bindings().iter().map(|b| b.pattern.as_str()).collect();
        assert_eq!(bound, vec!["post.created", "post.deleted"]);
        assert!(sub.bindings().iter().all(|b| b.exchange == EXCHANGE && b.queue == sub.queue()));
    }

    #[tokio::test]
    async fn test_closed_broker_refuses_work() {
        let broker = broker().await;
        broker.close().await.unwrap();

        let err = broker.publish(EXCHANGE, "post.created", message("a")).await.unwrap_err();
        assert!(matches!(err, PostBusError::ShutdownInProgress));
        assert!(!err.is_retryable());
        assert!(matches!(broker.reconnect().await, Err(PostBusError::ShutdownInProgress)));
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_exchange() {
        let broker = InMemoryBroker::new("test");
        let err = broker.publish("x_missing", "post.created", message("a")).await.unwrap_err();
        assert!(matches!(err, PostBusError::Publish(_)));
    }

    #[tokio::test]
    async fn test_conflicting_redeclare() {
        let broker = broker().await;
        broker.declare_exchange(&ExchangeSpec::topic(EXCHANGE)).await.unwrap();

        let err = broker
            .declare_exchange(&ExchangeSpec::topic(EXCHANGE).durable(true))
            .await
            .unwrap_err();
        assert!(matches!(err, PostBusError::TopologyConflict { .. }));
    }
}
