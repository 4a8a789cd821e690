use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use pb_common::{Fact, FactPayload, PostBusError, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{retry_with_backoff, Backoff, Broker, OutboundMessage, JSON_CONTENT_TYPE};

/// Routes facts onto the exchange
#[async_trait]
pub trait FactPublisher: Send + Sync {
    /// Serialize and publish. Fails with `Publish` when the channel is not open.
    async fn publish(&self, payload: FactPayload) -> Result<Fact>;
}

/// Publisher over a shared broker.
///
/// A failed publish on a dead connection starts one background reconnect;
/// the failing call returns at once and later publishes go through once the
/// adapter is back.
pub struct BrokerPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
    backoff: Backoff,
    reconnect_lock: Arc<Mutex<()>>,
}

impl BrokerPublisher {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
            backoff: Backoff::new(Duration::from_millis(200), Duration::from_secs(10), 10),
            reconnect_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn spawn_reconnect(&self) {
        // A reconnect already in flight covers this failure too
        let Ok(guard) = self.reconnect_lock.clone().try_lock_owned() else {
            return;
        };
        let broker = self.broker.clone();
        let backoff = self.backoff.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let result = retry_with_backoff("publisher reconnect", backoff, || async {
                if broker.is_connected() {
                    return Ok(());
                }
                broker.reconnect().await
            })
            .await;

            match result {
                Ok(()) => info!(broker = %broker.identifier(), "Publisher connection restored"),
                Err(e) => warn!(broker = %broker.identifier(), error = %e, "Publisher reconnect gave up"),
            }
        });
    }
}

#[async_trait]
impl FactPublisher for BrokerPublisher {
    async fn publish(&self, payload: FactPayload) -> Result<Fact> {
        let fact = Fact::new(payload);
        let routing_key = fact.routing_key();

        let body = fact
            .payload
            .encode()
            .map_err(|e| PostBusError::publish(format!("failed to encode {}: {}", routing_key, e)))?;

        let message = OutboundMessage {
            body,
            message_id: fact.id.clone(),
            published_at: fact.published_at,
            content_type: JSON_CONTENT_TYPE.to_string(),
        };

        if let Err(e) = self.broker.publish(&self.exchange, routing_key, message).await {
            counter!("postbus_publish_failures_total", "routing_key" => routing_key).increment(1);
            if matches!(e, PostBusError::Connection(_) | PostBusError::Publish(_)) && !self.broker.is_connected() {
                self.spawn_reconnect();
            }
            return Err(e);
        }

        counter!("postbus_facts_published_total", "routing_key" => routing_key).increment(1);
        debug!(
            exchange = %self.exchange,
            routing_key = %routing_key,
            fact_id = %fact.id,
            entity_id = %fact.payload.entity_id(),
            "Fact published"
        );

        Ok(fact)
    }
}
