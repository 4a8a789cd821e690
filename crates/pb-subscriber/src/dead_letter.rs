//! Where faulted deliveries go after their single redelivery

use std::sync::Arc;

use async_trait::async_trait;
use pb_broker::{Broker, OutboundMessage};
use pb_common::Result;
use tracing::error;

/// A delivery that faulted twice
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub reason: String,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, letter: DeadLetter) -> Result<()>;
}

/// Logs and drops
pub struct LoggingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        error!(
            routing_key = %letter.routing_key,
            message_id = ?letter.message_id,
            reason = %letter.reason,
            body = %String::from_utf8_lossy(&letter.body),
            "Dropping delivery after retry"
        );
        Ok(())
    }
}

/// Republishes the original body, under the original routing key, to a
/// dead-letter exchange
pub struct ExchangeDeadLetterSink {
    broker: Arc<dyn Broker>,
    exchange: String,
}

impl ExchangeDeadLetterSink {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for ExchangeDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<()> {
        let message_id = letter
            .message_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let message = OutboundMessage::json(message_id, letter.body);
        self.broker.publish(&self.exchange, &letter.routing_key, message).await
    }
}
