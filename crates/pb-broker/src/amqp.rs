//! RabbitMQ broker over lapin

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use futures::{future, StreamExt};
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::RwLock;
use pb_common::{PostBusError, Result};
use pb_config::BrokerConfig;
use tracing::{debug, info, warn};

use crate::backoff::{retry_with_backoff, Backoff};
use crate::delivery::{Acknowledger, Delivery, Subscription, SubscriptionHandle};
use crate::topology::{DeclaredExchanges, ExchangeKind, ExchangeSpec, RoutingPattern};
use crate::{Broker, OutboundMessage};

struct AmqpState {
    connection: Connection,
    publish_channel: Channel,
}

pub struct AmqpBroker {
    url: String,
    identifier: String,
    state: RwLock<Option<Arc<AmqpState>>>,
    declared: DeclaredExchanges,
    closed: AtomicBool,
}

impl AmqpBroker {
    /// Single connection attempt
    pub async fn connect(url: &str, identifier: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        let state = open(url).await?;
        info!(broker = %identifier, "Connected to RabbitMQ");

        Ok(Self {
            url: url.to_string(),
            identifier,
            state: RwLock::new(Some(Arc::new(state))),
            declared: DeclaredExchanges::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Connect with bounded exponential backoff
    pub async fn connect_with_retry(config: &BrokerConfig, identifier: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        retry_with_backoff("rabbitmq connect", Backoff::from_config(config), || {
            Self::connect(&config.url, identifier.clone())
        })
        .await
    }

    fn current(&self) -> Option<Arc<AmqpState>> {
        self.state.read().clone()
    }

    fn connection(&self) -> Result<Arc<AmqpState>> {
        match self.current() {
            Some(state) if state.connection.status().connected() => Ok(state),
            Some(_) => Err(PostBusError::connection("not connected to RabbitMQ")),
            None => Err(PostBusError::ShutdownInProgress),
        }
    }

    async fn declare_on_broker(&self, state: &AmqpState, spec: &ExchangeSpec) -> Result<()> {
        // A conflicting redeclare closes the channel, so never use a shared one
        let channel = state
            .connection
            .create_channel()
            .await
            .map_err(|e| PostBusError::connection(format!("failed to create channel: {}", e)))?;

        let result = channel
            .exchange_declare(
                &spec.name,
                lapin_kind(spec.kind),
                ExchangeDeclareOptions {
                    durable: spec.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                    passive: false,
                },
                FieldTable::default(),
            )
            .await;

        match result {
            Ok(()) => {
                if let Err(e) = channel.close(200, "declared").await {
                    debug!(error = %e, "Failed to close declare channel");
                }
                Ok(())
            }
            Err(e) if is_precondition_failed(&e) => Err(PostBusError::topology_conflict(&spec.name, e.to_string())),
            Err(e) => Err(PostBusError::connection(format!(
                "failed to declare exchange {}: {}",
                spec.name, e
            ))),
        }
    }
}

async fn open(url: &str) -> Result<AmqpState> {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| PostBusError::connection(format!("failed to connect to RabbitMQ: {}", e)))?;

    let publish_channel = connection
        .create_channel()
        .await
        .map_err(|e| PostBusError::connection(format!("failed to create publish channel: {}", e)))?;

    Ok(AmqpState {
        connection,
        publish_channel,
    })
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

fn is_precondition_failed(error: &lapin::Error) -> bool {
    matches!(
        error,
        lapin::Error::ProtocolError(amqp) if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED))
    )
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let message_id = delivery.properties.message_id().as_ref().map(|id| id.to_string());
    let published_at = (*delivery.properties.timestamp()).and_then(|secs| DateTime::from_timestamp(secs as i64, 0));

    Delivery::new(
        delivery.routing_key.as_str(),
        delivery.data,
        AmqpAcker(delivery.acker),
    )
    .with_redelivered(delivery.redelivered)
    .with_message_id(message_id)
    .with_published_at(published_at)
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| PostBusError::connection(format!("ack failed: {}", e)))
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| PostBusError::connection(format!("nack failed: {}", e)))
    }
}

struct AmqpSubscriptionHandle {
    channel: Channel,
    consumer_tag: String,
    queue: String,
}

#[async_trait]
impl SubscriptionHandle for AmqpSubscriptionHandle {
    async fn cancel(&self) -> Result<()> {
        if !self.channel.status().connected() {
            return Ok(());
        }

        if let Err(e) = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(queue = %self.queue, error = %e, "Failed to cancel consumer");
        }

        // The cancel above removed the only consumer, so auto_delete has dropped the queue
        self.channel
            .close(200, "subscription closed")
            .await
            .map_err(|e| PostBusError::connection(format!("failed to close channel: {}", e)))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        if self.declared.check(spec)? {
            return Ok(());
        }

        let state = self.connection()?;
        self.declare_on_broker(&state, spec).await?;
        self.declared.record(spec)?;

        info!(
            exchange = %spec.name,
            kind = spec.kind.as_str(),
            durable = spec.durable,
            "Exchange declared"
        );
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: OutboundMessage) -> Result<()> {
        let state = self
            .current()
            .ok_or(PostBusError::ShutdownInProgress)?;

        if !state.publish_channel.status().connected() {
            return Err(PostBusError::publish("publish channel is not open"));
        }

        let properties = BasicProperties::default()
            .with_message_id(ShortString::from(message.message_id))
            .with_timestamp(message.published_at.timestamp().max(0) as u64)
            .with_content_type(ShortString::from(message.content_type));

        // The returned confirm is dropped: confirms are not enabled on this channel
        state
            .publish_channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| PostBusError::publish(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, exchange: &str, patterns: &[RoutingPattern], prefetch: u16) -> Result<Subscription> {
        let state = self.connection()?;

        let channel = state
            .connection
            .create_channel()
            .await
            .map_err(|e| PostBusError::connection(format!("failed to create consumer channel: {}", e)))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| PostBusError::connection(format!("failed to set prefetch: {}", e)))?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PostBusError::connection(format!("failed to declare queue: {}", e)))?;
        let queue_name = queue.name().as_str().to_string();

        for pattern in patterns {
            channel
                .queue_bind(
                    &queue_name,
                    exchange,
                    pattern.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    PostBusError::connection(format!(
                        "failed to bind {} to {} with {}: {}",
                        queue_name, exchange, pattern, e
                    ))
                })?;
        }

        let consumer_tag = format!("{}-{}", self.identifier, uuid::Uuid::new_v4().simple());
        let consumer = channel
            .basic_consume(
                &queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PostBusError::connection(format!("failed to start consumer: {}", e)))?;

        let logged_queue = queue_name.clone();
        let stream = consumer
            .inspect(move |item| {
                if let Err(e) = item {
                    warn!(queue = %logged_queue, error = %e, "Consumer stream failed");
                }
            })
            .take_while(|item| future::ready(item.is_ok()))
            .filter_map(|item| future::ready(item.ok()))
            .map(into_delivery);

        info!(
            queue = %queue_name,
            exchange = %exchange,
            patterns = ?patterns.iter().map(RoutingPattern::as_str).collect::<Vec<_>>(),
            prefetch = prefetch,
            "Subscribed"
        );

        Ok(Subscription::new(
            queue_name.clone(),
            Box::pin(stream),
            AmqpSubscriptionHandle {
                channel,
                consumer_tag,
                queue: queue_name,
            },
        )
        .bound_to(exchange, patterns))
    }

    fn is_connected(&self) -> bool {
        self.current()
            .map(|state| state.connection.status().connected())
            .unwrap_or(false)
    }

    async fn reconnect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PostBusError::ShutdownInProgress);
        }
        let state = Arc::new(open(&self.url).await?);

        // Non-durable exchanges do not survive a broker restart
        for spec in self.declared.all() {
            self.declare_on_broker(&state, &spec).await?;
        }

        let previous = self.state.write().replace(state);
        if let Some(previous) = previous {
            if previous.connection.status().connected() {
                let _ = previous.connection.close(200, "reconnected").await;
            }
        }

        info!(broker = %self.identifier, "Reconnected to RabbitMQ");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let state = self.state.write().take();
        if let Some(state) = state {
            if state.connection.status().connected() {
                state
                    .connection
                    .close(200, "shutdown")
                    .await
                    .map_err(|e| PostBusError::connection(format!("failed to close connection: {}", e)))?;
            }
            info!(broker = %self.identifier, "RabbitMQ connection closed");
        }
        Ok(())
    }
}
