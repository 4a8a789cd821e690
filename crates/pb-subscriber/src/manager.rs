//! Subscription Manager
//!
//! Each `subscribe` call declares a fresh exclusive queue bound to the given
//! patterns and spawns a receive loop for it. When a delivery stream ends
//! without a shutdown request, the loop reconnects the broker (bounded
//! backoff) and resubscribes on a new queue.

use std::sync::Arc;
use std::time::Duration;

use pb_broker::{retry_with_backoff, Backoff, Broker, RoutingPattern, Subscription};
use pb_common::{PostBusError, Result};
use pb_config::{BrokerConfig, SubscriberConfig};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dead_letter::{DeadLetterSink, LoggingDeadLetterSink};
use crate::receive::{LoopExit, ReceiveLoop};
use crate::registry::{FactHandler, HandlerRegistry};

pub struct SubscriptionManager {
    broker: Arc<dyn Broker>,
    exchange: String,
    prefetch: u16,
    backoff: Backoff,
    handler_timeout: Duration,
    dead_letters: Arc<dyn DeadLetterSink>,
    reconnect_lock: Arc<Mutex<()>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(broker: Arc<dyn Broker>, broker_config: &BrokerConfig, subscriber_config: &SubscriberConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            broker,
            exchange: broker_config.exchange.clone(),
            prefetch: broker_config.prefetch,
            backoff: Backoff::from_config(broker_config),
            handler_timeout: subscriber_config.handler_timeout(),
            dead_letters: Arc::new(LoggingDeadLetterSink),
            reconnect_lock: Arc::new(Mutex::new(())),
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = sink;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bind a new exclusive queue to `patterns` and start its receive loop.
    /// Returns the queue name.
    pub async fn subscribe(&self, patterns: &[&str], handler: Arc<dyn FactHandler>) -> Result<String> {
        let patterns = patterns
            .iter()
            .map(|p| RoutingPattern::new(*p))
            .collect::<Result<Vec<_>>>()?;
        self.spawn(patterns, handler).await
    }

    /// One queue bound to every routing key in `registry`
    pub async fn subscribe_registry(&self, registry: HandlerRegistry) -> Result<String> {
        if registry.is_empty() {
            return Err(PostBusError::Config("handler registry is empty".into()));
        }
        let patterns = registry.patterns()?;
        self.spawn(patterns, Arc::new(registry)).await
    }

    async fn spawn(&self, patterns: Vec<RoutingPattern>, handler: Arc<dyn FactHandler>) -> Result<String> {
        let subscription = self.broker.subscribe(&self.exchange, &patterns, self.prefetch).await?;
        let queue = subscription.queue().to_string();

        info!(
            queue = %queue,
            exchange = %self.exchange,
            patterns = ?patterns.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            handler = %handler.name(),
            "Subscribed"
        );

        let worker = Worker {
            broker: self.broker.clone(),
            exchange: self.exchange.clone(),
            patterns,
            prefetch: self.prefetch,
            backoff: self.backoff.clone(),
            reconnect_lock: self.reconnect_lock.clone(),
            receive: ReceiveLoop::new(handler, self.dead_letters.clone(), self.handler_timeout),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(worker.run(subscription, shutdown_rx));
        self.tasks.lock().push(task);

        Ok(queue)
    }

    /// Live receive loops
    pub fn active(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Stop every receive loop and wait for them to close their queues
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Receive loop task failed");
            }
        }
        info!("Subscription manager stopped");
    }
}

struct Worker {
    broker: Arc<dyn Broker>,
    exchange: String,
    patterns: Vec<RoutingPattern>,
    prefetch: u16,
    backoff: Backoff,
    reconnect_lock: Arc<Mutex<()>>,
    receive: ReceiveLoop,
}

impl Worker {
    async fn run(self, mut subscription: Subscription, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            match self.receive.run(subscription, &mut shutdown_rx).await {
                LoopExit::Shutdown => return,
                LoopExit::StreamClosed => {}
            }

            let resubscribed = tokio::select! {
                _ = shutdown_rx.recv() => return,
                result = self.resubscribe() => result,
            };

            match resubscribed {
                Ok(next) => {
                    info!(queue = %next.queue(), bindings = next.bindings().len(), "Resubscribed after stream loss");
                    subscription = next;
                }
                Err(e) => {
                    error!(exchange = %self.exchange, error = %e, "Could not resubscribe, receive loop stopped");
                    return;
                }
            }
        }
    }

    async fn resubscribe(&self) -> Result<Subscription> {
        retry_with_backoff("resubscribe", self.backoff.clone(), || async {
            {
                let _guard = self.reconnect_lock.lock().await;
                if !self.broker.is_connected() {
                    self.broker.reconnect().await?;
                }
            }
            self.broker.subscribe(&self.exchange, &self.patterns, self.prefetch).await
        })
        .await
    }
}
