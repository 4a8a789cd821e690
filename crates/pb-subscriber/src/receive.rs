//! Receive loop
//!
//! One loop per bound queue. Deliveries are handled strictly one at a time:
//! decode, dispatch under a timeout, then ack. A fault is requeued once; a
//! second fault goes to the dead-letter sink and is acked.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use metrics::counter;
use pb_broker::{Delivery, Subscription};
use pb_common::{Fact, FactPayload};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::HandlerError;
use crate::registry::FactHandler;

/// What happened to a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handled and acknowledged
    Acked,
    /// Undecodable; acknowledged and discarded
    Dropped,
    /// Faulted on first delivery; returned to the queue
    Requeued,
    /// Faulted on redelivery; sent to the dead-letter sink and acknowledged
    DeadLettered,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Dropped => "dropped",
            Self::Requeued => "requeued",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

/// Why [`ReceiveLoop::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Shutdown,
    /// The delivery stream ended without a shutdown request
    StreamClosed,
}

pub struct ReceiveLoop {
    handler: Arc<dyn FactHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    handler_timeout: Duration,
}

impl ReceiveLoop {
    pub fn new(handler: Arc<dyn FactHandler>, dead_letters: Arc<dyn DeadLetterSink>, handler_timeout: Duration) -> Self {
        Self {
            handler,
            dead_letters,
            handler_timeout,
        }
    }

    /// Drain `subscription` until shutdown is signalled or the stream ends.
    /// On shutdown the subscription is closed, which deletes its queue.
    pub async fn run(&self, mut subscription: Subscription, shutdown: &mut broadcast::Receiver<()>) -> LoopExit {
        info!(queue = %subscription.queue(), handler = %self.handler.name(), "Receive loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => None,
                delivery = subscription.next() => Some(delivery),
            };

            match next {
                None => {
                    info!(queue = %subscription.queue(), "Receive loop shutting down");
                    if let Err(e) = subscription.close().await {
                        warn!(error = %e, "Failed to close subscription");
                    }
                    return LoopExit::Shutdown;
                }
                Some(None) => {
                    warn!(queue = %subscription.queue(), "Delivery stream closed");
                    return LoopExit::StreamClosed;
                }
                Some(Some(delivery)) => {
                    self.process(delivery).await;
                }
            }
        }
    }

    pub async fn process(&self, delivery: Delivery) -> ProcessOutcome {
        let outcome = self.apply(&delivery).await;
        counter!(
            "postbus_deliveries_total",
            "routing_key" => delivery.routing_key.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }

    async fn apply(&self, delivery: &Delivery) -> ProcessOutcome {
        let payload = match FactPayload::decode(&delivery.routing_key, &delivery.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    routing_key = %delivery.routing_key,
                    message_id = ?delivery.message_id,
                    error = %e,
                    "Dropping undecodable delivery"
                );
                self.ack(delivery).await;
                return ProcessOutcome::Dropped;
            }
        };

        let fact = Fact {
            id: delivery
                .message_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            payload,
            published_at: delivery.published_at.unwrap_or_else(Utc::now),
        };

        let result = match tokio::time::timeout(self.handler_timeout, self.handler.handle(&fact)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Timeout(self.handler_timeout)),
        };

        match result {
            Ok(()) => {
                debug!(routing_key = %delivery.routing_key, fact_id = %fact.id, "Fact handled");
                self.ack(delivery).await;
                ProcessOutcome::Acked
            }
            Err(e) if !delivery.redelivered => {
                warn!(
                    routing_key = %delivery.routing_key,
                    fact_id = %fact.id,
                    error = %e,
                    "Handler fault, requeueing once"
                );
                if let Err(e) = delivery.nack(true).await {
                    warn!(fact_id = %fact.id, error = %e, "Failed to nack delivery");
                }
                ProcessOutcome::Requeued
            }
            Err(e) => {
                error!(
                    routing_key = %delivery.routing_key,
                    fact_id = %fact.id,
                    error = %e,
                    "Handler fault on redelivery, dead-lettering"
                );
                let letter = DeadLetter {
                    routing_key: delivery.routing_key.clone(),
                    body: delivery.body.clone(),
                    message_id: delivery.message_id.clone(),
                    reason: e.to_string(),
                };
                if let Err(e) = self.dead_letters.send(letter).await {
                    error!(fact_id = %fact.id, error = %e, "Dead-letter sink failed, dropping");
                }
                self.ack(delivery).await;
                ProcessOutcome::DeadLettered
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack().await {
            // The broker redelivers unacked messages once the channel closes
            warn!(routing_key = %delivery.routing_key, error = %e, "Failed to ack delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pb_broker::Acknowledger;
    use pb_common::{PostBusError, POST_CREATED};
    use pb_platform::PlatformError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Settled {
        Ack,
        Nack { requeue: bool },
    }

    #[derive(Clone, Default)]
    struct RecordingAcker {
        settled: Arc<Mutex<Vec<Settled>>>,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self) -> pb_common::Result<()> {
            self.settled.lock().push(Settled::Ack);
            Ok(())
        }

        async fn nack(&self, requeue: bool) -> pb_common::Result<()> {
            self.settled.lock().push(Settled::Nack { requeue });
            Ok(())
        }
    }

    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    struct MockHandler {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockHandler {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FactHandler for MockHandler {
        fn name(&self) -> &str {
            "mock"
        }

        async fn handle(&self, _fact: &Fact) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(PlatformError::store_unavailable("index down").into()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        letters: Mutex<Vec<DeadLetter>>,
    }

    #[async_trait]
    impl DeadLetterSink for CollectingSink {
        async fn send(&self, letter: DeadLetter) -> pb_common::Result<()> {
            self.letters.lock().push(letter);
            Ok(())
        }
    }

    const CREATED_BODY: &[u8] =
        br#"{"postId":"p1","userId":"u1","content":"hi","createdAt":"2024-01-01T00:00:00Z"}"#;

    fn delivery(body: &[u8], redelivered: bool) -> (Delivery, RecordingAcker) {
        let acker = RecordingAcker::default();
        let delivery = Delivery::new(POST_CREATED, body.to_vec(), acker.clone())
            .with_redelivered(redelivered)
            .with_message_id(Some("m-1".into()));
        (delivery, acker)
    }

    fn receive_loop(handler: Arc<MockHandler>, sink: Arc<CollectingSink>) -> ReceiveLoop {
        ReceiveLoop::new(handler, sink, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_success_acks_after_handler() {
        let handler = MockHandler::new(Behavior::Succeed);
        let sink = Arc::new(CollectingSink::default());
        let rl = receive_loop(handler.clone(), sink);

        let (d, acker) = delivery(CREATED_BODY, false);
        assert_eq!(rl.process(d).await, ProcessOutcome::Acked);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*acker.settled.lock(), vec![Settled::Ack]);
    }

    #[tokio::test]
    async fn test_malformed_is_acked_without_dispatch() {
        let handler = MockHandler::new(Behavior::Succeed);
        let sink = Arc::new(CollectingSink::default());
        let rl = receive_loop(handler.clone(), sink.clone());

        let (d, acker) = delivery(b"{not json", false);
        assert_eq!(rl.process(d).await, ProcessOutcome::Dropped);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*acker.settled.lock(), vec![Settled::Ack]);
        assert!(sink.letters.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fault_requeues_first_delivery_only() {
        let handler = MockHandler::new(Behavior::Fail);
        let sink = Arc::new(CollectingSink::default());
        let rl = receive_loop(handler, sink.clone());

        let (first, first_acker) = delivery(CREATED_BODY, false);
        assert_eq!(rl.process(first).await, ProcessOutcome::Requeued);
        assert_eq!(*first_acker.settled.lock(), vec![Settled::Nack { requeue: true }]);

        let (second, second_acker) = delivery(CREATED_BODY, true);
        assert_eq!(rl.process(second).await, ProcessOutcome::DeadLettered);
        assert_eq!(*second_acker.settled.lock(), vec![Settled::Ack]);

        let letters = sink.letters.lock();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].routing_key, POST_CREATED);
        assert_eq!(letters[0].message_id.as_deref(), Some("m-1"));
        assert_eq!(letters[0].body, CREATED_BODY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_as_fault() {
        let handler = MockHandler::new(Behavior::Hang);
        let sink = Arc::new(CollectingSink::default());
        let rl = ReceiveLoop::new(handler, sink, Duration::from_millis(100));

        let (d, acker) = delivery(CREATED_BODY, false);
        assert_eq!(rl.process(d).await, ProcessOutcome::Requeued);
        assert_eq!(*acker.settled.lock(), vec![Settled::Nack { requeue: true }]);
    }

    #[test]
    fn test_handler_error_maps_to_fault() {
        let err: PostBusError = HandlerError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, PostBusError::HandlerFault(_)));
        assert!(err.is_retryable());
    }
}
