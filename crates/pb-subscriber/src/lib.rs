//! PostBus subscriber side
//!
//! - `SubscriptionManager`: exclusive queue per subscription, one receive
//!   loop per queue, reconnect and resubscribe on stream loss
//! - `ReceiveLoop`: decode, dispatch under a timeout, ack after success,
//!   requeue once, then dead-letter
//! - `HandlerRegistry`: routing key to idempotent handler
//! - handlers: search projection and media reference cleanup

pub mod dead_letter;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod receive;
pub mod registry;

pub use dead_letter::{DeadLetter, DeadLetterSink, ExchangeDeadLetterSink, LoggingDeadLetterSink};
pub use error::{HandlerError, Result};
pub use handlers::{MediaReferenceHandler, SearchProjectionHandler};
pub use manager::SubscriptionManager;
pub use receive::{LoopExit, ProcessOutcome, ReceiveLoop};
pub use registry::{FactHandler, HandlerRegistry};
