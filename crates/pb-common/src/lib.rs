//! PostBus shared types
//!
//! - Fact: the immutable record that flows over the topic exchange
//! - FactPayload: per-routing-key payload schemas, validated at decode time
//! - PostBusError: the error taxonomy shared by every messaging/caching component
//! - logging: tracing subscriber initialisation for the service binaries

pub mod error;
pub mod fact;
pub mod logging;

pub use error::{DecodeError, PostBusError, Result};
pub use fact::{Fact, FactPayload, PostCreated, PostDeleted, POST_CREATED, POST_DELETED};
pub use logging::{init_tracing, LogFormat};
