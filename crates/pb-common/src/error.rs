use thiserror::Error;

/// Failure to turn a broker delivery into a typed Fact.
///
/// Decode errors are terminal: the delivery is acknowledged and dropped,
/// never redelivered.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown routing key: {0}")]
    UnknownRoutingKey(String),

    #[error("Malformed payload for {routing_key}: {source}")]
    Malformed {
        routing_key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid payload for {routing_key}: {message}")]
    Invalid { routing_key: String, message: String },
}

#[derive(Debug, Error)]
pub enum PostBusError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Topology conflict on exchange '{exchange}': {detail}")]
    TopologyConflict { exchange: String, detail: String },

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Handler fault: {0}")]
    HandlerFault(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Rate limit exceeded for {identity}, retry after {retry_after_secs}s")]
    RateLimitExceeded { identity: String, retry_after_secs: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

impl PostBusError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish(message.into())
    }

    pub fn topology_conflict(exchange: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TopologyConflict {
            exchange: exchange.into(),
            detail: detail.into(),
        }
    }

    /// Transient infrastructure failures that a caller may retry or degrade around.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Publish(_) | Self::HandlerFault(_) | Self::CacheUnavailable(_)
        )
    }

    /// Programmer or deployment errors. Retrying cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TopologyConflict { .. } | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, PostBusError>;
