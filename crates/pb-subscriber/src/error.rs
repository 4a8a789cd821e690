use std::time::Duration;

use pb_cache::CacheError;
use pb_common::PostBusError;
use pb_platform::PlatformError;
use thiserror::Error;

/// Infrastructure failure while applying a fact. "Not found" conditions are
/// no-ops inside handlers and never surface here.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Store failure: {0}")]
    Store(#[from] PlatformError),

    #[error("Cache failure: {0}")]
    Cache(#[from] CacheError),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),
}

impl From<HandlerError> for PostBusError {
    fn from(err: HandlerError) -> Self {
        PostBusError::HandlerFault(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HandlerError>;
