//! PostBus platform
//!
//! - Domain entities: posts, derived search records, media metadata
//! - Authoritative stores behind traits (MongoDB and in-memory)
//! - Post, search and media services that publish facts and read through
//!   the cache

pub mod domain;
pub mod error;
pub mod repository;
pub mod service;

pub use domain::*;
pub use error::{PlatformError, Result};
pub use repository::{MediaStore, PostStore, SearchIndex};
pub use service::{MediaService, PostService, SearchService};
