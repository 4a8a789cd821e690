//! Authoritative stores
//!
//! Each store is a trait so services and handlers can run against MongoDB
//! in production and the in-memory implementations in tests.

pub mod indexes;
pub mod media;
pub mod memory;
pub mod post;
pub mod search;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Media, Post, SearchRecord, UpsertOutcome};
use crate::error::Result;

pub use indexes::ensure_indexes;
pub use media::MongoMediaStore;
pub use memory::{MemoryMediaStore, MemoryPostStore, MemorySearchIndex};
pub use post::MongoPostStore;
pub use search::MongoSearchIndex;

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: &Post) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Post>>;

    /// Live (not soft-deleted) posts, newest first
    async fn find_page(&self, skip: u64, limit: u64) -> Result<Vec<Post>>;

    async fn count_live(&self) -> Result<u64>;

    /// Hard delete scoped to the owner. Returns the removed post.
    async fn delete_owned(&self, id: &str, user_id: &str) -> Result<Option<Post>>;

    /// Mark a post deleted. Returns the updated post.
    async fn soft_delete(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Post>>;
}

/// Derived search index. Keyed by post id; every operation is idempotent.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the record. Suppressed when the post id carries a
    /// deletion tombstone.
    async fn upsert(&self, record: &SearchRecord) -> Result<UpsertOutcome>;

    /// Tombstone the post id and drop its record. Returns whether a record
    /// was present.
    async fn remove(&self, post_id: &str) -> Result<bool>;

    async fn get(&self, post_id: &str) -> Result<Option<SearchRecord>>;

    /// Records matching any term of `query`, most relevant first
    async fn search(&self, query: &str, limit: u64) -> Result<Vec<SearchRecord>>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert(&self, media: &Media) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Media>>;

    async fn find_all(&self) -> Result<Vec<Media>>;

    /// Remove the named records. Missing ids are not an error.
    async fn delete_many(&self, ids: &[String]) -> Result<u64>;
}
