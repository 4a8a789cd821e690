//! Post Service
//!
//! Write path: commit to the store, publish the fact, invalidate the cache.
//! Publishing is advisory; the committed write stands when the broker is
//! down. Read path goes through the cache layer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pb_broker::FactPublisher;
use pb_cache::{keys, CacheLayer};
use pb_common::FactPayload;
use tracing::{info, warn};

use crate::domain::{CreatePost, Post, PostPage};
use crate::error::{PlatformError, Result};
use crate::repository::PostStore;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_LIMIT: u64 = 10;
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Largest skip a MongoDB query accepts
const MAX_SKIP: u64 = i64::MAX as u64;

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn PostStore>,
    publisher: Arc<dyn FactPublisher>,
    cache: CacheLayer,
    post_ttl: Duration,
    page_ttl: Duration,
}

impl PostService {
    pub fn new(store: Arc<dyn PostStore>, publisher: Arc<dyn FactPublisher>, cache: CacheLayer) -> Self {
        Self {
            store,
            publisher,
            cache,
            post_ttl: Duration::from_secs(3600),
            page_ttl: Duration::from_secs(300),
        }
    }

    pub fn with_ttls(mut self, post_ttl: Duration, page_ttl: Duration) -> Self {
        self.post_ttl = post_ttl;
        self.page_ttl = page_ttl;
        self
    }

    pub async fn create_post(&self, user_id: &str, input: CreatePost) -> Result<Post> {
        input.validate()?;

        let post = Post::new(user_id, input.content, input.media_ids);
        self.store.insert(&post).await?;
        info!(post_id = %post.id, user_id = %user_id, "Post created");

        self.publish(FactPayload::PostCreated(post.created_fact())).await;
        self.invalidate(&post.id).await;

        Ok(post)
    }

    pub async fn list_posts(&self, page: Option<u64>, limit: Option<u64>) -> Result<PostPage> {
        let page = page.unwrap_or(DEFAULT_PAGE).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let key = keys::posts_page(page, limit);

        let store = Arc::clone(&self.store);
        let listed = self
            .cache
            .read_through(&key, self.page_ttl, || async move {
                let skip = (page - 1).saturating_mul(limit).min(MAX_SKIP);
                let posts = store.find_page(skip, limit).await?;
                let total = store.count_live().await?;
                Ok::<_, PlatformError>(Some(PostPage::new(posts, page, limit, total)))
            })
            .await?;

        Ok(listed.unwrap_or_else(|| PostPage::new(Vec::new(), page, limit, 0)))
    }

    /// Fetch a live post. Soft-deleted posts are not found.
    pub async fn get_post(&self, id: &str) -> Result<Post> {
        let key = keys::post(id);

        let store = Arc::clone(&self.store);
        let found = self
            .cache
            .read_through(&key, self.post_ttl, || async move {
                Ok::<_, PlatformError>(store.find_by_id(id).await?.filter(|p| !p.is_deleted()))
            })
            .await?;

        found.ok_or_else(|| PlatformError::not_found("Post", id))
    }

    /// Owner-scoped hard delete. A post owned by someone else is not found.
    pub async fn delete_post(&self, id: &str, user_id: &str) -> Result<Post> {
        let post = self
            .store
            .delete_owned(id, user_id)
            .await?
            .ok_or_else(|| PlatformError::not_found("Post", id))?;
        info!(post_id = %id, user_id = %user_id, "Post deleted");

        self.publish(FactPayload::PostDeleted(post.deleted_fact())).await;
        self.invalidate(id).await;

        Ok(post)
    }

    /// Mark a post deleted without removing it. No fact is published.
    pub async fn soft_delete_post(&self, id: &str) -> Result<Post> {
        let post = self
            .store
            .soft_delete(id, Utc::now())
            .await?
            .ok_or_else(|| PlatformError::not_found("Post", id))?;
        info!(post_id = %id, "Post soft-deleted");

        self.invalidate(id).await;
        Ok(post)
    }

    async fn publish(&self, payload: FactPayload) {
        let routing_key = payload.routing_key();
        let post_id = payload.entity_id().to_string();
        if let Err(e) = self.publisher.publish(payload).await {
            warn!(routing_key = %routing_key, post_id = %post_id, error = %e, "Fact not published");
        }
    }

    async fn invalidate(&self, post_id: &str) {
        if let Err(e) = self.cache.invalidate_post(post_id).await {
            warn!(post_id = %post_id, error = %e, "Cache invalidation failed");
        }
    }
}
