//! In-memory stores for tests and local runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;

use super::indexes::TOMBSTONE_TTL;
use super::{MediaStore, PostStore, SearchIndex};
use crate::domain::{Media, Post, SearchRecord, UpsertOutcome};
use crate::error::{PlatformError, Result};

fn check(unavailable: &AtomicBool, store: &str) -> Result<()> {
    if unavailable.load(Ordering::SeqCst) {
        return Err(PlatformError::store_unavailable(format!("{} store is unavailable", store)));
    }
    Ok(())
}

#[derive(Default)]
pub struct MemoryPostStore {
    posts: RwLock<HashMap<String, Post>>,
    unavailable: AtomicBool,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.posts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.read().is_empty()
    }

    fn live_newest_first(&self) -> Vec<Post> {
        let mut live: Vec<Post> = self
            .posts
            .read()
            .values()
            .filter(|p| !p.is_deleted())
            .cloned()
            .collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        live
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn insert(&self, post: &Post) -> Result<()> {
        check(&self.unavailable, "post")?;
        self.posts.write().insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Post>> {
        check(&self.unavailable, "post")?;
        Ok(self.posts.read().get(id).cloned())
    }

    async fn find_page(&self, skip: u64, limit: u64) -> Result<Vec<Post>> {
        check(&self.unavailable, "post")?;
        Ok(self
            .live_newest_first()
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_live(&self) -> Result<u64> {
        check(&self.unavailable, "post")?;
        Ok(self.posts.read().values().filter(|p| !p.is_deleted()).count() as u64)
    }

    async fn delete_owned(&self, id: &str, user_id: &str) -> Result<Option<Post>> {
        check(&self.unavailable, "post")?;
        let mut posts = self.posts.write();
        match posts.get(id) {
            Some(post) if post.user_id == user_id => Ok(posts.remove(id)),
            _ => Ok(None),
        }
    }

    async fn soft_delete(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Post>> {
        check(&self.unavailable, "post")?;
        let mut posts = self.posts.write();
        Ok(posts.get_mut(id).map(|post| {
            post.deleted_at = Some(at);
            post.clone()
        }))
    }
}

#[derive(Default)]
struct SearchState {
    records: HashMap<String, SearchRecord>,
    /// Deletion time per post id
    tombstones: HashMap<String, Instant>,
}

/// Search projection in memory.
///
/// Tombstones expire after the same TTL the Mongo index applies and are
/// pruned on every removal.
pub struct MemorySearchIndex {
    state: RwLock<SearchState>,
    unavailable: AtomicBool,
    tombstone_ttl: Duration,
}

impl Default for MemorySearchIndex {
    fn default() -> Self {
        Self {
            state: RwLock::default(),
            unavailable: AtomicBool::new(false),
            tombstone_ttl: TOMBSTONE_TTL,
        }
    }
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn is_tombstoned(&self, post_id: &str) -> bool {
        self.state
            .read()
            .tombstones
            .get(post_id)
            .is_some_and(|deleted| self.live(*deleted))
    }

    pub fn tombstone_count(&self) -> usize {
        self.state.read().tombstones.len()
    }

    fn live(&self, deleted: Instant) -> bool {
        deleted.elapsed() < self.tombstone_ttl
    }
}

/// Number of distinct query terms found in `content`, case-insensitive
pub(crate) fn term_score(content: &str, terms: &[String]) -> usize {
    let content = content.to_lowercase();
    terms.iter().filter(|t| content.contains(t.as_str())).count()
}

pub(crate) fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query.split_whitespace().map(|t| t.to_lowercase()).collect();
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, record: &SearchRecord) -> Result<UpsertOutcome> {
        check(&self.unavailable, "search")?;
        let mut state = self.state.write();
        if state.tombstones.get(&record.post_id).is_some_and(|d| self.live(*d)) {
            return Ok(UpsertOutcome::Suppressed);
        }
        match state.records.insert(record.post_id.clone(), record.clone()) {
            Some(_) => Ok(UpsertOutcome::Replaced),
            None => Ok(UpsertOutcome::Inserted),
        }
    }

    async fn remove(&self, post_id: &str) -> Result<bool> {
        check(&self.unavailable, "search")?;
        let mut state = self.state.write();
        state.tombstones.retain(|_, deleted| deleted.elapsed() < self.tombstone_ttl);
        state.tombstones.insert(post_id.to_string(), Instant::now());
        Ok(state.records.remove(post_id).is_some())
    }

    async fn get(&self, post_id: &str) -> Result<Option<SearchRecord>> {
        check(&self.unavailable, "search")?;
        Ok(self.state.read().records.get(post_id).cloned())
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<SearchRecord>> {
        check(&self.unavailable, "search")?;
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        let mut scored: Vec<(usize, &SearchRecord)> = state
            .records
            .values()
            .map(|r| (term_score(&r.content, &terms), r))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| b.created_at.cmp(&a.created_at)));

        Ok(scored
            .into_iter()
            .take(limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryMediaStore {
    media: RwLock<HashMap<String, Media>>,
    unavailable: AtomicBool,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.media.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.read().is_empty()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn insert(&self, media: &Media) -> Result<()> {
        check(&self.unavailable, "media")?;
        self.media.write().insert(media.id.clone(), media.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Media>> {
        check(&self.unavailable, "media")?;
        Ok(self.media.read().get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Media>> {
        check(&self.unavailable, "media")?;
        let mut all: Vec<Media> = self.media.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        check(&self.unavailable, "media")?;
        let mut media = self.media.write();
        Ok(ids.iter().filter(|id| media.remove(id.as_str()).is_some()).count() as u64)
    }
}
