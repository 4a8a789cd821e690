use std::sync::Arc;
use std::time::Duration;

use pb_cache::{keys, CacheLayer};

use crate::domain::SearchRecord;
use crate::error::{PlatformError, Result};
use crate::repository::SearchIndex;

pub const SEARCH_RESULT_LIMIT: u64 = 10;

#[derive(Clone)]
pub struct SearchService {
    index: Arc<dyn SearchIndex>,
    cache: CacheLayer,
    ttl: Duration,
}

impl SearchService {
    pub fn new(index: Arc<dyn SearchIndex>, cache: CacheLayer) -> Self {
        Self {
            index,
            cache,
            ttl: Duration::from_secs(60),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Most relevant records for `query`, at most [`SEARCH_RESULT_LIMIT`]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchRecord>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlatformError::validation("Search query is required"));
        }

        let index = Arc::clone(&self.index);
        let results = self
            .cache
            .read_through(&keys::search(query), self.ttl, || async move {
                Ok::<_, PlatformError>(Some(index.search(query, SEARCH_RESULT_LIMIT).await?))
            })
            .await?;

        Ok(results.unwrap_or_default())
    }
}
