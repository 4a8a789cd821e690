use std::sync::Arc;

use async_trait::async_trait;
use pb_cache::CacheLayer;
use pb_common::{Fact, FactPayload};
use pb_platform::{SearchIndex, SearchRecord};
use tracing::{debug, info};

use crate::error::Result;
use crate::registry::FactHandler;

/// Maintains the derived search index.
///
/// `post.created` upserts the record; `post.deleted` tombstones and removes
/// it. Both then sweep `search:*`. A cache failure is a fault so the fact is
/// retried; a stale result cache must not outlive the index change.
pub struct SearchProjectionHandler {
    index: Arc<dyn SearchIndex>,
    cache: CacheLayer,
}

impl SearchProjectionHandler {
    pub fn new(index: Arc<dyn SearchIndex>, cache: CacheLayer) -> Self {
        Self { index, cache }
    }
}

#[async_trait]
impl FactHandler for SearchProjectionHandler {
    fn name(&self) -> &str {
        "search-projection"
    }

    async fn handle(&self, fact: &Fact) -> Result<()> {
        match &fact.payload {
            FactPayload::PostCreated(created) => {
                let outcome = self.index.upsert(&SearchRecord::from(created)).await?;
                info!(post_id = %created.post_id, outcome = ?outcome, "Search record applied");
            }
            FactPayload::PostDeleted(deleted) => {
                let removed = self.index.remove(&deleted.post_id).await?;
                info!(post_id = %deleted.post_id, removed = removed, "Search record removed");
            }
        }

        let swept = self.cache.invalidate_search().await?;
        debug!(fact_id = %fact.id, swept = swept, "Search cache swept");
        Ok(())
    }
}
