use std::sync::Arc;

use async_trait::async_trait;
use pb_cache::CacheLayer;
use pb_common::{Fact, FactPayload};
use pb_platform::MediaStore;
use tracing::{debug, info};

use crate::error::Result;
use crate::registry::FactHandler;

/// Drops media records referenced by a deleted post, then invalidates
/// `media:<id>` for each and sweeps `media:*`
pub struct MediaReferenceHandler {
    store: Arc<dyn MediaStore>,
    cache: CacheLayer,
}

impl MediaReferenceHandler {
    pub fn new(store: Arc<dyn MediaStore>, cache: CacheLayer) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl FactHandler for MediaReferenceHandler {
    fn name(&self) -> &str {
        "media-references"
    }

    async fn handle(&self, fact: &Fact) -> Result<()> {
        let FactPayload::PostDeleted(deleted) = &fact.payload else {
            debug!(routing_key = %fact.routing_key(), "Not a deletion, ignoring");
            return Ok(());
        };

        if deleted.media_ids.is_empty() {
            return Ok(());
        }

        let removed = self.store.delete_many(&deleted.media_ids).await?;
        self.cache.invalidate_media(&deleted.media_ids).await?;

        info!(
            post_id = %deleted.post_id,
            referenced = deleted.media_ids.len(),
            removed = removed,
            "Media references removed"
        );
        Ok(())
    }
}
