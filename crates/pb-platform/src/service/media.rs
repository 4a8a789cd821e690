use std::sync::Arc;
use std::time::Duration;

use pb_cache::{keys, CacheLayer};

use crate::domain::Media;
use crate::error::{PlatformError, Result};
use crate::repository::MediaStore;

#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn MediaStore>,
    cache: CacheLayer,
    ttl: Duration,
}

impl MediaService {
    pub fn new(store: Arc<dyn MediaStore>, cache: CacheLayer) -> Self {
        Self {
            store,
            cache,
            ttl: Duration::from_secs(300),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn get_media(&self, id: &str) -> Result<Media> {
        let store = Arc::clone(&self.store);
        let found = self
            .cache
            .read_through(&keys::media(id), self.ttl, || async move {
                Ok::<_, PlatformError>(store.find_by_id(id).await?)
            })
            .await?;

        found.ok_or_else(|| PlatformError::not_found("Media", id))
    }

    pub async fn list_media(&self) -> Result<Vec<Media>> {
        let store = Arc::clone(&self.store);
        let all = self
            .cache
            .read_through(&keys::media_all(), self.ttl, || async move {
                Ok::<_, PlatformError>(Some(store.find_all().await?))
            })
            .await?;

        Ok(all.unwrap_or_default())
    }
}
