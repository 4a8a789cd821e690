use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::keys::{self, namespace_of, CacheNamespace};
use crate::{CacheStore, Result};

/// JSON cache over a [`CacheStore`]
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.put(key, bytes, ttl).await
    }

    /// Return the cached value for `key`, or compute it with `fetch` and
    /// populate the entry.
    ///
    /// A store failure or an undecodable entry counts as a miss. `None` from
    /// `fetch` is returned as-is and never cached. Concurrent misses on the
    /// same key may both populate it; the last write wins.
    pub async fn read_through<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        let namespace = namespace_of(key).to_string();

        match self.get_json::<T>(key).await {
            Ok(Some(value)) => {
                counter!("postbus_cache_hits_total", "namespace" => namespace).increment(1);
                return Ok(Some(value));
            }
            Ok(None) => {
                counter!("postbus_cache_misses_total", "namespace" => namespace).increment(1);
            }
            Err(e) => {
                counter!("postbus_cache_unavailable_total", "namespace" => namespace).increment(1);
                warn!(key = %key, error = %e, "Cache read failed, falling back to store");
            }
        }

        let value = fetch().await?;

        if let Some(ref value) = value {
            if let Err(e) = self.put_json(key, value, ttl).await {
                warn!(key = %key, error = %e, "Failed to populate cache entry");
            } else {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache entry populated");
            }
        }

        Ok(value)
    }

    /// Delete `direct` keys and every key in the `sweep` namespaces.
    /// Idempotent: concurrent invalidations converge.
    pub async fn invalidate_keys(&self, direct: &[String], sweep: &[CacheNamespace]) -> Result<u64> {
        let mut targets: Vec<String> = direct.to_vec();
        for namespace in sweep {
            targets.extend(self.store.keys_with_prefix(&namespace.prefix()).await?);
        }
        targets.sort();
        targets.dedup();

        let removed = self.store.delete(&targets).await?;
        counter!("postbus_cache_invalidated_keys_total").increment(removed);
        debug!(direct = ?direct, sweep = ?sweep, removed = removed, "Cache invalidated");
        Ok(removed)
    }

    pub async fn invalidate(&self, key: &str, sweep: &[CacheNamespace]) -> Result<u64> {
        self.invalidate_keys(&[key.to_string()], sweep).await
    }

    pub async fn sweep(&self, namespace: CacheNamespace) -> Result<u64> {
        self.invalidate_keys(&[], &[namespace]).await
    }

    /// `post:<id>` plus every `posts:*` page
    pub async fn invalidate_post(&self, post_id: &str) -> Result<u64> {
        self.invalidate(&keys::post(post_id), &[CacheNamespace::Posts]).await
    }

    /// Every `search:*` result
    pub async fn invalidate_search(&self) -> Result<u64> {
        self.sweep(CacheNamespace::Search).await
    }

    /// `media:<id>` for each id plus every `media:*` entry
    pub async fn invalidate_media(&self, media_ids: &[String]) -> Result<u64> {
        let direct: Vec<String> = media_ids.iter().map(|id| keys::media(id)).collect();
        self.invalidate_keys(&direct, &[CacheNamespace::Media]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheError, MemoryCacheStore};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: String,
        content: String,
    }

    fn post(id: &str, content: &str) -> Post {
        Post {
            id: id.into(),
            content: content.into(),
        }
    }

    fn layer() -> (Arc<MemoryCacheStore>, CacheLayer) {
        let store = Arc::new(MemoryCacheStore::new());
        (store.clone(), CacheLayer::new(store))
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_read_through_populates_on_miss() {
        let (store, cache) = layer();
        let fetches = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: std::result::Result<Option<Post>, CacheError> = cache
                .read_through("post:p1", HOUR, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(post("p1", "hi")))
                })
                .await;
            assert_eq!(value.unwrap(), Some(post("p1", "hi")));
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(store.contains("post:p1"));
    }

    #[tokio::test]
    async fn test_populated_entry_uses_the_requested_key() {
        let (store, cache) = layer();
        let value = post("p1", "hi");

        let _: std::result::Result<Option<Post>, CacheError> = cache
            .read_through("post:p1", HOUR, || async { Ok(Some(value.clone())) })
            .await;

        // The entry must live under the key and hold the value, never the reverse
        let raw = store.get("post:p1").await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Post>(&raw).unwrap(), value);
        let serialized = String::from_utf8(serde_json::to_vec(&value).unwrap()).unwrap();
        assert!(!store.contains(&serialized));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_absence_is_not_cached() {
        let (store, cache) = layer();

        let value: std::result::Result<Option<Post>, CacheError> =
            cache.read_through("post:missing", HOUR, || async { Ok(None) }).await;

        assert_eq!(value.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_a_forced_miss() {
        let (store, cache) = layer();
        store.set_unavailable(true);

        let value: std::result::Result<Option<Post>, CacheError> = cache
            .read_through("post:p1", HOUR, || async { Ok(Some(post("p1", "hi"))) })
            .await;

        assert_eq!(value.unwrap(), Some(post("p1", "hi")));
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let (_, cache) = layer();

        let value: std::result::Result<Option<Post>, &str> =
            cache.read_through("post:p1", HOUR, || async { Err("store down") }).await;

        assert_eq!(value.unwrap_err(), "store down");
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_replaced() {
        let (store, cache) = layer();
        store.put("post:p1", b"not json".to_vec(), HOUR).await.unwrap();

        let value: std::result::Result<Option<Post>, CacheError> = cache
            .read_through("post:p1", HOUR, || async { Ok(Some(post("p1", "fresh"))) })
            .await;

        assert_eq!(value.unwrap(), Some(post("p1", "fresh")));
        assert_eq!(cache.get_json::<Post>("post:p1").await.unwrap(), Some(post("p1", "fresh")));
    }

    #[tokio::test]
    async fn test_write_invalidates_direct_key_and_listing_pages() {
        let (store, cache) = layer();
        cache.put_json("post:p1", &post("p1", "old"), HOUR).await.unwrap();
        cache.put_json("post:p2", &post("p2", "other"), HOUR).await.unwrap();
        cache.put_json("posts:1:10", &vec![post("p1", "old")], HOUR).await.unwrap();
        cache.put_json("posts:2:10", &Vec::<Post>::new(), HOUR).await.unwrap();

        let removed = cache.invalidate_post("p1").await.unwrap();

        assert_eq!(removed, 3);
        assert!(!store.contains("post:p1"));
        assert!(!store.contains("posts:1:10"));
        assert!(!store.contains("posts:2:10"));
        assert!(store.contains("post:p2"));

        // A second invalidation is a no-op
        assert_eq!(cache.invalidate_post("p1").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_write_before_ttl_misses() {
        let (_, cache) = layer();
        let fetch = |content: &'static str| move || async move { Ok::<_, CacheError>(Some(post("p1", content))) };

        let first = cache.read_through("post:p1", HOUR, fetch("v1")).await.unwrap();
        assert_eq!(first, Some(post("p1", "v1")));

        tokio::time::advance(Duration::from_secs(60)).await;
        cache.invalidate_post("p1").await.unwrap();

        let second = cache.read_through("post:p1", HOUR, fetch("v2")).await.unwrap();
        assert_eq!(second, Some(post("p1", "v2")));
    }

    #[tokio::test]
    async fn test_media_and_search_invalidation() {
        let (store, cache) = layer();
        cache.put_json("media:m1", &"m1", HOUR).await.unwrap();
        cache.put_json("media:all", &vec!["m1", "m2"], HOUR).await.unwrap();
        cache.put_json("search:hi", &vec!["p1"], HOUR).await.unwrap();
        cache.put_json("search:rust", &Vec::<String>::new(), HOUR).await.unwrap();

        assert_eq!(cache.invalidate_media(&["m1".into(), "m9".into()]).await.unwrap(), 2);
        assert_eq!(cache.invalidate_search().await.unwrap(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_fails_when_store_down() {
        let (store, cache) = layer();
        store.set_unavailable(true);
        assert!(matches!(cache.invalidate_post("p1").await, Err(CacheError::Unavailable(_))));
    }
}
