//! Read-through cache that prefers the network and falls back to stored data
//! only when the backend cannot be reached.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheResult, Cacheable, EntityKey, QueryKey};
use crate::error::Result;

/// Cache layer that manages the fallback logic around network fetching.
///
/// Entries never expire. They are overwritten by every successful fetch and
/// only read back when a fetch fails with a connectivity error. An
/// application error from a reachable backend is always returned as is.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// The underlying storage.
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Fetch a single entity through the cache.
  ///
  /// 1. Run the fetcher
  /// 2. On success, overwrite the cache entry for `(T, id)` and return the record
  /// 3. On a connectivity failure, return the cached record if there is one
  /// 4. Any other failure is returned unchanged, without touching the cache
  pub async fn fetch_one<T, F, Fut>(&self, id: &str, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let key = EntityKey::of::<T>(id);

    match fetcher().await {
      Ok(data) => {
        if let Err(e) = self.storage.store_entity(&data) {
          warn!("Failed to cache {}: {}", key, e);
        }
        Ok(CacheResult::from_network(data))
      }
      Err(err) if err.is_connectivity() => match self.storage.get_entity::<T>(id) {
        Ok(Some(cached)) => {
          warn!(
            "Network error, returning cached {} stored at {}: {}",
            key, cached.stored_at, err
          );
          Ok(CacheResult::offline(cached.entity, cached.stored_at))
        }
        Ok(None) => {
          debug!("Network error and no cached {}", key);
          Err(err)
        }
        Err(cache_err) => {
          warn!("Failed to read cached {}: {}", key, cache_err);
          Err(err)
        }
      },
      Err(err) => Err(err),
    }
  }

  /// Fetch a list query through the cache, with the same fallback policy as
  /// [`CacheLayer::fetch_one`].
  pub async fn fetch_list<K, T, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let hash = key.cache_hash();

    match fetcher().await {
      Ok(items) => {
        if let Err(e) = self.storage.store_query(&hash, &key.description(), &items) {
          warn!("Failed to cache {}: {}", key.description(), e);
        }
        Ok(CacheResult::from_network(items))
      }
      Err(err) if err.is_connectivity() => match self.storage.get_query::<T>(&hash) {
        Ok(Some(cached)) => {
          warn!(
            "Network error, returning cached {} stored at {}: {}",
            key.description(),
            cached.stored_at,
            err
          );
          Ok(CacheResult::offline(cached.items, cached.stored_at))
        }
        Ok(None) => Err(err),
        Err(cache_err) => {
          warn!("Failed to read cached {}: {}", key.description(), cache_err);
          Err(err)
        }
      },
      Err(err) => Err(err),
    }
  }

  /// Store an entity outside of a fetch (e.g., a profile returned by login).
  pub fn put<T: Cacheable>(&self, entity: &T) -> Result<()> {
    self.storage.store_entity(entity)
  }

  /// Evict every cached entity and query result.
  pub fn clear(&self) -> Result<()> {
    self.storage.clear()
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{NoopStorage, SqliteStorage};
  use crate::cache::traits::CacheSource;
  use crate::db::Database;
  use crate::error::ForumError;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Post {
    id: u64,
    title: String,
  }

  impl Cacheable for Post {
    fn cache_key(&self) -> String {
      self.id.to_string()
    }

    fn entity_type() -> &'static str {
      "post"
    }
  }

  struct Page(u64);

  impl QueryKey for Page {
    fn description(&self) -> String {
      format!("posts:start={}", self.0)
    }
  }

  fn layer() -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::new(Database::open_in_memory().unwrap()))
  }

  fn post(id: u64, title: &str) -> Post {
    Post {
      id,
      title: title.to_string(),
    }
  }

  async fn fetch(
    layer: &CacheLayer<SqliteStorage>,
    response: Result<Post>,
  ) -> Result<CacheResult<Post>> {
    layer.fetch_one("5", move || async move { response }).await
  }

  #[tokio::test]
  async fn test_success_writes_cache() {
    let layer = layer();

    let result = fetch(&layer, Ok(post(5, "hello"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, post(5, "hello"));

    let keys = layer.storage().entity_keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].0.to_string(), "post:5");
    let cached = layer.storage().get_entity::<Post>("5").unwrap().unwrap();
    assert_eq!(cached.entity, post(5, "hello"));
  }

  #[tokio::test]
  async fn test_connectivity_failure_falls_back_to_cache() {
    let layer = layer();
    fetch(&layer, Ok(post(5, "hello"))).await.unwrap();

    let result = fetch(&layer, Err(ForumError::connectivity("offline")))
      .await
      .unwrap();
    assert!(result.is_offline());
    assert!(result.stored_at.is_some());
    assert_eq!(result.data, post(5, "hello"));
  }

  #[tokio::test]
  async fn test_application_error_is_never_masked() {
    let layer = layer();
    fetch(&layer, Ok(post(5, "hello"))).await.unwrap();

    let err = fetch(&layer, Err(ForumError::application(Some(403), "Forbidden")))
      .await
      .unwrap_err();
    assert_eq!(err.status_code(), Some(403));

    // Entry is left untouched
    let cached = layer.storage().get_entity::<Post>("5").unwrap().unwrap();
    assert_eq!(cached.entity, post(5, "hello"));
  }

  #[tokio::test]
  async fn test_connectivity_failure_without_cache_propagates() {
    let layer = layer();

    let err = fetch(&layer, Err(ForumError::connectivity("offline")))
      .await
      .unwrap_err();
    assert!(err.is_connectivity());
    assert!(layer.storage().entity_keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failures_do_not_write_cache() {
    let layer = layer();
    fetch(&layer, Ok(post(5, "hello"))).await.unwrap();
    let before = layer.storage().get_entity::<Post>("5").unwrap().unwrap();

    let _ = fetch(&layer, Err(ForumError::connectivity("offline"))).await;
    let _ = fetch(&layer, Err(ForumError::application(Some(500), "boom"))).await;

    let after = layer.storage().get_entity::<Post>("5").unwrap().unwrap();
    assert_eq!(before.stored_at, after.stored_at);
  }

  #[tokio::test]
  async fn test_repeated_success_is_idempotent() {
    let layer = layer();
    fetch(&layer, Ok(post(5, "hello"))).await.unwrap();
    let once = layer.storage().entity_keys().unwrap();
    fetch(&layer, Ok(post(5, "hello"))).await.unwrap();
    let twice = layer.storage().entity_keys().unwrap();

    assert_eq!(once.len(), twice.len());
    assert_eq!(once[0].0, twice[0].0);
    let cached = layer.storage().get_entity::<Post>("5").unwrap().unwrap();
    assert_eq!(cached.entity, post(5, "hello"));
  }

  #[tokio::test]
  async fn test_latest_success_wins() {
    let layer = layer();
    fetch(&layer, Ok(post(5, "old"))).await.unwrap();
    fetch(&layer, Ok(post(5, "new"))).await.unwrap();

    let result = fetch(&layer, Err(ForumError::connectivity("offline")))
      .await
      .unwrap();
    assert_eq!(result.data.title, "new");
  }

  #[tokio::test]
  async fn test_list_falls_back_on_connectivity_only() {
    let layer = layer();
    let key = Page(0);

    let fresh = layer
      .fetch_list(&key, || async { Ok(vec![3u64, 2, 1]) })
      .await
      .unwrap();
    assert_eq!(fresh.source, CacheSource::Network);

    let offline = layer
      .fetch_list(&key, || async {
        Err::<Vec<u64>, _>(ForumError::connectivity("offline"))
      })
      .await
      .unwrap();
    assert!(offline.is_offline());
    assert_eq!(offline.data, vec![3, 2, 1]);

    let err = layer
      .fetch_list(&key, || async {
        Err::<Vec<u64>, _>(ForumError::application(Some(401), "Invalid token"))
      })
      .await
      .unwrap_err();
    assert_eq!(err.status_code(), Some(401));
  }

  #[tokio::test]
  async fn test_disabled_cache_never_falls_back() {
    let layer = CacheLayer::new(NoopStorage);
    layer
      .fetch_one("5", || async { Ok(post(5, "hello")) })
      .await
      .unwrap();

    let err = layer
      .fetch_one::<Post, _, _>("5", || async { Err(ForumError::connectivity("offline")) })
      .await
      .unwrap_err();
    assert!(err.is_connectivity());
  }
}
