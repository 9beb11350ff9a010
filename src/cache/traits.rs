//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Trait for entities that can be cached.
///
/// Implementors provide a key that is unique within their entity type.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity within its type (e.g., thread id)
  fn cache_key(&self) -> String;

  /// Entity type name, used as the cache partition (e.g., "thread", "profile")
  fn entity_type() -> &'static str;
}

/// Fully qualified cache key: partition plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
  pub entity_type: String,
  pub id: String,
}

impl EntityKey {
  pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      entity_type: entity_type.into(),
      id: id.into(),
    }
  }

  /// Key for an entity of type `T` with the given id.
  pub fn of<T: Cacheable>(id: impl Into<String>) -> Self {
    Self::new(T::entity_type(), id)
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.entity_type, self.id)
  }
}

/// Key for a cached list query.
pub trait QueryKey {
  /// Human-readable, normalized form of the query (e.g., "threads:start=0").
  fn description(&self) -> String;

  /// Stable, fixed-length storage key derived from the description.
  fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the served entry was stored (only for cached data)
  pub stored_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      stored_at: None,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, stored_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      stored_at: Some(stored_at),
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, serving the last stored copy
  Offline,
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Page(u32);

  impl QueryKey for Page {
    fn description(&self) -> String {
      format!("page:{}", self.0)
    }
  }

  #[test]
  fn test_entity_key_display() {
    assert_eq!(EntityKey::new("thread", "5").to_string(), "thread:5");
  }

  #[test]
  fn test_query_hash_is_stable_hex() {
    let hash = Page(1).cache_hash();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(hash, Page(1).cache_hash());
    assert_ne!(hash, Page(2).cache_hash());
  }
}
