//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use super::traits::{Cacheable, EntityKey};
use crate::db::Database;
use crate::error::{ForumError, Result};

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity<T> {
  /// The cached entity
  pub entity: T,
  /// When the entity was stored
  pub stored_at: DateTime<Utc>,
}

/// Result of a cached list query lookup.
#[derive(Debug, Clone)]
pub struct CachedQueryResult<T> {
  /// The cached items in order
  pub items: Vec<T>,
  /// When the query result was stored
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// All operations are synchronous and local; writes replace whole values.
pub trait CacheStorage: Send + Sync {
  /// Get a single entity by id within `T`'s partition.
  fn get_entity<T: Cacheable>(&self, id: &str) -> Result<Option<CachedEntity<T>>>;

  /// Store a single entity, replacing any prior entry for its key.
  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()>;

  /// Store the items of a list query, replacing any prior result.
  fn store_query<T: Serialize>(&self, hash: &str, description: &str, items: &[T]) -> Result<()>;

  /// Get the cached items of a list query.
  fn get_query<T: DeserializeOwned>(&self, hash: &str) -> Result<Option<CachedQueryResult<T>>>;

  /// All cached entity keys with their storage time, ordered by key.
  fn entity_keys(&self) -> Result<Vec<(EntityKey, DateTime<Utc>)>>;

  /// Drop every cached entity and query result.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get_entity<T: Cacheable>(&self, _id: &str) -> Result<Option<CachedEntity<T>>> {
    Ok(None) // Always miss
  }

  fn store_entity<T: Cacheable>(&self, _entity: &T) -> Result<()> {
    Ok(()) // Discard
  }

  fn store_query<T: Serialize>(&self, _hash: &str, _description: &str, _items: &[T]) -> Result<()> {
    Ok(())
  }

  fn get_query<T: DeserializeOwned>(&self, _hash: &str) -> Result<Option<CachedQueryResult<T>>> {
    Ok(None)
  }

  fn entity_keys(&self) -> Result<Vec<(EntityKey, DateTime<Utc>)>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn get_entity<T: Cacheable>(&self, id: &str) -> Result<Option<CachedEntity<T>>> {
    let conn = self.db.lock()?;
    let entity_type = T::entity_type();

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, stored_at FROM entity_cache
         WHERE entity_type = ? AND entity_key = ?",
        params![entity_type, id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| ForumError::cache(format!("Failed to read {}:{}: {}", entity_type, id, e)))?;

    match row {
      Some((data, stored_at)) => {
        let entity: T = serde_json::from_slice(&data).map_err(|e| {
          ForumError::decode(format!(
            "Failed to deserialize cached {}:{}: {}",
            entity_type, id, e
          ))
        })?;
        Ok(Some(CachedEntity {
          entity,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()> {
    let conn = self.db.lock()?;
    let entity_type = T::entity_type();
    let key = entity.cache_key();
    let data = serde_json::to_vec(entity)
      .map_err(|e| ForumError::decode(format!("Failed to serialize entity: {}", e)))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO entity_cache (entity_type, entity_key, data, stored_at)
         VALUES (?, ?, ?, ?)",
        params![entity_type, key, data, now_string()],
      )
      .map_err(|e| ForumError::cache(format!("Failed to store entity: {}", e)))?;

    Ok(())
  }

  fn store_query<T: Serialize>(&self, hash: &str, description: &str, items: &[T]) -> Result<()> {
    let conn = self.db.lock()?;
    let data = serde_json::to_vec(items)
      .map_err(|e| ForumError::decode(format!("Failed to serialize query result: {}", e)))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (query_hash, query_description, data, stored_at)
         VALUES (?, ?, ?, ?)",
        params![hash, description, data, now_string()],
      )
      .map_err(|e| ForumError::cache(format!("Failed to update query cache: {}", e)))?;

    Ok(())
  }

  fn get_query<T: DeserializeOwned>(&self, hash: &str) -> Result<Option<CachedQueryResult<T>>> {
    let conn = self.db.lock()?;

    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT data, stored_at FROM query_cache WHERE query_hash = ?",
        params![hash],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| ForumError::cache(format!("Failed to read query cache: {}", e)))?;

    match row {
      Some((data, stored_at)) => {
        let items: Vec<T> = serde_json::from_slice(&data).map_err(|e| {
          ForumError::decode(format!("Failed to deserialize query result: {}", e))
        })?;
        Ok(Some(CachedQueryResult {
          items,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn entity_keys(&self) -> Result<Vec<(EntityKey, DateTime<Utc>)>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT entity_type, entity_key, stored_at FROM entity_cache
         ORDER BY entity_type, entity_key",
      )
      .map_err(|e| ForumError::cache(format!("Failed to prepare query: {}", e)))?;

    let rows: Vec<(String, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| ForumError::cache(format!("Failed to list cache keys: {}", e)))?
      .collect::<rusqlite::Result<_>>()?;

    rows
      .into_iter()
      .map(|(entity_type, id, stored_at)| {
        Ok((EntityKey::new(entity_type, id), parse_datetime(&stored_at)?))
      })
      .collect()
  }

  fn clear(&self) -> Result<()> {
    self
      .db
      .lock()?
      .execute_batch("DELETE FROM entity_cache; DELETE FROM query_cache;")
      .map_err(|e| ForumError::cache(format!("Failed to clear cache: {}", e)))?;
    Ok(())
  }
}

fn now_string() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| ForumError::cache(format!("Failed to parse datetime '{}': {}", s, e)))
}

/// Storage picked at startup from configuration.
pub enum Storage {
  Sqlite(SqliteStorage),
  Disabled(NoopStorage),
}

impl CacheStorage for Storage {
  fn get_entity<T: Cacheable>(&self, id: &str) -> Result<Option<CachedEntity<T>>> {
    match self {
      Self::Sqlite(s) => s.get_entity(id),
      Self::Disabled(s) => s.get_entity(id),
    }
  }

  fn store_entity<T: Cacheable>(&self, entity: &T) -> Result<()> {
    match self {
      Self::Sqlite(s) => s.store_entity(entity),
      Self::Disabled(s) => s.store_entity(entity),
    }
  }

  fn store_query<T: Serialize>(&self, hash: &str, description: &str, items: &[T]) -> Result<()> {
    match self {
      Self::Sqlite(s) => s.store_query(hash, description, items),
      Self::Disabled(s) => s.store_query(hash, description, items),
    }
  }

  fn get_query<T: DeserializeOwned>(&self, hash: &str) -> Result<Option<CachedQueryResult<T>>> {
    match self {
      Self::Sqlite(s) => s.get_query(hash),
      Self::Disabled(s) => s.get_query(hash),
    }
  }

  fn entity_keys(&self) -> Result<Vec<(EntityKey, DateTime<Utc>)>> {
    match self {
      Self::Sqlite(s) => s.entity_keys(),
      Self::Disabled(s) => s.entity_keys(),
    }
  }

  fn clear(&self) -> Result<()> {
    match self {
      Self::Sqlite(s) => s.clear(),
      Self::Disabled(s) => s.clear(),
    }
  }
}
