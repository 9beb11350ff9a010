//! Read-through caching for data persistence and offline support.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Always prefers fresh network data and stores every successful fetch
//! - Serves the last stored copy only when the network is unreachable
//! - Never masks an error answer from a reachable backend
//! - Caches single entities by `(entity_type, id)` and list queries by hash

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage, Storage};
pub use traits::{CacheResult, CacheSource, Cacheable, EntityKey, QueryKey};
