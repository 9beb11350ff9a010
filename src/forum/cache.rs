//! Caching implementations for forum types.

use crate::cache::{Cacheable, QueryKey};

use super::types::{Profile, Thread};

impl Cacheable for Thread {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "thread"
  }
}

impl Cacheable for Profile {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "profile"
  }
}

/// Query key types for cached list calls.
#[derive(Clone, Debug)]
pub enum ForumQueryKey {
  /// One page of thread ids starting at an offset
  ThreadPage { start: usize },
}

impl QueryKey for ForumQueryKey {
  fn description(&self) -> String {
    match self {
      Self::ThreadPage { start } => format!("threads:start={}", start),
    }
  }
}
