use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type ThreadId = u64;
pub type CommentId = u64;
pub type UserId = u64;

/// Set of user ids that liked (or watch) something.
///
/// The backend sends these either as a list or as a JSON-encoded string of a
/// list; both are normalized into this type when a response is decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LikeSet(BTreeSet<UserId>);

impl LikeSet {
  pub fn contains(&self, user_id: UserId) -> bool {
    self.0.contains(&user_id)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<UserId> for LikeSet {
  fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// Full thread details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
  pub id: ThreadId,
  pub title: String,
  pub content: String,
  pub is_public: bool,
  pub lock: bool,
  pub creator_id: UserId,
  pub created_at: DateTime<Utc>,
  pub likes: LikeSet,
  pub watchees: LikeSet,
}

/// A single comment; replies point at their parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: CommentId,
  pub thread_id: ThreadId,
  pub creator_id: UserId,
  pub parent_comment_id: Option<CommentId>,
  pub content: String,
  pub created_at: DateTime<Utc>,
  pub likes: LikeSet,
}

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
  pub id: UserId,
  pub email: String,
  pub name: String,
  pub image: Option<String>,
  pub admin: bool,
}

/// Credentials returned by login and register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
  pub token: String,
  pub user_id: UserId,
}

/// Fields for a new thread
#[derive(Debug, Clone)]
pub struct NewThread {
  pub title: String,
  pub is_public: bool,
  pub content: String,
}

/// Replacement fields for an existing thread
#[derive(Debug, Clone)]
pub struct ThreadUpdate {
  pub id: ThreadId,
  pub title: String,
  pub is_public: bool,
  pub lock: bool,
  pub content: String,
}

impl ThreadUpdate {
  /// Start an update from the thread's current values.
  pub fn from_thread(thread: &Thread) -> Self {
    Self {
      id: thread.id,
      title: thread.title.clone(),
      is_public: thread.is_public,
      lock: thread.lock,
      content: thread.content.clone(),
    }
  }
}

/// Fields for a new comment or a reply to `parent_comment_id`
#[derive(Debug, Clone)]
pub struct NewComment {
  pub thread_id: ThreadId,
  pub parent_comment_id: Option<CommentId>,
  pub content: String,
}
