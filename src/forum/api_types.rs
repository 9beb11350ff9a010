//! Serde-deserializable types matching the forum backend's responses.
//!
//! These types are separate from domain types so that loosely typed wire
//! fields (like lists that sometimes arrive JSON-encoded as strings) are
//! normalized in one place.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use tracing::warn;

use super::types::{AuthToken, Comment, CommentId, LikeSet, Profile, Thread, ThreadId, UserId};
use crate::error::{ForumError, Result};

/// Decode a JSON value into a wire type, naming what failed.
pub fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
  serde_json::from_value(value).map_err(|e| ForumError::decode(format!("{}: {}", what, e)))
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiThread {
  pub id: ThreadId,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub is_public: bool,
  #[serde(default)]
  pub lock: bool,
  pub creator_id: UserId,
  pub created_at: DateTime<Utc>,
  // Either a list of ids or a JSON string holding one
  pub likes: Option<Value>,
  pub watchees: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiComment {
  pub id: CommentId,
  pub thread_id: ThreadId,
  pub creator_id: UserId,
  pub parent_comment_id: Option<CommentId>,
  #[serde(default)]
  pub content: String,
  pub created_at: DateTime<Utc>,
  pub likes: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  pub id: UserId,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub name: String,
  pub image: Option<String>,
  #[serde(default)]
  pub admin: bool,
}

// ============================================================================
// Auth and mutation responses
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAuthResponse {
  pub token: Option<String>,
  pub user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ApiIdResponse {
  pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub error: String,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl ApiThread {
  pub fn into_thread(self) -> Result<Thread> {
    let context = format!("thread {}", self.id);
    Ok(Thread {
      likes: parse_like_set(self.likes.as_ref(), &context, "likes")?,
      watchees: parse_like_set(self.watchees.as_ref(), &context, "watchees")?,
      id: self.id,
      title: self.title,
      content: self.content,
      is_public: self.is_public,
      lock: self.lock,
      creator_id: self.creator_id,
      created_at: self.created_at,
    })
  }
}

impl ApiComment {
  pub fn into_comment(self) -> Result<Comment> {
    let context = format!("comment {}", self.id);
    Ok(Comment {
      likes: parse_like_set(self.likes.as_ref(), &context, "likes")?,
      id: self.id,
      thread_id: self.thread_id,
      creator_id: self.creator_id,
      parent_comment_id: self.parent_comment_id,
      content: self.content,
      created_at: self.created_at,
    })
  }
}

impl From<ApiUser> for Profile {
  fn from(user: ApiUser) -> Self {
    Profile {
      id: user.id,
      email: user.email,
      name: user.name,
      image: user.image.filter(|s| !s.is_empty()),
      admin: user.admin,
    }
  }
}

impl ApiAuthResponse {
  pub fn into_token(self) -> Result<AuthToken> {
    match (self.token, self.user_id) {
      (Some(token), Some(user_id)) if !token.is_empty() => Ok(AuthToken { token, user_id }),
      _ => Err(ForumError::application(
        None,
        "No token returned from server",
      )),
    }
  }
}

// ============================================================================
// Helpers
// ============================================================================

/// Normalize a like/watch list.
///
/// Accepted forms:
/// - absent or null (empty set)
/// - a list of ids, numbers or numeric strings
/// - a string holding a JSON-encoded list of the above
///
/// Anything else is rejected.
pub fn parse_like_set(value: Option<&Value>, context: &str, field: &str) -> Result<LikeSet> {
  let value = match value {
    None | Some(Value::Null) => return Ok(LikeSet::default()),
    Some(v) => v,
  };

  let parsed;
  let list = match value {
    Value::Array(items) => items,
    Value::String(encoded) => {
      parsed = serde_json::from_str::<Value>(encoded).map_err(|e| {
        malformed(context, field, &format!("invalid JSON string: {}", e))
      })?;
      match &parsed {
        Value::Array(items) => items,
        Value::Null => return Ok(LikeSet::default()),
        other => return Err(malformed(context, field, &format!("expected a list, got {}", other))),
      }
    }
    other => return Err(malformed(context, field, &format!("expected a list, got {}", other))),
  };

  list
    .iter()
    .map(|item| match item {
      Value::Number(n) => n.as_u64(),
      Value::String(s) => s.trim().parse().ok(),
      _ => None,
    })
    .map(|id| id.ok_or_else(|| malformed(context, field, "list holds a non-id entry")))
    .collect()
}

fn malformed(context: &str, field: &str, reason: &str) -> ForumError {
  warn!("Malformed {} on {}: {}", field, context, reason);
  ForumError::decode(format!("{} on {}: {}", field, context, reason))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn likes(value: Value) -> Result<LikeSet> {
    parse_like_set(Some(&value), "thread 1", "likes")
  }

  #[test]
  fn test_like_set_from_list() {
    let set = likes(json!([3, 1, 3])).unwrap();
    assert_eq!(set.len(), 2);
    assert!(set.contains(1));
    assert!(set.contains(3));
  }

  #[test]
  fn test_like_set_from_encoded_string() {
    let set = likes(json!("[1, 2]")).unwrap();
    assert_eq!(set, [1, 2].into_iter().collect::<LikeSet>());
  }

  #[test]
  fn test_like_set_accepts_numeric_strings() {
    let set = likes(json!(["7", 8])).unwrap();
    assert_eq!(set, [7, 8].into_iter().collect::<LikeSet>());
  }

  #[test]
  fn test_like_set_empty_forms() {
    assert!(parse_like_set(None, "thread 1", "likes").unwrap().is_empty());
    assert!(likes(Value::Null).unwrap().is_empty());
    assert!(likes(json!([])).unwrap().is_empty());
    assert!(likes(json!("[]")).unwrap().is_empty());
  }

  #[test]
  fn test_like_set_rejects_malformed() {
    assert!(matches!(likes(json!("not json")), Err(ForumError::Decode(_))));
    assert!(matches!(likes(json!({"1": true})), Err(ForumError::Decode(_))));
    assert!(matches!(likes(json!([1, "x"])), Err(ForumError::Decode(_))));
    assert!(matches!(likes(json!(5)), Err(ForumError::Decode(_))));
  }

  #[test]
  fn test_thread_conversion() {
    let api: ApiThread = decode(
      json!({
        "id": 5,
        "title": "Hello",
        "content": "World",
        "isPublic": true,
        "lock": false,
        "creatorId": 9,
        "createdAt": "2024-01-03T10:00:00.000Z",
        "likes": "[9]",
        "watchees": [1, 9]
      }),
      "thread",
    )
    .unwrap();

    let thread = api.into_thread().unwrap();
    assert_eq!(thread.id, 5);
    assert_eq!(thread.creator_id, 9);
    assert!(thread.is_public);
    assert!(thread.likes.contains(9));
    assert_eq!(thread.watchees.len(), 2);
  }

  #[test]
  fn test_comment_conversion_without_parent() {
    let api: ApiComment = decode(
      json!({
        "id": 1,
        "threadId": 5,
        "creatorId": 2,
        "parentCommentId": null,
        "content": "first",
        "createdAt": "2024-01-01T00:00:00Z",
        "likes": []
      }),
      "comment",
    )
    .unwrap();

    let comment = api.into_comment().unwrap();
    assert_eq!(comment.parent_comment_id, None);
    assert!(comment.likes.is_empty());
  }

  #[test]
  fn test_auth_response_without_token_is_error() {
    let api: ApiAuthResponse = decode(json!({}), "auth").unwrap();
    assert!(matches!(
      api.into_token(),
      Err(ForumError::Application { status: None, .. })
    ));
  }

  #[test]
  fn test_empty_image_is_none() {
    let api: ApiUser = decode(json!({"id": 1, "name": "Ann", "image": ""}), "user").unwrap();
    assert_eq!(Profile::from(api).image, None);
  }
}
