use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use super::api_types::{decode, ApiAuthResponse, ApiComment, ApiIdResponse, ApiThread, ApiUser};
use super::transport::{ApiRequest, Transport};
use super::types::{
  AuthToken, Comment, CommentId, NewComment, NewThread, Profile, Thread, ThreadId, ThreadUpdate,
  UserId,
};
use crate::error::Result;

/// Typed forum API client over a [`Transport`].
///
/// Attaches the bearer token of the current session to every request.
pub struct ForumClient<T: Transport> {
  transport: Arc<T>,
  token: Arc<RwLock<Option<String>>>,
}

impl<T: Transport> Clone for ForumClient<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      token: Arc::clone(&self.token),
    }
  }
}

impl<T: Transport> ForumClient<T> {
  pub fn new(transport: T, token: Option<String>) -> Self {
    Self {
      transport: Arc::new(transport),
      token: Arc::new(RwLock::new(token)),
    }
  }

  #[cfg(test)]
  pub fn transport(&self) -> &T {
    &self.transport
  }

  pub fn set_token(&self, token: Option<String>) {
    if let Ok(mut current) = self.token.write() {
      *current = token;
    }
  }

  pub fn token(&self) -> Option<String> {
    self.token.read().ok().and_then(|t| t.clone())
  }

  async fn send(&self, request: ApiRequest) -> Result<Value> {
    self.transport.send(request.bearer(self.token())).await
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  pub async fn login(&self, email: &str, password: &str) -> Result<AuthToken> {
    let body = json!({ "email": email, "password": password });
    let response = self
      .transport
      .send(ApiRequest::post("/auth/login", body))
      .await?;
    decode::<ApiAuthResponse>(response, "login response")?.into_token()
  }

  pub async fn register(&self, email: &str, name: &str, password: &str) -> Result<AuthToken> {
    let body = json!({ "email": email, "password": password, "name": name });
    let response = self
      .transport
      .send(ApiRequest::post("/auth/register", body))
      .await?;
    decode::<ApiAuthResponse>(response, "register response")?.into_token()
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Get a single thread by id
  pub async fn get_thread(&self, id: ThreadId) -> Result<Thread> {
    let response = self.send(ApiRequest::get("/thread").query("id", id)).await?;
    decode::<ApiThread>(response, &format!("thread {}", id))?.into_thread()
  }

  /// Get one page of thread ids starting at offset `start`
  pub async fn get_thread_page(&self, start: usize) -> Result<Vec<ThreadId>> {
    let response = self
      .send(ApiRequest::get("/threads").query("start", start))
      .await?;
    decode(response, &format!("threads page at {}", start))
  }

  /// Get all comments of a thread as a flat list.
  ///
  /// A comment whose fields can't be normalized is logged and left out; the
  /// rest of the thread is still returned.
  pub async fn get_comments(&self, thread_id: ThreadId) -> Result<Vec<Comment>> {
    let response = self
      .send(ApiRequest::get("/comments").query("threadId", thread_id))
      .await?;
    let comments: Vec<ApiComment> =
      decode(response, &format!("comments of thread {}", thread_id))?;
    Ok(
      comments
        .into_iter()
        .filter_map(|comment| {
          let id = comment.id;
          match comment.into_comment() {
            Ok(comment) => Some(comment),
            Err(e) => {
              warn!("Skipping comment {} of thread {}: {}", id, thread_id, e);
              None
            }
          }
        })
        .collect(),
    )
  }

  /// Get a user's profile
  pub async fn get_profile(&self, user_id: UserId) -> Result<Profile> {
    let response = self
      .send(ApiRequest::get("/user").query("userId", user_id))
      .await?;
    let user: ApiUser = decode(response, &format!("profile {}", user_id))?;
    Ok(user.into())
  }

  // ==========================================================================
  // Thread mutations
  // ==========================================================================

  pub async fn create_thread(&self, thread: &NewThread) -> Result<ThreadId> {
    let body = json!({
      "title": thread.title,
      "isPublic": thread.is_public,
      "content": thread.content,
    });
    let response = self.send(ApiRequest::post("/thread", body)).await?;
    let created: ApiIdResponse = decode(response, "new thread")?;
    info!("Posted new thread {}", created.id);
    Ok(created.id)
  }

  pub async fn update_thread(&self, update: &ThreadUpdate) -> Result<()> {
    let body = json!({
      "id": update.id,
      "title": update.title,
      "isPublic": update.is_public,
      "lock": update.lock,
      "content": update.content,
    });
    self.send(ApiRequest::put("/thread", body)).await?;
    info!("Edited thread {}", update.id);
    Ok(())
  }

  pub async fn delete_thread(&self, id: ThreadId) -> Result<()> {
    self
      .send(ApiRequest::delete("/thread", json!({ "id": id })))
      .await?;
    info!("Deleted thread {}", id);
    Ok(())
  }

  pub async fn like_thread(&self, id: ThreadId, turnon: bool) -> Result<()> {
    let body = json!({ "id": id, "turnon": turnon });
    self.send(ApiRequest::put("/thread/like", body)).await?;
    Ok(())
  }

  pub async fn watch_thread(&self, id: ThreadId, turnon: bool) -> Result<()> {
    let body = json!({ "id": id, "turnon": turnon });
    self.send(ApiRequest::put("/thread/watch", body)).await?;
    Ok(())
  }

  // ==========================================================================
  // Comment mutations
  // ==========================================================================

  pub async fn create_comment(&self, comment: &NewComment) -> Result<CommentId> {
    let body = json!({
      "content": comment.content,
      "threadId": comment.thread_id,
      "parentCommentId": comment.parent_comment_id,
    });
    let response = self.send(ApiRequest::post("/comment", body)).await?;
    let created: ApiIdResponse = decode(response, "new comment")?;
    info!(
      "Posted comment {} on thread {}",
      created.id, comment.thread_id
    );
    Ok(created.id)
  }

  pub async fn update_comment(&self, id: CommentId, content: &str) -> Result<()> {
    let body = json!({ "id": id, "content": content });
    self.send(ApiRequest::put("/comment", body)).await?;
    info!("Comment {} updated", id);
    Ok(())
  }

  pub async fn like_comment(&self, id: CommentId, turnon: bool) -> Result<()> {
    let body = json!({ "id": id, "turnon": turnon });
    self.send(ApiRequest::put("/comment/like", body)).await?;
    Ok(())
  }
}
