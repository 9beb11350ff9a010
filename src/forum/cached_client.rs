//! Cached forum client that wraps ForumClient with read-through caching and
//! session bookkeeping.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::cache::{CacheLayer, CacheResult, CacheStorage, EntityKey};
use crate::error::{ForumError, Result};

use super::cache::ForumQueryKey;
use super::client::ForumClient;
use super::session::SessionStore;
use super::transport::Transport;
use super::tree::{build_tree, CommentNode};
use super::types::{
  AuthToken, Comment, CommentId, NewComment, NewThread, Profile, Thread, ThreadId, ThreadUpdate,
  UserId,
};

/// A thread together with its author, as shown on the thread page.
#[derive(Debug, Clone)]
pub struct ThreadDetail {
  pub thread: CacheResult<Thread>,
  /// None when the author's profile could not be resolved
  pub author: Option<Profile>,
}

/// A thread's comments as a reply forest plus the profiles of their authors.
#[derive(Debug)]
pub struct CommentSection {
  pub roots: Vec<CommentNode>,
  pub authors: HashMap<UserId, Profile>,
}

/// A run of thread ids collected page by page.
#[derive(Debug, Clone)]
pub struct ThreadListing {
  pub ids: Vec<ThreadId>,
  /// Whether any page was served from the cache
  pub offline: bool,
}

/// Forum client with transparent caching support.
///
/// Entity reads go through the cache layer: fresh network data when the
/// backend is reachable, the last stored copy when it is not.
pub struct CachedForumClient<T: Transport, S: CacheStorage> {
  inner: ForumClient<T>,
  cache: CacheLayer<S>,
  session: SessionStore,
}

impl<T: Transport, S: CacheStorage> CachedForumClient<T, S> {
  /// Create a client, picking up the token of a stored session if any.
  pub fn new(inner: ForumClient<T>, cache: CacheLayer<S>, session: SessionStore) -> Result<Self> {
    if let Some(token) = session.token()? {
      inner.set_token(Some(token));
    }
    Ok(Self {
      inner,
      cache,
      session,
    })
  }

  #[cfg(test)]
  pub fn inner(&self) -> &ForumClient<T> {
    &self.inner
  }

  // ==========================================================================
  // Cached reads
  // ==========================================================================

  /// Get a single thread, falling back to the cache when offline.
  pub async fn fetch_thread(&self, id: ThreadId) -> Result<CacheResult<Thread>> {
    self
      .cache
      .fetch_one(&id.to_string(), || self.inner.get_thread(id))
      .await
  }

  /// Get a user's profile, falling back to the cache when offline.
  pub async fn fetch_profile(&self, user_id: UserId) -> Result<CacheResult<Profile>> {
    self
      .cache
      .fetch_one(&user_id.to_string(), || self.inner.get_profile(user_id))
      .await
  }

  /// Get one page of thread ids, falling back to the cache when offline.
  pub async fn thread_page(&self, start: usize) -> Result<CacheResult<Vec<ThreadId>>> {
    let key = ForumQueryKey::ThreadPage { start };
    self
      .cache
      .fetch_list(&key, || self.inner.get_thread_page(start))
      .await
  }

  /// Collect thread ids page by page from `start` until a page comes back
  /// empty or `limit` ids are collected.
  ///
  /// When the backend becomes unreachable after the first page and the next
  /// page is not cached, the ids collected so far are returned.
  pub async fn load_threads(&self, start: usize, limit: Option<usize>) -> Result<ThreadListing> {
    let mut listing = ThreadListing {
      ids: Vec::new(),
      offline: false,
    };
    let mut offset = start;

    loop {
      let page = match self.thread_page(offset).await {
        Ok(page) => page,
        Err(e) if e.is_connectivity() && !listing.ids.is_empty() => {
          warn!("Stopped loading threads at offset {}: {}", offset, e);
          listing.offline = true;
          break;
        }
        Err(e) => return Err(e),
      };

      listing.offline |= page.is_offline();
      if page.data.is_empty() {
        break;
      }
      offset += page.data.len();
      listing.ids.extend(page.data);

      if let Some(limit) = limit {
        if listing.ids.len() >= limit {
          listing.ids.truncate(limit);
          break;
        }
      }
    }

    Ok(listing)
  }

  /// A thread together with its author's profile.
  pub async fn thread_detail(&self, id: ThreadId) -> Result<ThreadDetail> {
    let thread = self.fetch_thread(id).await?;
    let author = match self.fetch_profile(thread.data.creator_id).await {
      Ok(profile) => Some(profile.data),
      Err(e) => {
        warn!(
          "Failed to fetch author {} of thread {}: {}",
          thread.data.creator_id, id, e
        );
        None
      }
    };
    Ok(ThreadDetail { thread, author })
  }

  /// Resolve the distinct authors of a set of comments.
  ///
  /// Lookups run concurrently; a failed lookup is logged and left out of the
  /// result without affecting the others.
  pub async fn resolve_authors(&self, comments: &[Comment]) -> HashMap<UserId, Profile> {
    let user_ids: BTreeSet<UserId> = comments.iter().map(|c| c.creator_id).collect();

    let lookups = user_ids.into_iter().map(|user_id| async move {
      match self.fetch_profile(user_id).await {
        Ok(profile) => Some((user_id, profile.data)),
        Err(e) => {
          warn!("Failed to fetch profile for user {}: {}", user_id, e);
          None
        }
      }
    });

    join_all(lookups).await.into_iter().flatten().collect()
  }

  /// Comments of a thread as a reply forest, with their authors.
  pub async fn thread_comments(&self, thread_id: ThreadId) -> Result<CommentSection> {
    let comments = self.inner.get_comments(thread_id).await?;
    let authors = self.resolve_authors(&comments).await;
    Ok(CommentSection {
      roots: build_tree(comments),
      authors,
    })
  }

  /// Everything currently in the entity cache.
  pub fn cached_entries(&self) -> Result<Vec<(EntityKey, DateTime<Utc>)>> {
    self.cache.storage().entity_keys()
  }

  // ==========================================================================
  // Session
  // ==========================================================================

  /// Log in and store the session along with the user's profile.
  pub async fn login(&self, email: &str, password: &str) -> Result<Profile> {
    if email.trim().is_empty() || password.is_empty() {
      return Err(ForumError::validation("Email and password are required"));
    }
    let auth = self.inner.login(email, password).await?;
    self.start_session(auth).await
  }

  /// Register a new account and log it in.
  pub async fn register(
    &self,
    email: &str,
    name: &str,
    password: &str,
    confirm_password: &str,
  ) -> Result<Profile> {
    if email.trim().is_empty() || name.trim().is_empty() || password.is_empty() {
      return Err(ForumError::validation(
        "Email, name and password are required",
      ));
    }
    if password != confirm_password {
      return Err(ForumError::validation("Passwords do NOT match!"));
    }
    let auth = self.inner.register(email, name, password).await?;
    self.start_session(auth).await
  }

  async fn start_session(&self, auth: AuthToken) -> Result<Profile> {
    self.inner.set_token(Some(auth.token.clone()));
    let profile = self.inner.get_profile(auth.user_id).await?;
    self.session.store_session(&auth, &profile)?;
    if let Err(e) = self.cache.put(&profile) {
      warn!("Failed to cache profile {}: {}", profile.id, e);
    }
    Ok(profile)
  }

  /// Forget the session and every cached entity.
  pub fn logout(&self) -> Result<()> {
    self.inner.set_token(None);
    self.session.clear()?;
    self.cache.clear()
  }

  /// Profile of the logged-in user, if any.
  pub fn current_user(&self) -> Result<Option<Profile>> {
    self.session.user_detail()
  }

  fn require_user(&self) -> Result<Profile> {
    self
      .current_user()?
      .ok_or_else(|| ForumError::validation("Not logged in"))
  }

  /// Whether the current user may edit or delete the thread: they created
  /// it (or posted it from this client), or they are an admin.
  pub fn can_manage_thread(&self, thread: &Thread) -> Result<bool> {
    let user = match self.current_user()? {
      Some(user) => user,
      None => return Ok(false),
    };
    Ok(
      user.admin
        || thread.creator_id == user.id
        || self.session.owned_threads()?.contains(&thread.id),
    )
  }

  // ==========================================================================
  // Thread mutations
  // ==========================================================================

  /// Post a new thread and return it as stored after the write.
  pub async fn create_thread(&self, thread: NewThread) -> Result<CacheResult<Thread>> {
    if thread.title.trim().is_empty() {
      return Err(ForumError::validation("Thread's title can't be empty!"));
    }
    let id = self.inner.create_thread(&thread).await?;
    self.session.add_owned_thread(id)?;
    self.fetch_thread(id).await
  }

  /// Replace a thread's editable fields. Locked threads can't be edited.
  pub async fn edit_thread(
    &self,
    current: &Thread,
    update: ThreadUpdate,
  ) -> Result<CacheResult<Thread>> {
    ensure_unlocked(current)?;
    if update.title.trim().is_empty() {
      return Err(ForumError::validation("Thread's title can't be empty!"));
    }
    self.inner.update_thread(&update).await?;
    self.fetch_thread(update.id).await
  }

  /// Delete a thread. Its cache entry stays until the next fetch or logout.
  pub async fn delete_thread(&self, id: ThreadId) -> Result<()> {
    self.inner.delete_thread(id).await?;
    self.session.remove_owned_thread(id)
  }

  /// Like or unlike a thread, returning the updated thread.
  pub async fn like_thread(&self, id: ThreadId, turnon: bool) -> Result<CacheResult<Thread>> {
    self.inner.like_thread(id, turnon).await?;
    self.fetch_thread(id).await
  }

  /// Watch or unwatch a thread, returning the updated thread.
  pub async fn watch_thread(&self, id: ThreadId, turnon: bool) -> Result<CacheResult<Thread>> {
    self.inner.watch_thread(id, turnon).await?;
    self.fetch_thread(id).await
  }

  /// Flip the current user's like on a thread. Locked threads can't be liked.
  pub async fn toggle_thread_like(&self, thread: &Thread) -> Result<CacheResult<Thread>> {
    ensure_unlocked(thread)?;
    let user = self.require_user()?;
    self.like_thread(thread.id, !thread.likes.contains(user.id)).await
  }

  /// Flip the current user's watch on a thread.
  pub async fn toggle_thread_watch(&self, thread: &Thread) -> Result<CacheResult<Thread>> {
    let user = self.require_user()?;
    self
      .watch_thread(thread.id, !thread.watchees.contains(user.id))
      .await
  }

  // ==========================================================================
  // Comment mutations
  // ==========================================================================

  /// Find one comment of a thread.
  pub async fn find_comment(&self, thread_id: ThreadId, id: CommentId) -> Result<Comment> {
    self
      .inner
      .get_comments(thread_id)
      .await?
      .into_iter()
      .find(|comment| comment.id == id)
      .ok_or_else(|| {
        ForumError::validation(format!("No comment {} in thread {}", id, thread_id))
      })
  }

  /// Post a comment on `thread`, or a reply when `parent_comment_id` is set.
  pub async fn post_comment(
    &self,
    thread: &Thread,
    parent_comment_id: Option<CommentId>,
    content: &str,
  ) -> Result<CommentId> {
    ensure_unlocked(thread)?;
    if content.trim().is_empty() {
      return Err(ForumError::validation("Comment can't be empty!"));
    }
    let comment = NewComment {
      thread_id: thread.id,
      parent_comment_id,
      content: content.to_string(),
    };
    self.inner.create_comment(&comment).await
  }

  /// Change a comment's text. Only its author or an admin may do so.
  pub async fn edit_comment(
    &self,
    thread: &Thread,
    comment: &Comment,
    content: &str,
  ) -> Result<()> {
    ensure_unlocked(thread)?;
    let user = self.require_user()?;
    if !user.admin && comment.creator_id != user.id {
      return Err(ForumError::validation(format!(
        "You can't edit comment {}",
        comment.id
      )));
    }
    if content.trim().is_empty() {
      return Err(ForumError::validation("Comment can't be empty!"));
    }
    self.inner.update_comment(comment.id, content).await
  }

  pub async fn like_comment(&self, thread: &Thread, id: CommentId, turnon: bool) -> Result<()> {
    ensure_unlocked(thread)?;
    self.inner.like_comment(id, turnon).await
  }
}

fn ensure_unlocked(thread: &Thread) -> Result<()> {
  if thread.lock {
    return Err(ForumError::validation(format!(
      "This thread {} is locked",
      thread.id
    )));
  }
  Ok(())
}
