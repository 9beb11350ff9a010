//! Persisted client state: session token, current user and owned threads.
//!
//! Each entry is a whole JSON value stored under a fixed key.

use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};

use super::types::{AuthToken, Profile, ThreadId};
use crate::db::Database;
use crate::error::{ForumError, Result};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";
pub const USER_DETAIL_KEY: &str = "userDetail";
pub const THREAD_KEY: &str = "ownedThreads";

const SESSION_KEYS: [&str; 4] = [TOKEN_KEY, USER_KEY, USER_DETAIL_KEY, THREAD_KEY];

#[derive(Clone)]
pub struct SessionStore {
  db: Database,
}

impl SessionStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = self
      .db
      .lock()?
      .query_row(
        "SELECT value FROM client_state WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| ForumError::cache(format!("Failed to read {}: {}", key, e)))?;

    raw
      .map(|raw| {
        serde_json::from_str(&raw)
          .map_err(|e| ForumError::decode(format!("Stored {} is malformed: {}", key, e)))
      })
      .transpose()
  }

  fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    self
      .db
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO client_state (key, value) VALUES (?, ?)",
        params![key, raw],
      )
      .map_err(|e| ForumError::cache(format!("Failed to store {}: {}", key, e)))?;
    Ok(())
  }

  pub fn token(&self) -> Result<Option<String>> {
    self.get(TOKEN_KEY)
  }

  /// Profile of the logged-in user as stored at login.
  pub fn user_detail(&self) -> Result<Option<Profile>> {
    self.get(USER_DETAIL_KEY)
  }

  pub fn owned_threads(&self) -> Result<Vec<ThreadId>> {
    Ok(self.get(THREAD_KEY)?.unwrap_or_default())
  }

  pub fn store_session(&self, auth: &AuthToken, profile: &Profile) -> Result<()> {
    self.set(TOKEN_KEY, &auth.token)?;
    self.set(USER_KEY, &auth.user_id)?;
    self.set(USER_DETAIL_KEY, profile)
  }

  pub fn add_owned_thread(&self, id: ThreadId) -> Result<()> {
    let mut owned = self.owned_threads()?;
    if !owned.contains(&id) {
      owned.push(id);
      self.set(THREAD_KEY, &owned)?;
    }
    Ok(())
  }

  pub fn remove_owned_thread(&self, id: ThreadId) -> Result<()> {
    let mut owned = self.owned_threads()?;
    if let Some(index) = owned.iter().position(|t| *t == id) {
      owned.remove(index);
      self.set(THREAD_KEY, &owned)?;
    }
    Ok(())
  }

  /// Forget the session and everything tied to it.
  pub fn clear(&self) -> Result<()> {
    let conn = self.db.lock()?;
    for key in SESSION_KEYS {
      conn
        .execute("DELETE FROM client_state WHERE key = ?", params![key])
        .map_err(|e| ForumError::cache(format!("Failed to remove {}: {}", key, e)))?;
    }
    Ok(())
  }
}
