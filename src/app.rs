use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result, Section};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::cache::{CacheLayer, CacheResult, NoopStorage, SqliteStorage, Storage};
use crate::config::Config;
use crate::db::Database;
use crate::error::ForumError;
use crate::forum::cached_client::{CachedForumClient, CommentSection, ThreadDetail};
use crate::forum::client::ForumClient;
use crate::forum::session::SessionStore;
use crate::forum::transport::HttpTransport;
use crate::forum::tree::walk_forest;
use crate::forum::types::{
  CommentId, NewThread, Profile, Thread, ThreadId, ThreadUpdate, UserId,
};
use crate::Command;

const OFFLINE_MARKER: &str = "(offline)";

/// Command runner: owns the client and prints results to stdout.
pub struct App {
  client: CachedForumClient<HttpTransport, Storage>,
}

impl App {
  pub fn new(config: &Config) -> Result<Self> {
    let db = Database::open(&config.cache_path()?)?;
    let storage = if config.cache.enabled {
      Storage::Sqlite(SqliteStorage::new(db.clone()))
    } else {
      Storage::Disabled(NoopStorage)
    };

    let transport = HttpTransport::new(&config.api_url, config.timeout())?;
    let client = CachedForumClient::new(
      ForumClient::new(transport, None),
      CacheLayer::new(storage),
      SessionStore::new(db),
    )?;

    Ok(Self { client })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    self.dispatch(command).await.map_err(|report| {
      let unauthorized = report
        .downcast_ref::<ForumError>()
        .and_then(ForumError::status_code)
        == Some(401);
      if unauthorized {
        report.suggestion("Log in with `forum login` and try again")
      } else {
        report
      }
    })
  }

  async fn dispatch(&self, command: Command) -> Result<()> {
    match command {
      Command::Login { email, password } => {
        let profile = self.client.login(&email, &password).await?;
        println!("Logged in as {} <{}>", profile.name, profile.email);
      }
      Command::Register {
        email,
        name,
        password,
        confirm,
      } => {
        let profile = self
          .client
          .register(&email, &name, &password, &confirm)
          .await?;
        println!("Registered and logged in as {}", profile.name);
      }
      Command::Logout => {
        self.client.logout()?;
        println!("Logged out");
      }
      Command::Whoami => match self.client.current_user()? {
        Some(user) => println!("{}", render_profile(&user)),
        None => println!("Not logged in"),
      },
      Command::Threads { start, limit } => self.list_threads(start, limit).await?,
      Command::Show { id } => self.show_thread(id).await?,
      Command::New {
        title,
        content,
        private,
      } => {
        let thread = self
          .client
          .create_thread(NewThread {
            title,
            is_public: !private,
            content,
          })
          .await?;
        println!("Created thread #{}", thread.data.id);
      }
      Command::Edit {
        id,
        title,
        content,
        public,
        private,
        lock,
      } => {
        let current = self.manageable_thread(id).await?;
        let visibility = match (public, private) {
          (true, _) => Some(true),
          (_, true) => Some(false),
          _ => None,
        };
        let update = thread_update(&current, title, content, visibility, lock);

        let thread = self.client.edit_thread(&current, update).await?;
        println!("Updated thread #{}", thread.data.id);
      }
      Command::Delete { id } => {
        self.manageable_thread(id).await?;
        self.client.delete_thread(id).await?;
        println!("Deleted thread #{}", id);
      }
      Command::Like { id } => {
        let current = self.client.fetch_thread(id).await?.data;
        let thread = self.client.toggle_thread_like(&current).await?;
        println!("{}", likes_summary(&thread.data));
      }
      Command::Watch { id } => {
        let current = self.client.fetch_thread(id).await?.data;
        let thread = self.client.toggle_thread_watch(&current).await?;
        println!("{} watching", thread.data.watchees.len());
      }
      Command::Comment {
        thread_id,
        content,
        reply_to,
      } => {
        let thread = self.client.fetch_thread(thread_id).await?.data;
        let id = self
          .client
          .post_comment(&thread, reply_to, &content)
          .await?;
        println!("Posted comment #{}", id);
      }
      Command::EditComment {
        thread_id,
        id,
        content,
      } => {
        let thread = self.client.fetch_thread(thread_id).await?.data;
        let comment = self.client.find_comment(thread_id, id).await?;
        self.client.edit_comment(&thread, &comment, &content).await?;
        println!("Updated comment #{}", id);
      }
      Command::LikeComment {
        thread_id,
        id,
        undo,
      } => {
        let thread = self.client.fetch_thread(thread_id).await?.data;
        self.client.like_comment(&thread, id, !undo).await?;
        let verb = if undo { "Unliked" } else { "Liked" };
        println!("{} comment #{}", verb, id);
      }
      Command::Profile { user_id } => {
        let profile = self.client.fetch_profile(user_id).await?;
        println!("{}", mark_offline(render_profile(&profile.data), &profile));
      }
      Command::Cache => {
        let entries = self.client.cached_entries()?;
        if entries.is_empty() {
          println!("Cache is empty");
        }
        for (key, stored_at) in entries {
          println!("{:<24} {}", key.to_string(), stored_at.to_rfc3339());
        }
      }
    }

    Ok(())
  }

  async fn list_threads(&self, start: usize, limit: Option<usize>) -> Result<()> {
    let listing = self.client.load_threads(start, limit).await?;
    if listing.offline {
      println!("{} showing cached threads", OFFLINE_MARKER);
    }
    if listing.ids.is_empty() {
      println!("No threads");
      return Ok(());
    }

    let threads = join_all(listing.ids.iter().map(|id| self.client.fetch_thread(*id))).await;
    for (id, thread) in listing.ids.iter().zip(threads) {
      match thread {
        Ok(thread) => println!("{}", mark_offline(render_thread_line(&thread.data), &thread)),
        Err(e) => println!("#{:<5} <unavailable: {}>", id, e),
      }
    }
    Ok(())
  }

  async fn show_thread(&self, id: ThreadId) -> Result<()> {
    let detail = self.client.thread_detail(id).await?;
    print!("{}", render_thread(&detail));

    match self.client.thread_comments(id).await {
      Ok(section) => print!("{}", render_comments(&section, Utc::now())),
      Err(e) => println!("\nComments unavailable: {}", e),
    }
    Ok(())
  }

  /// Fetch a thread the current user is allowed to edit or delete.
  async fn manageable_thread(&self, id: ThreadId) -> Result<Thread> {
    let thread = self.client.fetch_thread(id).await?.data;
    if !self.client.can_manage_thread(&thread)? {
      return Err(eyre!("You can't manage thread #{}", id));
    }
    Ok(thread)
  }
}

/// Edits requested on the command line applied over the thread's current
/// values. Locking is one-way: a locked thread can no longer be edited.
fn thread_update(
  current: &Thread,
  title: Option<String>,
  content: Option<String>,
  is_public: Option<bool>,
  lock: bool,
) -> ThreadUpdate {
  let mut update = ThreadUpdate::from_thread(current);
  if let Some(title) = title {
    update.title = title;
  }
  if let Some(content) = content {
    update.content = content;
  }
  if let Some(is_public) = is_public {
    update.is_public = is_public;
  }
  update.lock |= lock;
  update
}

// ============================================================================
// Rendering
// ============================================================================

fn mark_offline<T>(line: String, result: &CacheResult<T>) -> String {
  match (result.is_offline(), result.stored_at) {
    (true, Some(stored_at)) => format!(
      "{} {} cached {}",
      line,
      OFFLINE_MARKER,
      stored_at.to_rfc3339()
    ),
    (true, None) => format!("{} {}", line, OFFLINE_MARKER),
    (false, _) => line,
  }
}

fn plural(count: usize, unit: &str) -> String {
  if count == 1 {
    format!("{} {}", count, unit)
  } else {
    format!("{} {}s", count, unit)
  }
}

/// Relative age of a post, e.g. `3 hours ago | 2 likes`.
pub fn time_label(created_at: DateTime<Utc>, now: DateTime<Utc>, likes: usize) -> String {
  const UNITS: [(&str, i64); 4] = [
    ("week", 604_800),
    ("day", 86_400),
    ("hour", 3_600),
    ("minute", 60),
  ];

  let elapsed = (now - created_at).num_seconds();
  let age = UNITS
    .iter()
    .find(|(_, seconds)| elapsed >= *seconds)
    .map(|(unit, seconds)| format!("{} ago", plural((elapsed / seconds) as usize, unit)))
    .unwrap_or_else(|| "Just now".to_string());

  format!("{} | {}", age, plural(likes, "like"))
}

fn likes_summary(thread: &Thread) -> String {
  format!("#{} now has {}", thread.id, plural(thread.likes.len(), "like"))
}

fn render_profile(profile: &Profile) -> String {
  let role = if profile.admin { " [admin]" } else { "" };
  format!(
    "#{} {} <{}>{}",
    profile.id, profile.name, profile.email, role
  )
}

fn render_thread_line(thread: &Thread) -> String {
  let mut flags = String::new();
  if thread.lock {
    flags.push_str(" [locked]");
  }
  if !thread.is_public {
    flags.push_str(" [private]");
  }
  format!(
    "#{:<5} {}{} ({})",
    thread.id,
    thread.title,
    flags,
    plural(thread.likes.len(), "like")
  )
}

pub fn render_thread(detail: &ThreadDetail) -> String {
  let thread = &detail.thread.data;
  let author = detail
    .author
    .as_ref()
    .map(|a| a.name.as_str())
    .unwrap_or("unknown");

  let mut out = String::new();
  let _ = writeln!(out, "{}", mark_offline(render_thread_line(thread), &detail.thread));
  let _ = writeln!(
    out,
    "by {} on {}, {} watching",
    author,
    thread.created_at.format("%Y-%m-%d %H:%M"),
    thread.watchees.len()
  );
  let _ = writeln!(out);
  let _ = writeln!(out, "{}", thread.content);
  out
}

fn author_name(authors: &HashMap<UserId, Profile>, user_id: UserId) -> String {
  authors
    .get(&user_id)
    .map(|profile| profile.name.clone())
    .unwrap_or_else(|| format!("user {}", user_id))
}

/// Comment forest as indented text, replies under their parent.
pub fn render_comments(section: &CommentSection, now: DateTime<Utc>) -> String {
  let mut out = String::new();
  if section.roots.is_empty() {
    let _ = writeln!(out, "\nNo comments yet");
    return out;
  }

  let _ = writeln!(out, "\nComments:");
  for (depth, node) in walk_forest(&section.roots) {
    let comment = node.comment();
    let indent = "  ".repeat(depth + 1);
    let _ = writeln!(
      out,
      "{}#{} {} - {}",
      indent,
      comment.id,
      author_name(&section.authors, comment.creator_id),
      time_label(comment.created_at, now, comment.likes.len())
    );
    for line in comment.content.lines() {
      let _ = writeln!(out, "{}  {}", indent, line);
    }
  }
  out
}

/// Id of a comment as accepted on the command line.
pub fn parse_comment_id(raw: &str) -> std::result::Result<CommentId, String> {
  raw
    .trim_start_matches('#')
    .parse()
    .map_err(|_| format!("invalid comment id: {}", raw))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::forum::tree::build_tree;
  use crate::forum::types::{Comment, LikeSet};
  use chrono::{Duration, TimeZone};

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
  }

  #[test]
  fn test_time_label_units() {
    let now = now();
    assert_eq!(time_label(now, now, 0), "Just now | 0 likes");
    assert_eq!(
      time_label(now - Duration::seconds(59), now, 1),
      "Just now | 1 like"
    );
    assert_eq!(
      time_label(now - Duration::minutes(1), now, 2),
      "1 minute ago | 2 likes"
    );
    assert_eq!(
      time_label(now - Duration::hours(3), now, 2),
      "3 hours ago | 2 likes"
    );
    assert_eq!(
      time_label(now - Duration::days(6), now, 0),
      "6 days ago | 0 likes"
    );
    assert_eq!(
      time_label(now - Duration::days(15), now, 0),
      "2 weeks ago | 0 likes"
    );
  }

  #[test]
  fn test_time_label_future_is_just_now() {
    let now = now();
    assert_eq!(
      time_label(now + Duration::hours(1), now, 0),
      "Just now | 0 likes"
    );
  }

  fn comment(id: CommentId, creator_id: UserId, parent: Option<CommentId>) -> Comment {
    Comment {
      id,
      thread_id: 1,
      creator_id,
      parent_comment_id: parent,
      content: format!("text {}", id),
      created_at: now() - Duration::hours(id as i64),
      likes: [creator_id].into_iter().collect::<LikeSet>(),
    }
  }

  #[test]
  fn test_render_comments_indents_replies() {
    let mut authors = HashMap::new();
    authors.insert(
      1,
      Profile {
        id: 1,
        email: "ann@example.com".to_string(),
        name: "Ann".to_string(),
        image: None,
        admin: false,
      },
    );
    let section = CommentSection {
      roots: build_tree(vec![comment(1, 1, None), comment(2, 2, Some(1))]),
      authors,
    };

    let rendered = render_comments(&section, now());
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(
      lines,
      vec![
        "",
        "Comments:",
        "  #1 Ann - 1 hour ago | 1 like",
        "    text 1",
        "    #2 user 2 - 2 hours ago | 1 like",
        "      text 2",
      ]
    );
  }

  #[test]
  fn test_render_no_comments() {
    let section = CommentSection {
      roots: Vec::new(),
      authors: HashMap::new(),
    };
    assert!(render_comments(&section, now()).contains("No comments yet"));
  }

  #[test]
  fn test_offline_marker() {
    let stored_at = now();
    let offline = CacheResult::offline(1u64, stored_at);
    assert_eq!(
      mark_offline("line".to_string(), &offline),
      format!("line (offline) cached {}", stored_at.to_rfc3339())
    );
    assert_eq!(
      mark_offline("line".to_string(), &CacheResult::from_network(1u64)),
      "line"
    );
  }

  fn thread(lock: bool) -> Thread {
    Thread {
      id: 5,
      title: "Old".to_string(),
      content: "body".to_string(),
      is_public: true,
      lock,
      creator_id: 1,
      created_at: now(),
      likes: LikeSet::default(),
      watchees: LikeSet::default(),
    }
  }

  #[test]
  fn test_thread_update_keeps_unset_fields() {
    let update = thread_update(&thread(false), Some("New".to_string()), None, None, false);
    assert_eq!(update.title, "New");
    assert_eq!(update.content, "body");
    assert!(update.is_public);
    assert!(!update.lock);
  }

  #[test]
  fn test_thread_update_lock_and_visibility() {
    let update = thread_update(&thread(false), None, None, Some(false), true);
    assert!(!update.is_public);
    assert!(update.lock);
  }

  #[test]
  fn test_thread_update_never_unlocks() {
    let update = thread_update(&thread(true), None, None, None, false);
    assert!(update.lock);
  }

  #[test]
  fn test_parse_comment_id() {
    assert_eq!(parse_comment_id("#12"), Ok(12));
    assert_eq!(parse_comment_id("7"), Ok(7));
    assert!(parse_comment_id("abc").is_err());
  }
}
