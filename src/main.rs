mod app;
mod cache;
mod config;
mod db;
mod error;
mod forum;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crate::app::parse_comment_id;
use crate::forum::types::{CommentId, ThreadId, UserId};

#[derive(Parser, Debug)]
#[command(name = "forum")]
#[command(about = "A command-line client for the forum, usable offline from its cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/forum-client/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Forum backend URL, overriding the config file
  #[arg(long)]
  api_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Log in and remember the session
  Login {
    #[arg(short, long)]
    email: String,
    #[arg(short, long)]
    password: String,
  },
  /// Create an account and log in
  Register {
    #[arg(short, long)]
    email: String,
    #[arg(short, long)]
    name: String,
    #[arg(short, long)]
    password: String,
    /// Password again
    #[arg(long)]
    confirm: String,
  },
  /// Forget the session and clear the cache
  Logout,
  /// Show the logged-in user
  Whoami,
  /// List threads, newest first
  Threads {
    /// Offset of the first thread
    #[arg(long, default_value_t = 0)]
    start: usize,
    /// Stop after this many threads
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Show a thread with its comments
  Show { id: ThreadId },
  /// Start a new thread
  New {
    #[arg(short, long)]
    title: String,
    #[arg(short, long, default_value = "")]
    content: String,
    /// Only visible to logged-in users
    #[arg(long)]
    private: bool,
  },
  /// Edit a thread you own
  Edit {
    id: ThreadId,
    #[arg(short, long)]
    title: Option<String>,
    #[arg(short, long)]
    content: Option<String>,
    #[arg(long, conflicts_with = "private")]
    public: bool,
    #[arg(long)]
    private: bool,
    /// Lock the thread. Locked threads can't be edited, liked or commented
    /// on, so this can't be undone from here
    #[arg(long)]
    lock: bool,
  },
  /// Delete a thread you own
  Delete { id: ThreadId },
  /// Like a thread, or remove your like
  Like { id: ThreadId },
  /// Watch a thread, or stop watching it
  Watch { id: ThreadId },
  /// Comment on a thread
  Comment {
    thread_id: ThreadId,
    content: String,
    /// Reply to this comment
    #[arg(short, long, value_parser = parse_comment_id)]
    reply_to: Option<CommentId>,
  },
  /// Change the text of a comment
  EditComment {
    thread_id: ThreadId,
    #[arg(value_parser = parse_comment_id)]
    id: CommentId,
    content: String,
  },
  /// Like a comment
  LikeComment {
    thread_id: ThreadId,
    #[arg(value_parser = parse_comment_id)]
    id: CommentId,
    /// Remove the like instead
    #[arg(long)]
    undo: bool,
  },
  /// Show a user's profile
  Profile { user_id: UserId },
  /// List cached entries
  Cache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override API url if specified on command line
  let config = if let Some(api_url) = args.api_url {
    config::Config { api_url, ..config }
  } else {
    config
  };

  let _guard = logging::init(&config.log, &config.log_dir()?)?;

  let app = app::App::new(&config)?;
  app.run(args.command).await?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_comment_commands_take_thread_first() {
    let args = Args::try_parse_from(["forum", "edit-comment", "5", "#12", "new text"]).unwrap();
    match args.command {
      Command::EditComment {
        thread_id,
        id,
        content,
      } => {
        assert_eq!((thread_id, id), (5, 12));
        assert_eq!(content, "new text");
      }
      other => panic!("unexpected command {:?}", other),
    }
  }

  #[test]
  fn test_edit_public_conflicts_with_private() {
    assert!(Args::try_parse_from(["forum", "edit", "5", "--public", "--private"]).is_err());
    assert!(Args::try_parse_from(["forum", "edit", "5", "--lock"]).is_ok());
  }
}
