//! Error taxonomy shared by the transport, cache and forum layers.

use thiserror::Error;

/// Result type alias for forum client operations.
pub type Result<T> = std::result::Result<T, ForumError>;

/// Errors that can occur while talking to the forum backend or the local cache.
#[derive(Debug, Clone, Error)]
pub enum ForumError {
  /// The request never reached the server or no response came back
  /// (DNS failure, refused connection, timeout, truncated body).
  #[error("Network unavailable: {0}")]
  Connectivity(String),

  /// The server was reachable and rejected the request.
  #[error("{}", format_application(.status, .message))]
  Application {
    status: Option<u16>,
    message: String,
  },

  /// Client-side input check failed; no request was made.
  #[error("{0}")]
  Validation(String),

  /// A response or cached record could not be decoded.
  #[error("Failed to decode: {0}")]
  Decode(String),

  /// The local cache store failed.
  #[error("Cache error: {0}")]
  Cache(String),
}

fn format_application(status: &Option<u16>, message: &str) -> String {
  match status {
    Some(status) => format!("Server error ({}): {}", status, message),
    None => format!("Server error: {}", message),
  }
}

impl ForumError {
  pub fn connectivity(message: impl Into<String>) -> Self {
    Self::Connectivity(message.into())
  }

  pub fn application(status: Option<u16>, message: impl Into<String>) -> Self {
    Self::Application {
      status,
      message: message.into(),
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode(message.into())
  }

  pub fn cache(message: impl Into<String>) -> Self {
    Self::Cache(message.into())
  }

  /// Whether the failure happened before the server could answer.
  ///
  /// Only these errors may be recovered from the local cache.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Connectivity(_))
  }

  /// HTTP status if the server answered with one.
  pub fn status_code(&self) -> Option<u16> {
    match self {
      Self::Application { status, .. } => *status,
      _ => None,
    }
  }
}

impl From<serde_json::Error> for ForumError {
  fn from(e: serde_json::Error) -> Self {
    Self::Decode(e.to_string())
  }
}

impl From<rusqlite::Error> for ForumError {
  fn from(e: rusqlite::Error) -> Self {
    Self::Cache(e.to_string())
  }
}
