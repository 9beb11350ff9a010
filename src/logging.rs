use color_eyre::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;

/// Environment variable holding filter directives, e.g. `forum=debug`.
pub const LOG_ENV: &str = "FORUM_LOG";

const LOG_FILE_PREFIX: &str = "forum.log";

/// Send tracing output to a daily log file in `dir`.
///
/// The returned guard flushes pending lines on drop and must be held until
/// the program exits.
pub fn init(config: &LogConfig, dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)?;

  let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter(config))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .try_init()?;

  Ok(guard)
}

fn filter(config: &LogConfig) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
    EnvFilter::try_new(config.level.as_deref().unwrap_or("info"))
      .unwrap_or_else(|_| EnvFilter::new("info"))
  })
}
