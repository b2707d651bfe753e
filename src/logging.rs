//! Log file setup for the binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "gotwiki.log";

/// Map `-v` occurrences to a default filter directive.
pub fn level_for(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "info",
    1 => "debug",
    _ => "trace",
  }
}

/// Install the global subscriber, appending to `<dir>/gotwiki.log`.
///
/// `RUST_LOG` wins over `verbosity`. Stdout is left to command output. Keep
/// the returned guard alive until exit or buffered lines are lost.
pub fn init(dir: &Path, verbosity: u8) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(false)
    .with_ansi(false)
    .with_writer(writer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
