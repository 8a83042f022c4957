//! Tracing subscriber setup for the CLI.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

/// Filter directive source; falls back to the verbosity flag.
pub const LOG_ENV: &str = "WAYPOINT_LOG";

/// Build the filter: `WAYPOINT_LOG` when set, otherwise `debug` or `warn`.
pub fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("waypoint=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    })
}

/// Install the global subscriber.
///
/// Console output goes to stderr, as JSON when `json` is set. When `log_dir` is
/// given a daily-rotated file is written there as well; keep the returned guard
/// alive until exit so buffered lines are flushed.
pub fn init_tracing(
    verbose: bool,
    json: bool,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "waypoint.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console: Box<dyn tracing_subscriber::Layer<Registry> + Send + Sync> = if json {
        Box::new(fmt::layer().json().with_writer(std::io::stderr))
    } else {
        Box::new(fmt::layer().with_target(false).with_writer(std::io::stderr))
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter(verbose))
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults_follow_verbosity() {
        if std::env::var(LOG_ENV).is_ok() {
            return;
        }
        assert_eq!(filter(false).to_string(), "warn");
        assert!(filter(true).to_string().contains("waypoint=debug"));
    }
}
