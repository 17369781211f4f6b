//! Tracing subscriber setup.
//!
//! `RUST_LOG` overrides the default filter in both variants.

use crate::error::{Result, RowflowError};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,rowflow=debug";

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a console subscriber. Returns `false` if one was already installed.
pub fn init(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Install a console subscriber plus a daily-rolling file in `dir`.
///
/// Keep the returned guard alive; dropping it flushes and stops the file writer.
pub fn init_with_file(dir: impl AsRef<Path>, prefix: &str, default_filter: &str) -> Result<WorkerGuard> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| RowflowError::Config(format!("Failed to install logger: {}", e)))?;
    Ok(guard)
}
