//! Logging system setup
//!
//! Structured logging through `tracing`, filtered by `RUST_LOG` when set and by
//! the configured level otherwise.

use crate::config::LoggingSettings;
use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false))
            .try_init()?;
    }

    Ok(())
}
