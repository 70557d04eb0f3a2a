// src/logging.rs

//! Global tracing setup.
//!
//! The level comes from the `--log-level` flag when given, from the
//! `DAGRUN_LOG` environment variable otherwise, and defaults to `info`.
//! Everything goes to stderr; stdout stays free for operator-facing
//! output.

use std::str::FromStr;

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

impl From<LogLevel> for Level {
    fn from(lvl: LogLevel) -> Self {
        match lvl {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Install the global subscriber. Call once, at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = cli_level.map(Level::from).unwrap_or_else(|| {
        std::env::var("DAGRUN_LOG")
            .ok()
            .and_then(|s| Level::from_str(s.trim()).ok())
            .unwrap_or(Level::INFO)
    });

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
