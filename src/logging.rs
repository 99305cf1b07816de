//! Logging setup
//!
//! `RUST_LOG` wins when set. Otherwise the configured verbosity picks the
//! level: 1-2 error, 3 warn, 4 info, 5 debug, with 0 meaning info.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::ConfigError;

const STDOUT: &str = "stdout";

/// Level for a verbosity value, after `extra` bumps from the command line
pub fn level_for(verbosity: u8, extra: u8) -> Level {
    let verbosity = if extra > 0 {
        verbosity.max(3).saturating_add(extra)
    } else {
        verbosity
    };
    match verbosity {
        0 => Level::INFO,
        1 | 2 => Level::ERROR,
        3 => Level::WARN,
        4 => Level::INFO,
        _ => Level::DEBUG,
    }
}

fn filter(config: &LoggingConfig, extra: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level_for(config.verbosity, extra);
        EnvFilter::new(format!("warn,gha_allowlist={}", level))
    })
}

/// Install the global subscriber. Call once, at startup.
pub fn init(config: &LoggingConfig, extra: u8) -> Result<(), ConfigError> {
    let filter = filter(config, extra);

    if config.logfile.eq_ignore_ascii_case(STDOUT) {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.logfile)
        .map_err(|source| ConfigError::Io {
            path: config.logfile.clone(),
            source,
        })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}
