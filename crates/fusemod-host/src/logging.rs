// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for the host binary

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI log level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    Warn,
    /// Errors, warnings, and informational messages
    #[default]
    Info,
    /// All above plus per-command and per-write detail
    Debug,
    /// All above plus frame hex dumps
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(level: CliLogLevel) -> String {
    let level = Level::from(level);
    format!("{level},fusemod={level}")
}

/// Log to stderr. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: CliLogLevel) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    #[cfg(debug_assertions)]
    let layer = layer.with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(layer).try_init()?;
    Ok(())
}
