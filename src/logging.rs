//! Structured logging setup
//!
//! Console output goes to stderr so typed-mode replies on stdout stay clean.
//! When a log directory is given, a daily rolling `voice-assistant.log` is
//! written alongside.

use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::{Error, Result};

/// Log files kept before the oldest is removed
const MAX_LOG_FILES: usize = 7;

/// Filter directive for a `-v` count
#[must_use]
pub const fn filter_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info,reqwest=warn,hyper=warn,cpal=warn",
        1 => "info,voice_assistant=debug,reqwest=warn,hyper=warn",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the verbosity-derived filter.
///
/// # Errors
///
/// Returns error if a subscriber is already installed
pub fn init(verbosity: u8, log_dir: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let file_layer = log_dir.and_then(|dir| match file_appender(dir) {
        Ok(appender) => Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("file logging disabled: {e}");
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install logger: {e}")))?;

    if let Some(dir) = log_dir {
        tracing::debug!(log_dir = %dir.display(), "logger initialized");
    }
    Ok(())
}

fn file_appender(dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("voice-assistant")
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {e}")))
}
