//! `tracing` subscriber setup.
//!
//! The library itself only emits events; binaries and tests call
//! [`init_logging`] (or [`init_logging_to_file`]) once to see them.
//! `RUST_LOG` takes precedence over the level passed in.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// fmt layer writing to a shared log file.
type FileLayer<S> = fmt::Layer<S, DefaultFields, Format, Mutex<File>>;

/// Failure to install the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The fallback directive could not be parsed.
    #[error("Invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Directive as given.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("A tracing subscriber is already installed")]
    AlreadyInitialised,

    /// The log file could not be opened.
    #[error("Cannot open log file {path:?}: {source}")]
    File {
        /// Requested log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Build the filter: `RUST_LOG` if set, else `level`.
fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter {
        directive: level.to_string(),
        reason: e.to_string(),
    })
}

/// Install a formatted subscriber for the process.
///
/// ```
/// let _ = nanoquant::logging::init_logging("nanoquant=debug");
/// tracing::info!("ready");
/// ```
///
/// # Errors
///
/// `InvalidFilter` for a malformed `level`, `AlreadyInitialised` when a
/// subscriber is already set.
pub fn init_logging(level: &str) -> Result<(), LoggingError> {
    let filter = build_filter(level)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialised)
}

/// Plain-text layer appending to `path`, creating parent directories.
fn file_layer<S>(path: &Path) -> Result<FileLayer<S>, LoggingError> {
    let file_error = |source: std::io::Error| LoggingError::File {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(file_error)?;
    }
    let file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(file_error)?;
    Ok(fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(file)))
}

/// [`init_logging`] plus a copy of every event appended to `path`.
///
/// # Errors
///
/// `File` when `path` cannot be opened, otherwise as [`init_logging`].
pub fn init_logging_to_file(level: &str, path: impl AsRef<Path>) -> Result<(), LoggingError> {
    let filter = build_filter(level)?;
    let file = file_layer(path.as_ref())?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialised)
}
