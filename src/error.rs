//! Error types for the pdfbrew library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PdfBrewError`]: **Fatal**. The service cannot start at all
//!   (missing watch directory, unwritable output directory, broken config
//!   file). Returned as `Err(PdfBrewError)` before any task is spawned.
//!
//! * [`ConvertError`]: **Non-fatal**. A single file failed to convert
//!   (tool exited non-zero, tool could not be launched). Recorded in the
//!   [`crate::tracker::ErrorTracker`] and retried on the next poll; it
//!   never unwinds past the work item that produced it.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfbrew library.
///
/// Per-file failures use [`ConvertError`] and are absorbed by the worker
/// rather than propagated here.
#[derive(Debug, Error)]
pub enum PdfBrewError {
    // ── Startup errors ────────────────────────────────────────────────────
    /// A configured input directory does not exist or is not a directory.
    #[error("Cannot watch '{path}': it is not a directory")]
    WatchDirMissing { path: PathBuf },

    /// A configured output directory is missing or cannot be written to.
    #[error("Cannot write to output folder '{path}' or it does not exist: {source}")]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// The config file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file was read but its contents do not parse.
    #[error("Failed to parse config file '{path}': {detail}")]
    ConfigParse { path: PathBuf, detail: String },

    /// The config file extension is not one of the supported formats.
    #[error("Unsupported config format '{path}': expected .yaml, .yml, .json or .toml")]
    UnsupportedConfigFormat { path: PathBuf },

    /// Builder or file validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file.
///
/// The `Display` text is what ends up as `last_error` in the
/// [`crate::tracker::ErrorRecord`] for the file's output path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// The conversion tool could not be started at all.
    #[error("cannot launch '{tool}': {detail}")]
    Launch { tool: String, detail: String },

    /// The conversion tool ran and exited unsuccessfully.
    #[error("'{tool}' exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Filesystem error around the conversion (reading, renaming, removing).
    #[error("{context}: {detail}")]
    Io { context: String, detail: String },
}

impl ConvertError {
    pub(crate) fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        ConvertError::Io {
            context: context.into(),
            detail: err.to_string(),
        }
    }
}
