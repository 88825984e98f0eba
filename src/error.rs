//! Error types for the fileshift library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`]: a conversion attempt failed. Its `Display` output is
//!   the human-readable message stored in the `error` phase of
//!   [`crate::state::ConversionState`], so every variant is worded for the
//!   end user.
//!
//! * [`CounterError`]: the global conversion counter could not be read or
//!   bumped. It never leaves [`crate::counter::CounterClient`]; the client
//!   logs it and degrades to zero.

use crate::format::{Category, InputFormat, OutputFormat};
use std::path::PathBuf;
use thiserror::Error;

/// Message shown for every connectivity failure, whatever the cause.
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";

/// All errors a conversion attempt can end in.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation errors (local, no network call) ───────────────────────
    /// The filename has no recognised extension and its MIME type does not
    /// name a supported format either.
    #[error("Unsupported file type. Supported {category} formats: {}", .category.accepted_formats())]
    UnsupportedFormat { filename: String, category: Category },

    /// The file is a known format, but belongs to the other category.
    #[error(
        "'{filename}' is an {found} file. Supported {expected} formats: {}",
        .expected.accepted_formats()
    )]
    CategoryMismatch {
        filename: String,
        expected: Category,
        found: Category,
    },

    /// The file exceeds the size ceiling that applies to its format.
    #[error("File size exceeds maximum limit of {limit_mb}MB")]
    FileTooLarge { size: u64, limit_mb: f64 },

    /// Zero-byte file.
    #[error("File is empty")]
    EmptyFile { filename: String },

    /// An explicit output format was requested that the input cannot produce.
    #[error("Cannot convert {input} to {output}")]
    OutputNotAllowed {
        input: InputFormat,
        output: OutputFormat,
    },

    // ── Remote rejection ─────────────────────────────────────────────────
    /// Non-2xx response carrying a readable `detail` (or `error`) field.
    #[error("{message}")]
    Remote { status: u16, message: String },

    /// Non-2xx response with no usable body.
    #[error("Server error: {status}")]
    ServerStatus { status: u16 },

    /// The response arrived but did not match the expected contract.
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    // ── Connectivity / lifecycle ─────────────────────────────────────────
    /// The request never completed (DNS, refused connection, timeout, reset).
    #[error("Network error. Please check your connection.")]
    Network { detail: String },

    /// The user aborted the in-flight upload.
    #[error("Upload cancelled")]
    Cancelled,

    /// A new file was selected while a conversion is still uploading or
    /// processing. The current conversion is left untouched.
    #[error("A conversion is already in progress ({phase})")]
    Busy { phase: &'static str },

    // ── Staged upload ────────────────────────────────────────────────────
    /// The blob token is only issued for an allow-list of content types.
    #[error("Content type '{content_type}' is not accepted for staged upload")]
    ContentTypeNotAllowed { content_type: String },

    // ── Local I/O ────────────────────────────────────────────────────────
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ───────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// The message stored in the `error` phase.
    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// True for errors detected locally before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConvertError::UnsupportedFormat { .. }
                | ConvertError::CategoryMismatch { .. }
                | ConvertError::FileTooLarge { .. }
                | ConvertError::EmptyFile { .. }
                | ConvertError::OutputNotAllowed { .. }
        )
    }

    /// Map a transport-level reqwest failure onto the connectivity class.
    pub(crate) fn network(err: reqwest::Error) -> Self {
        ConvertError::Network {
            detail: err.to_string(),
        }
    }
}

/// Failure of the global conversion counter. Never surfaced to the user.
#[derive(Debug, Error)]
pub enum CounterError {
    /// No counter endpoint is configured or the backing store is down.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Malformed counter payload: {0}")]
    Malformed(String),

    #[error("Counter request failed: {0}")]
    Request(#[from] reqwest::Error),
}
