//! Transport selection and per-format size ceilings.
//!
//! The direct path is a single multipart POST and sits behind an upstream
//! request-body ceiling, so anything larger than the staging threshold is
//! uploaded to blob storage first and converted by URL.

use crate::config::ClientConfig;
use crate::error::ConvertError;
use crate::format::InputFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the file reaches the conversion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// One multipart request carrying the file bytes.
    Direct,
    /// Blob upload, then a from-url conversion request.
    Staged,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Direct => "direct",
            Transport::Staged => "staged",
        })
    }
}

/// `true` when `size` is strictly above `threshold`.
pub fn use_staged_transport(size: u64, threshold: u64) -> bool {
    size > threshold
}

/// Pick the transport for a payload of `size` bytes.
pub fn select_transport(size: u64, config: &ClientConfig) -> Transport {
    if use_staged_transport(size, config.staging_threshold) {
        Transport::Staged
    } else {
        Transport::Direct
    }
}

/// Size ceiling in bytes that applies to `format`.
pub fn max_size_for(format: InputFormat, config: &ClientConfig) -> u64 {
    match format {
        InputFormat::Cr2 => config.cr2_max_file_size,
        _ => config.max_file_size,
    }
}

/// Reject `size` if it exceeds the ceiling for `format`.
pub fn check_size(format: InputFormat, size: u64, config: &ClientConfig) -> Result<(), ConvertError> {
    let limit = max_size_for(format, config);
    if size > limit {
        return Err(ConvertError::FileTooLarge {
            size,
            limit_mb: megabytes(limit),
        });
    }
    Ok(())
}

/// Bytes → MiB, rounded to two decimals for display.
pub fn megabytes(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}
