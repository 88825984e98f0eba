//! Input resolution: read a local file into a [`SourceFile`].
//!
//! The declared content type is derived from the extension so the staged
//! transport can match it against the blob token allow-list; unknown
//! extensions fall back to `application/octet-stream` and are rejected later
//! by validation, not here.

use crate::error::ConvertError;
use crate::format::detect_input_format;
use crate::state::SourceFile;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Read `path` into memory.
pub async fn load_file(path: impl AsRef<Path>) -> Result<SourceFile, ConvertError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ConvertError::FileNotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => ConvertError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ConvertError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = detect_input_format(&name)
        .map(|f| f.mime_type())
        .unwrap_or(FALLBACK_CONTENT_TYPE);

    debug!("Loaded {} ({} bytes, {})", path.display(), bytes.len(), content_type);
    Ok(SourceFile::new(name, content_type, bytes))
}
