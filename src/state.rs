//! Conversion state: the single source of truth the presentation layer renders.
//!
//! [`ConversionState`] is a sum type with one variant per phase, so the
//! "converted file only on success, message only on error" rule holds by
//! construction. The state machine replaces the whole value on every
//! transition; nothing mutates a field across phases.

use crate::format::{InputFormat, OutputFormat};
use crate::progress::UploadProgress;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// What the presentation layer needs to know about the selected file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// MIME type as declared by the source, possibly empty.
    pub content_type: String,
}

/// A user-supplied file: metadata plus its raw bytes.
#[derive(Clone)]
pub struct SourceFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            size: self.size(),
            content_type: self.content_type.clone(),
        }
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A validated file on its way to the backend.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub file: SourceFile,
    pub input: InputFormat,
    pub output: OutputFormat,
}

impl ConversionRequest {
    /// Content type to upload with: the declared one, else the format's own.
    pub fn upload_content_type(&self) -> &str {
        if self.file.content_type.is_empty() {
            self.input.mime_type()
        } else {
            &self.file.content_type
        }
    }
}

/// Converted output returned by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct ConvertedFile {
    pub bytes: Bytes,
    pub content_type: String,
    /// Suggested download name, e.g. `photo.png`.
    pub filename: String,
}

impl fmt::Debug for ConvertedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedFile")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Phase tag without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Uploading,
    Processing,
    Success,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Uploading => "uploading",
            Phase::Processing => "processing",
            Phase::Success => "success",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five mutually exclusive phases of one conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConversionState {
    #[default]
    Idle,
    Uploading {
        file: FileInfo,
        /// `None` before the first event; `total == 0` means indeterminate.
        progress: Option<UploadProgress>,
    },
    Processing {
        file: FileInfo,
    },
    Success {
        file: FileInfo,
        converted: ConvertedFile,
    },
    Error {
        file: FileInfo,
        message: String,
    },
}

impl ConversionState {
    pub fn phase(&self) -> Phase {
        match self {
            ConversionState::Idle => Phase::Idle,
            ConversionState::Uploading { .. } => Phase::Uploading,
            ConversionState::Processing { .. } => Phase::Processing,
            ConversionState::Success { .. } => Phase::Success,
            ConversionState::Error { .. } => Phase::Error,
        }
    }

    pub fn file(&self) -> Option<&FileInfo> {
        match self {
            ConversionState::Idle => None,
            ConversionState::Uploading { file, .. }
            | ConversionState::Processing { file }
            | ConversionState::Success { file, .. }
            | ConversionState::Error { file, .. } => Some(file),
        }
    }

    pub fn converted_file(&self) -> Option<&ConvertedFile> {
        match self {
            ConversionState::Success { converted, .. } => Some(converted),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ConversionState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn progress(&self) -> Option<UploadProgress> {
        match self {
            ConversionState::Uploading { progress, .. } => *progress,
            _ => None,
        }
    }

    /// Uploading or processing: a request is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ConversionState::Uploading { .. } | ConversionState::Processing { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionState::Success { .. } | ConversionState::Error { .. }
        )
    }
}
