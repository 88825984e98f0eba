//! Remote collaborators of the converter.
//!
//! The state machine talks to two services through object-safe traits so it
//! can be driven by the HTTP clients here or by in-memory fakes:
//!
//! ```text
//!            ┌────────────── direct ──────────────┐
//! request ──▶│ ConversionBackend::convert_upload  │──▶ converted bytes
//!            └────────────────────────────────────┘
//!            ┌── staged ──────────┐   ┌───────────────────────────────┐
//! request ──▶│ BlobStore::upload  │──▶│ ConversionBackend::convert_url│──▶ bytes
//!            └────────────────────┘   └───────────────────────────────┘
//! ```
//!
//! 1. [`backend`]: the conversion endpoint (multipart upload with byte
//!    progress, from-url JSON request, health probe)
//! 2. [`blob`]: token-brokered direct upload to object storage
//!
//! Both share one response contract: 2xx carries the payload; anything else
//! carries a JSON `detail` (or `error`) message, or nothing usable.

pub mod backend;
pub mod blob;

use crate::error::ConvertError;
use crate::format::OutputFormat;
use crate::progress::ProgressReporter;
use crate::state::ConversionRequest;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

pub use backend::HttpBackend;
pub use blob::{HttpBlobStore, ALLOWED_CONTENT_TYPES};

/// Raw converted output as returned by the backend.
#[derive(Debug, Clone)]
pub struct ConvertedPayload {
    pub bytes: Bytes,
    /// `Content-Type` of the response, when the backend sent one.
    pub content_type: Option<String>,
}

/// The external conversion service.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Direct transport: upload the file bytes in one multipart request.
    ///
    /// Implementations report byte progress through `progress` as the body
    /// is sent; a final event with `loaded == total` marks the end of the
    /// upload.
    async fn convert_upload(
        &self,
        request: &ConversionRequest,
        progress: ProgressReporter,
    ) -> Result<ConvertedPayload, ConvertError>;

    /// Staged transport, second step: convert the resource at `url`.
    async fn convert_url(
        &self,
        url: &str,
        filename: &str,
        output: OutputFormat,
    ) -> Result<ConvertedPayload, ConvertError>;

    /// `true` when the service answers its health probe.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Object storage reached by a client-direct upload.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the request's file and return its public URL.
    async fn upload(&self, request: &ConversionRequest) -> Result<String, ConvertError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Interpret a non-2xx response body.
///
/// `detail` may be a plain string or a list of validation items carrying a
/// `msg` field; `error` is accepted as a second choice. Anything else yields
/// the generic status message.
pub fn rejection(status: u16, body: &[u8]) -> ConvertError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.detail.and_then(detail_message).or(b.error))
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());

    match message {
        Some(message) => ConvertError::Remote { status, message },
        None => ConvertError::ServerStatus { status },
    }
}

fn detail_message(detail: serde_json::Value) -> Option<String> {
    match detail {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Array(items) => {
            let msgs: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .map(str::to_string)
                .collect();
            (!msgs.is_empty()).then(|| msgs.join("; "))
        }
        _ => None,
    }
}

/// Turn a backend response into a payload or a rejection.
pub(crate) async fn read_payload(response: reqwest::Response) -> Result<ConvertedPayload, ConvertError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        return Err(rejection(status.as_u16(), &body));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.bytes().await.map_err(ConvertError::network)?;
    Ok(ConvertedPayload {
        bytes,
        content_type,
    })
}

/// Shared reqwest client honouring the configured timeout.
pub(crate) fn build_client(timeout: Option<std::time::Duration>) -> Result<reqwest::Client, ConvertError> {
    let mut builder = reqwest::Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder
        .build()
        .map_err(|e| ConvertError::Internal(format!("HTTP client: {e}")))
}
