//! Token-brokered direct upload to object storage.
//!
//! Two requests per upload:
//!
//! 1. `POST {blob_token_url}` with `{pathname, contentType}`; the server
//!    issues a short-lived client token scoped to [`ALLOWED_CONTENT_TYPES`].
//! 2. `PUT {blob_upload_url}/{pathname}` with `Authorization: Bearer <token>`
//!    and the raw bytes; storage answers with the public `{url}`.
//!
//! No byte-level progress is reported for this path; the converter shows it
//! as indeterminate.

use super::{build_client, rejection, BlobStore};
use crate::config::ClientConfig;
use crate::error::ConvertError;
use crate::state::ConversionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Content types the token endpoint will sign for.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/avif",
    "image/heic",
    "image/heif",
    "image/x-canon-cr2",
    "application/octet-stream",
    "application/epub+zip",
    "application/x-mobipocket-ebook",
    "application/pdf",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    pathname: &'a str,
    content_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// reqwest-backed [`BlobStore`].
pub struct HttpBlobStore {
    client: reqwest::Client,
    token_url: String,
    upload_url: String,
}

impl HttpBlobStore {
    pub fn new(config: &ClientConfig) -> Result<Self, ConvertError> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            token_url: config.blob_token_url(),
            upload_url: config.blob_upload_url(),
        })
    }

    async fn client_token(&self, pathname: &str, content_type: &str) -> Result<String, ConvertError> {
        let response = self
            .client
            .post(&self.token_url)
            .json(&TokenRequest {
                pathname,
                content_type,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Blob token request failed");
                ConvertError::network(e)
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(ConvertError::network)?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| ConvertError::InvalidResponse(format!("blob token: {e}")))?;
        Ok(token.client_token)
    }
}

/// Whether the token endpoint will sign for `content_type` (parameters ignored).
pub fn is_allowed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Content type to request a token for: the declared one when the token
/// endpoint accepts it, else the detected format's own.
fn blob_content_type(request: &ConversionRequest) -> &str {
    let declared = request.upload_content_type();
    if is_allowed_content_type(declared) {
        declared
    } else {
        debug!(declared, "Declared content type not signable, using format type");
        request.input.mime_type()
    }
}

/// URL-safe object name with a random suffix, e.g. `IMG_0001-3f9a1c2b.cr2`.
pub fn blob_pathname(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let (stem, ext) = match sanitized.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (sanitized.as_str(), None),
    };
    let stem = if stem.is_empty() { "upload" } else { stem };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    match ext {
        Some(ext) => format!("{stem}-{}.{ext}", &suffix[..8]),
        None => format!("{stem}-{}", &suffix[..8]),
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, request: &ConversionRequest) -> Result<String, ConvertError> {
        let content_type = blob_content_type(request);
        if !is_allowed_content_type(content_type) {
            return Err(ConvertError::ContentTypeNotAllowed {
                content_type: content_type.to_string(),
            });
        }

        let pathname = blob_pathname(&request.file.name);
        let token = self.client_token(&pathname, content_type).await?;

        let target = format!("{}/{}", self.upload_url, pathname);
        debug!(%target, bytes = request.file.size(), "PUT blob");
        let response = self
            .client
            .put(&target)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(request.file.bytes.clone())
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Blob upload failed");
                ConvertError::network(e)
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(ConvertError::network)?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }
        let uploaded: UploadResponse = serde_json::from_slice(&body)
            .map_err(|e| ConvertError::InvalidResponse(format!("blob upload: {e}")))?;

        info!(url = %uploaded.url, "Blob upload completed");
        Ok(uploaded.url)
    }
}
