//! Client configuration.
//!
//! Every externally configurable constant lives in [`ClientConfig`], built via
//! its [`ClientConfigBuilder`] or read from `FILESHIFT_*` environment
//! variables with [`ClientConfig::from_env`]. None of these values is a hard
//! requirement of the design; the defaults mirror the hosted deployment.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Default size ceiling for every format except `cr2`.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * MIB;

/// `cr2` raw photos get a larger ceiling.
pub const DEFAULT_CR2_MAX_FILE_SIZE: u64 = 30 * MIB;

/// Payloads strictly larger than this go through blob storage. The direct
/// path sits behind an upstream request-body ceiling slightly above it.
pub const DEFAULT_STAGING_THRESHOLD: u64 = 4 * MIB;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Chunk size of the streamed direct-upload body; one progress event per chunk.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for a [`crate::convert::Converter`] and its HTTP clients.
///
/// # Example
/// ```rust
/// use fileshift::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .api_url("https://convert.example.com")
///     .max_file_size(20 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.stats_url(), "https://convert.example.com/api/stats");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the conversion backend, without trailing slash.
    pub api_url: String,

    /// Size ceiling in bytes for every format except `cr2`. Default: 10 MiB.
    pub max_file_size: u64,

    /// Size ceiling in bytes for `cr2`. Default: 30 MiB.
    pub cr2_max_file_size: u64,

    /// Files strictly larger than this use the staged transport. Default: 4 MiB.
    pub staging_threshold: u64,

    /// Endpoint issuing short-lived blob upload tokens.
    /// Default: `{api_url}/api/upload`.
    pub blob_token_url: Option<String>,

    /// Base URL the blob is `PUT` under. Default: `{api_url}/blob`.
    pub blob_upload_url: Option<String>,

    /// Counter endpoint. Default: `{api_url}/api/stats`.
    pub stats_url: Option<String>,

    /// Whole-request timeout. `None` leaves the transport default in place.
    pub request_timeout_secs: Option<u64>,

    /// Chunk size of the streamed direct-upload body.
    pub upload_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            cr2_max_file_size: DEFAULT_CR2_MAX_FILE_SIZE,
            staging_threshold: DEFAULT_STAGING_THRESHOLD,
            blob_token_url: None,
            blob_upload_url: None,
            stats_url: None,
            request_timeout_secs: None,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build from `FILESHIFT_*` environment variables over the defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `FILESHIFT_API_URL` | `api_url` |
    /// | `FILESHIFT_MAX_FILE_SIZE` | `max_file_size` (bytes) |
    /// | `FILESHIFT_CR2_MAX_FILE_SIZE` | `cr2_max_file_size` (bytes) |
    /// | `FILESHIFT_STAGING_THRESHOLD` | `staging_threshold` (bytes) |
    /// | `FILESHIFT_BLOB_TOKEN_URL` | `blob_token_url` |
    /// | `FILESHIFT_BLOB_UPLOAD_URL` | `blob_upload_url` |
    /// | `FILESHIFT_STATS_URL` | `stats_url` |
    /// | `FILESHIFT_REQUEST_TIMEOUT` | `request_timeout_secs` |
    pub fn from_env() -> Result<Self, ConvertError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConvertError> {
        let mut b = Self::builder();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("FILESHIFT_API_URL") {
            b = b.api_url(url);
        }
        if let Some(n) = parse_var(&var, "FILESHIFT_MAX_FILE_SIZE")? {
            b = b.max_file_size(n);
        }
        if let Some(n) = parse_var(&var, "FILESHIFT_CR2_MAX_FILE_SIZE")? {
            b = b.cr2_max_file_size(n);
        }
        if let Some(n) = parse_var(&var, "FILESHIFT_STAGING_THRESHOLD")? {
            b = b.staging_threshold(n);
        }
        if let Some(url) = var("FILESHIFT_BLOB_TOKEN_URL") {
            b = b.blob_token_url(url);
        }
        if let Some(url) = var("FILESHIFT_BLOB_UPLOAD_URL") {
            b = b.blob_upload_url(url);
        }
        if let Some(url) = var("FILESHIFT_STATS_URL") {
            b = b.stats_url(url);
        }
        if let Some(secs) = parse_var(&var, "FILESHIFT_REQUEST_TIMEOUT")? {
            b = b.request_timeout_secs(secs);
        }
        b.build()
    }

    pub fn convert_url(&self) -> String {
        format!("{}/api/convert", self.api_url)
    }

    pub fn convert_from_url_url(&self) -> String {
        format!("{}/api/convert-from-url", self.api_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.api_url)
    }

    pub fn blob_token_url(&self) -> String {
        self.blob_token_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/upload", self.api_url))
    }

    pub fn blob_upload_url(&self) -> String {
        self.blob_upload_url
            .clone()
            .unwrap_or_else(|| format!("{}/blob", self.api_url))
    }

    pub fn stats_url(&self) -> String {
        self.stats_url
            .clone()
            .unwrap_or_else(|| format!("{}/api/stats", self.api_url))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_var(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConvertError> {
    match var(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            ConvertError::InvalidConfig(format!("{key} must be a whole number, got '{raw}'"))
        }),
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn cr2_max_file_size(mut self, bytes: u64) -> Self {
        self.config.cr2_max_file_size = bytes;
        self
    }

    pub fn staging_threshold(mut self, bytes: u64) -> Self {
        self.config.staging_threshold = bytes;
        self
    }

    pub fn blob_token_url(mut self, url: impl Into<String>) -> Self {
        self.config.blob_token_url = Some(url.into());
        self
    }

    pub fn blob_upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.blob_upload_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn stats_url(mut self, url: impl Into<String>) -> Self {
        self.config.stats_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn upload_chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload_chunk_size = bytes.max(1024);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, ConvertError> {
        let c = &self.config;
        if !(c.api_url.starts_with("http://") || c.api_url.starts_with("https://")) {
            return Err(ConvertError::InvalidConfig(format!(
                "api_url must be an http(s) URL, got '{}'",
                c.api_url
            )));
        }
        if c.max_file_size == 0 || c.cr2_max_file_size == 0 {
            return Err(ConvertError::InvalidConfig(
                "size limits must be greater than zero".into(),
            ));
        }
        if c.staging_threshold == 0 {
            return Err(ConvertError::InvalidConfig(
                "staging threshold must be greater than zero".into(),
            ));
        }
        if c.request_timeout_secs == Some(0) {
            return Err(ConvertError::InvalidConfig(
                "request timeout must be at least one second".into(),
            ));
        }
        Ok(self.config)
    }
}
