//! Global conversion counter.
//!
//! The counter is strictly best-effort. [`CounterClient`] wraps any
//! [`CounterStore`] and turns every failure (network, bad payload, store not
//! configured) into `0` with a warning in the log. The converter only calls
//! [`CounterClient::increment_and_fetch`] after a `success` transition and
//! from a detached task, so nothing here can change a conversion outcome.
//!
//! [`ConversionTally`] is the presentation side: a cached value refreshed on
//! start and after each success, ignoring the zero that signals a failure.

use crate::config::ClientConfig;
use crate::error::CounterError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Backing store for the counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn read(&self) -> Result<u64, CounterError>;

    /// Increment and return the post-increment value.
    async fn increment(&self) -> Result<u64, CounterError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsPayload {
    total_conversions: serde_json::Value,
}

impl StatsPayload {
    /// Accepts a number or a numeric string, as key-value stores hand back either.
    fn total(&self) -> Result<u64, CounterError> {
        match &self.total_conversions {
            serde_json::Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| CounterError::Malformed(format!("not a count: {n}"))),
            serde_json::Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| CounterError::Malformed(format!("not a count: '{s}'"))),
            other => Err(CounterError::Malformed(format!("not a count: {other}"))),
        }
    }
}

/// `GET {stats_url}` / `POST {stats_url}/increment`, both returning
/// `{"totalConversions": n}`.
pub struct HttpCounterStore {
    client: reqwest::Client,
    stats_url: String,
}

impl HttpCounterStore {
    pub fn new(config: &ClientConfig) -> Result<Self, CounterError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            stats_url: config.stats_url(),
        })
    }

    async fn parse(response: reqwest::Response) -> Result<u64, CounterError> {
        let status = response.status();
        if !status.is_success() {
            return Err(CounterError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        let payload: StatsPayload = serde_json::from_str(&body)
            .map_err(|e| CounterError::Malformed(format!("{e}: {body}")))?;
        payload.total()
    }
}

#[async_trait]
impl CounterStore for HttpCounterStore {
    async fn read(&self) -> Result<u64, CounterError> {
        let response = self.client.get(&self.stats_url).send().await?;
        Self::parse(response).await
    }

    async fn increment(&self) -> Result<u64, CounterError> {
        let url = format!("{}/increment", self.stats_url);
        let response = self.client.post(&url).send().await?;
        Self::parse(response).await
    }
}

/// Best-effort client: never returns an error.
///
/// ```rust
/// use fileshift::{ClientConfig, CounterClient};
///
/// # tokio_test::block_on(async {
/// let config = ClientConfig::builder()
///     .api_url("http://127.0.0.1:9")
///     .request_timeout_secs(2)
///     .build()
///     .unwrap();
/// let counter = CounterClient::http(&config).unwrap();
/// // Unreachable store: degrades to 0 instead of failing.
/// assert_eq!(counter.increment_and_fetch().await, 0);
/// # })
/// ```
#[derive(Clone)]
pub struct CounterClient {
    store: Arc<dyn CounterStore>,
}

impl CounterClient {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// HTTP client for the configured stats endpoint.
    pub fn http(config: &ClientConfig) -> Result<Self, CounterError> {
        Ok(Self::new(Arc::new(HttpCounterStore::new(config)?)))
    }

    /// Current total, or `0` on any failure.
    pub async fn read_count(&self) -> u64 {
        match self.store.read().await {
            Ok(n) => {
                debug!(total = n, "Read conversion counter");
                n
            }
            Err(e) => {
                warn!(error = %e, "Counter read failed; reporting 0");
                0
            }
        }
    }

    /// Post-increment total, or `0` on any failure.
    pub async fn increment_and_fetch(&self) -> u64 {
        match self.store.increment().await {
            Ok(n) => {
                debug!(total = n, "Incremented conversion counter");
                n
            }
            Err(e) => {
                warn!(error = %e, "Counter increment failed; reporting 0");
                0
            }
        }
    }
}

/// Cached total owned by the presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionTally {
    total: u64,
}

impl ConversionTally {
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Apply a value from the counter client. A zero never overwrites a
    /// known total; returns whether the cached value changed.
    pub fn apply(&mut self, value: u64) -> bool {
        if value == 0 || value == self.total {
            return false;
        }
        self.total = value;
        true
    }
}
