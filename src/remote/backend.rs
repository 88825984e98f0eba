//! HTTP client for the conversion endpoint.
//!
//! The direct upload streams the file as a sequence of chunks so byte
//! progress can be observed without buffering the multipart body twice; each
//! chunk handed to the connection produces one [`UploadProgress`] event.
//!
//! [`UploadProgress`]: crate::progress::UploadProgress

use super::{build_client, read_payload, ConversionBackend, ConvertedPayload};
use crate::config::ClientConfig;
use crate::error::ConvertError;
use crate::format::OutputFormat;
use crate::progress::ProgressReporter;
use crate::state::ConversionRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::multipart;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct FromUrlBody<'a> {
    url: &'a str,
    filename: &'a str,
    output_format: OutputFormat,
}

/// reqwest-backed [`ConversionBackend`].
pub struct HttpBackend {
    client: reqwest::Client,
    convert_url: String,
    from_url_url: String,
    health_url: String,
    chunk_size: usize,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ConvertError> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            convert_url: config.convert_url(),
            from_url_url: config.convert_from_url_url(),
            health_url: config.health_url(),
            chunk_size: config.upload_chunk_size.max(1),
        })
    }

    fn send_failed(&self, endpoint: &str, err: reqwest::Error) -> ConvertError {
        warn!(endpoint, timeout = err.is_timeout(), error = %err, "Conversion request failed");
        ConvertError::network(err)
    }
}

/// Split `bytes` into chunks, reporting cumulative bytes as each is pulled.
pub(crate) fn progress_stream(
    bytes: Bytes,
    chunk_size: usize,
    progress: ProgressReporter,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let chunk_size = chunk_size.max(1);
    let total = bytes.len() as u64;
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(chunk_size)
        .map(|start| bytes.slice(start..(start + chunk_size).min(bytes.len())))
        .collect();

    let mut sent = 0u64;
    stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress.report(sent, total);
        Ok(chunk)
    })
}

#[async_trait]
impl ConversionBackend for HttpBackend {
    async fn convert_upload(
        &self,
        request: &ConversionRequest,
        progress: ProgressReporter,
    ) -> Result<ConvertedPayload, ConvertError> {
        let total = request.file.size();
        progress.report(0, total);

        let body = reqwest::Body::wrap_stream(progress_stream(
            request.file.bytes.clone(),
            self.chunk_size,
            progress,
        ));
        let part = multipart::Part::stream_with_length(body, total)
            .file_name(request.file.name.clone())
            .mime_str(request.upload_content_type())
            .map_err(|e| ConvertError::Internal(format!("multipart: {e}")))?;
        let form = multipart::Form::new().part("file", part);

        debug!(
            file = %request.file.name,
            bytes = total,
            output = %request.output,
            "POST {}",
            self.convert_url
        );
        let response = self
            .client
            .post(&self.convert_url)
            .query(&[("output_format", request.output.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.send_failed(&self.convert_url, e))?;

        read_payload(response).await
    }

    async fn convert_url(
        &self,
        url: &str,
        filename: &str,
        output: OutputFormat,
    ) -> Result<ConvertedPayload, ConvertError> {
        debug!(%url, %output, "POST {}", self.from_url_url);
        let response = self
            .client
            .post(&self.from_url_url)
            .json(&FromUrlBody {
                url,
                filename,
                output_format: output,
            })
            .send()
            .await
            .map_err(|e| self.send_failed(&self.from_url_url, e))?;

        read_payload(response).await
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(&self.health_url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}
