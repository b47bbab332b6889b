use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::StatusCode;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::buffer::Batch;
use crate::config::EndpointConfig;

const VERSION_HEADER: &str = "X-Agma-Version";
const VERSION: &str = "prebid_server_1.0";

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Request failed: {0}")]
    Request(reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected status code {0}")]
    UnexpectedStatus(StatusCode),
}

impl SendError {
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::Compression(_) => "compression",
            SendError::Request(_) => "request",
            SendError::Timeout => "timeout",
            SendError::UnexpectedStatus(_) => "status",
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SendError::Timeout
        } else {
            SendError::Request(e)
        }
    }
}

/// Delivers a batch to the analytics collector.
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    async fn send(&self, batch: Batch) -> Result<(), SendError>;
}

/// Posts batches over HTTP, optionally gzip-compressed.
pub struct HttpSender {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
    gzip: bool,
}

impl HttpSender {
    pub fn new(client: reqwest::Client, endpoint: &EndpointConfig) -> Self {
        Self {
            client,
            url: endpoint.url.clone(),
            timeout: endpoint.timeout.as_duration(),
            gzip: endpoint.gzip,
        }
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, batch: Batch) -> Result<(), SendError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(VERSION_HEADER, VERSION);

        request = if self.gzip {
            request
                .header(CONTENT_ENCODING, "gzip")
                .body(compress(&batch.payload)?)
        } else {
            request.body(batch.payload)
        };

        let response = request.send().await?;
        let status = response.status();

        // Read the body to the end so the connection goes back to the pool
        if let Err(e) = response.bytes().await {
            tracing::debug!(error = %e, "Failed to drain analytics response body");
        }

        if status != StatusCode::OK {
            return Err(SendError::UnexpectedStatus(status));
        }
        Ok(())
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}
