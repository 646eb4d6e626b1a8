//! An HTTP client that publishes event batches to the collector.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};

use crate::event::{encode_batch, EventBatch};
use crate::{Error, Result};

const EVENTS_ENDPOINT: &str = "/v1/events:publish";

/// What the caller should do with a batch after an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The batch should be discarded. Either the collector accepted it, or it rejected it in a way
    /// that will never succeed.
    Delivered,
    /// The batch should be kept and uploaded again later.
    Retry,
}

impl UploadOutcome {
    /// Map a collector response status to an outcome.
    ///
    /// ```
    /// # use confidence_events::UploadOutcome;
    /// assert_eq!(UploadOutcome::from_status(200), UploadOutcome::Delivered);
    /// assert_eq!(UploadOutcome::from_status(403), UploadOutcome::Delivered);
    /// assert_eq!(UploadOutcome::from_status(429), UploadOutcome::Retry);
    /// assert_eq!(UploadOutcome::from_status(503), UploadOutcome::Retry);
    /// ```
    pub fn from_status(status: u16) -> UploadOutcome {
        match status {
            200 => UploadOutcome::Delivered,
            // TODO: honor the retry-after header instead of retrying on the next flush.
            429 => UploadOutcome::Retry,
            // The request is malformed or unauthorized and will never succeed.
            401..=499 => UploadOutcome::Delivered,
            _ => UploadOutcome::Retry,
        }
    }

    /// Returns `true` if the batch can be discarded.
    pub fn is_delivered(self) -> bool {
        self == UploadOutcome::Delivered
    }
}

/// Capability to send an HTTP POST request and report the response status.
///
/// An `Err` means the request could not be completed at all (DNS, connection, timeout).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `body` to `url` and return the response status. The response body is ignored.
    async fn post(&self, url: &Url, headers: &HeaderMap, body: Vec<u8>) -> Result<StatusCode>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn post(&self, url: &Url, headers: &HeaderMap, body: Vec<u8>) -> Result<StatusCode> {
        (**self).post(url, headers, body).await
    }
}

/// [`HttpTransport`] backed by [`reqwest`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with reqwest's default settings (no request timeout).
    pub fn new() -> ReqwestTransport {
        ReqwestTransport::default()
    }

    /// Create a transport that fails requests taking longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<ReqwestTransport> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ReqwestTransport { client })
    }

    /// Use a pre-configured reqwest client.
    pub fn from_client(client: reqwest::Client) -> ReqwestTransport {
        ReqwestTransport { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, url: &Url, headers: &HeaderMap, body: Vec<u8>) -> Result<StatusCode> {
        let response = self
            .client
            .post(url.clone())
            .headers(headers.clone())
            .body(body)
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Uploads event batches to the collector.
///
/// The uploader holds no per-batch state, so a single instance can serve concurrent uploads
/// (e.g., behind an `Arc`). Dropping an in-flight [`upload`](EventUploader::upload) future
/// cancels it; the batch should then be treated as not delivered.
#[derive(Debug)]
pub struct EventUploader<T = ReqwestTransport> {
    transport: T,
    url: Url,
    // Built once, read-only afterwards.
    headers: HeaderMap,
}

impl<T: HttpTransport> EventUploader<T> {
    /// Create an uploader publishing to `base_url` (e.g. `https://events.eu.confidence.dev`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if `base_url` does not form a valid URL.
    pub fn new(base_url: &str, transport: T) -> Result<EventUploader<T>> {
        let url = Url::parse(&format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            EVENTS_ENDPOINT
        ))
        .map_err(Error::InvalidBaseUrl)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Ok(EventUploader {
            transport,
            url,
            headers,
        })
    }

    /// Full URL batches are published to.
    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    /// Upload `batch` once and report whether the caller should discard or keep it.
    ///
    /// Never fails: network errors are reported as [`UploadOutcome::Retry`].
    pub async fn upload(&self, batch: &EventBatch) -> UploadOutcome {
        let event_count = batch.len();

        let body = match encode_batch(batch) {
            Ok(body) => body,
            Err(err) => {
                // Retrying cannot fix an unencodable batch.
                log::error!(target: "confidence", event_count; "failed to encode event batch, dropping it: {:?}", err);
                return UploadOutcome::Delivered;
            }
        };

        log::debug!(target: "confidence", event_count; "uploading event batch");
        let status = match self.transport.post(&self.url, &self.headers, body).await {
            Ok(status) => status,
            Err(err) => {
                log::warn!(target: "confidence", event_count; "error while uploading event batch: {:?}", err);
                return UploadOutcome::Retry;
            }
        };

        let outcome = UploadOutcome::from_status(status.as_u16());
        match outcome {
            UploadOutcome::Delivered if status == StatusCode::OK => {
                log::debug!(target: "confidence", event_count; "successfully uploaded event batch");
            }
            UploadOutcome::Delivered => {
                log::warn!(target: "confidence", event_count, status = status.as_u16(); "collector rejected event batch, dropping it");
            }
            UploadOutcome::Retry => {
                log::warn!(target: "confidence", event_count, status = status.as_u16(); "received retryable response while uploading event batch");
            }
        }
        outcome
    }
}
