//! Delivery of readings to the ingestion sink.
//!
//! One HTTPS POST per reading, authenticated with an optional client
//! certificate. Every attempt, successful or not, ends up as a
//! [`DeliveryRecord`] in the [`DeliveryLog`]; nothing is propagated to the job
//! loop as an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Identity, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SinkConfig;
use crate::delivery_log::{DeliveryLog, DeliveryRecord};
use crate::reading::ReadingVector;

/// Content type expected by the sink for content-instance creation.
const SINK_CONTENT_TYPE: &str = "application/json;ty=4";

/// Sends one reading for one node and reports the outcome.
///
/// Implementations never fail: transport and application errors become
/// failure records.
#[async_trait]
pub trait Transmitter: Send + Sync {
    async fn send(&self, node_id: &str, reading: &ReadingVector) -> DeliveryRecord;
}

/// Errors that can occur while delivering a reading.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error ({code}): {message}")]
    Status { code: StatusCode, message: String },

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl DeliveryError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Request(err)
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { code, .. } => Some(code.as_u16()),
            _ => None,
        }
    }
}

/// Counters for delivery attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitterStats {
    pub sent: u64,
    pub failed: u64,
}

/// reqwest-backed transmitter for the oneM2M-style sink.
pub struct HttpsTransmitter {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Parsed `sink.base_url`; node ids are appended as one path segment
    base_url: Url,

    sink: SinkConfig,

    log: Arc<DeliveryLog>,

    sent: AtomicU64,
    failed: AtomicU64,
}

impl HttpsTransmitter {
    /// Build a transmitter from sink settings.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Config` if the sink URL or header values are
    /// invalid, the client certificate or key cannot be read, or the HTTP client
    /// cannot be built.
    pub fn new(sink: &SinkConfig, log: Arc<DeliveryLog>) -> Result<Self, DeliveryError> {
        let base_url = Url::parse(&sink.base_url).map_err(|e| {
            DeliveryError::Config(format!("invalid sink URL '{}': {}", sink.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DeliveryError::Config(format!(
                "sink URL '{}' cannot take a path",
                sink.base_url
            )));
        }

        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(sink.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(default_headers(sink)?)
            .danger_accept_invalid_certs(sink.accept_invalid_certs);

        if let (Some(cert), Some(key)) = (&sink.client_cert, &sink.client_key) {
            let mut pem = std::fs::read(key).map_err(|e| {
                DeliveryError::Config(format!("cannot read client key {}: {}", key.display(), e))
            })?;
            pem.push(b'\n');
            pem.extend(std::fs::read(cert).map_err(|e| {
                DeliveryError::Config(format!(
                    "cannot read client certificate {}: {}",
                    cert.display(),
                    e
                ))
            })?);
            let identity =
                Identity::from_pem(&pem).map_err(|e| DeliveryError::Config(e.to_string()))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            sink: sink.clone(),
            log,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Sink URL for a node, with the id escaped as a single path segment.
    pub fn url_for(&self, node_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(node_id);
        }
        url
    }

    /// Request body: `{"<app>": {"<content>": "<reading>"}}`.
    pub fn envelope(&self, reading: &ReadingVector) -> serde_json::Value {
        let mut inner = serde_json::Map::new();
        inner.insert(
            self.sink.content_field.clone(),
            serde_json::Value::String(reading.to_string()),
        );
        let mut outer = serde_json::Map::new();
        outer.insert(self.sink.app_field.clone(), serde_json::Value::Object(inner));
        serde_json::Value::Object(outer)
    }

    pub fn stats(&self) -> TransmitterStats {
        TransmitterStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Single POST, no retry.
    async fn send_request(
        &self,
        node_id: &str,
        reading: &ReadingVector,
    ) -> Result<(StatusCode, serde_json::Value), DeliveryError> {
        // Content type goes first; `json` only fills it in when absent
        let response = self
            .client
            .post(self.url_for(node_id))
            .header(CONTENT_TYPE, SINK_CONTENT_TYPE)
            .json(&self.envelope(reading))
            .send()
            .await
            .map_err(DeliveryError::from_reqwest)?;

        let status = response.status();
        let text = response.text().await.map_err(DeliveryError::from_reqwest)?;

        if status.is_success() {
            let data = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
            Ok((status, data))
        } else {
            Err(DeliveryError::Status {
                code: status,
                message: text,
            })
        }
    }
}

#[async_trait]
impl Transmitter for HttpsTransmitter {
    async fn send(&self, node_id: &str, reading: &ReadingVector) -> DeliveryRecord {
        let record = match self.send_request(node_id, reading).await {
            Ok((status, data)) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!(node_id = %node_id, status = status.as_u16(), "Reading delivered");
                DeliveryRecord::success(node_id, status.as_u16(), data)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(node_id = %node_id, error = %e, "Reading delivery failed");
                DeliveryRecord::failure(node_id, e.status(), e.to_string())
            }
        };

        if let Err(e) = self.log.append(&record).await {
            warn!(node_id = %node_id, error = %e, "Failed to append delivery record");
        }

        record
    }
}

fn default_headers(sink: &SinkConfig) -> Result<HeaderMap, DeliveryError> {
    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|e| DeliveryError::Config(format!("bad header value '{}': {}", v, e)))
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert("X-M2M-Origin", value(&sink.origin)?);
    headers.insert("X-M2M-RI", value(&sink.request_id)?);
    headers.insert("X-M2M-RVI", value(&sink.protocol_version)?);
    Ok(headers)
}
