//! Outbound envelope delivery over HTTP.
//!
//! An endpoint is the full URL of a peer's submit route
//! (e.g. `http://10.0.0.5:8000/submit`). Delivery is a single JSON POST;
//! retries and endpoint fallback live in the dispatcher.

use crate::envelope::Envelope;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Path every agent accepts envelopes on.
pub const SUBMIT_PATH: &str = "/submit";

/// Errors from a single delivery attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("delivery to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("could not reach {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("{endpoint} rejected the envelope with HTTP {status}")]
    Rejected { endpoint: String, status: u16 },
    #[error("could not encode envelope: {0}")]
    Encode(String),
}

impl TransportError {
    /// Whether another attempt against the same endpoint could succeed.
    ///
    /// Client errors (4xx) mean the peer understood and refused the envelope;
    /// resending it unchanged will not help.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Connect { .. } => true,
            TransportError::Rejected { status, .. } => *status >= 500 || *status == 429,
            TransportError::Encode(_) => false,
        }
    }
}

/// Something that can carry one envelope to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a single envelope. Must give up after `timeout`.
    async fn deliver(
        &self,
        endpoint: &str,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// JSON-over-HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a transport sharing an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(
        &self,
        endpoint: &str,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let body = envelope
            .to_json()
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        let request = self
            .client
            .post(endpoint)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout)
            .send();

        let response = match tokio::time::timeout(timeout, request).await {
            Err(_) => {
                return Err(TransportError::Timeout {
                    endpoint: endpoint.to_string(),
                })
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(TransportError::Timeout {
                    endpoint: endpoint.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            debug!(endpoint, session = %envelope.session, "envelope delivered");
            Ok(())
        } else {
            Err(TransportError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
