//! Store-and-forward relay (mailbox) client.
//!
//! Agents without a reachable endpoint receive through a mailbox: senders
//! enqueue envelopes there, and the recipient polls for them.

use agora_wire::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("mailbox unreachable: {0}")]
    Unreachable(String),
    #[error("mailbox returned HTTP {0}")]
    Status(u16),
    #[error("mailbox response malformed: {0}")]
    Malformed(String),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Unreachable(_) => true,
            RelayError::Status(code) => *code >= 500 || *code == 429,
            RelayError::Malformed(_) => false,
        }
    }
}

/// The relay service, as seen by an agent.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Hand an envelope to the relay. `Ok(false)` means the relay refused it
    /// (e.g. the recipient has no mailbox).
    async fn enqueue(&self, envelope: &Envelope) -> Result<bool, RelayError>;

    /// Take every envelope waiting for `address`.
    async fn fetch(&self, address: &str) -> Result<Vec<Envelope>, RelayError>;
}

/// Process-local mailbox.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailbox {
    queues: Arc<Mutex<HashMap<String, Vec<Envelope>>>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes waiting for `address`, without taking them.
    pub fn pending(&self, address: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(address).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn enqueue(&self, envelope: &Envelope) -> Result<bool, RelayError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .entry(envelope.target.clone())
            .or_default()
            .push(envelope.clone());
        Ok(true)
    }

    async fn fetch(&self, address: &str) -> Result<Vec<Envelope>, RelayError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues.remove(address).unwrap_or_default())
    }
}

/// Mailbox adapter for a relay's HTTP API.
///
/// - `POST {base_url}/v1/envelopes` with the envelope JSON; `2xx` accepted,
///   `4xx` refused.
/// - `GET {base_url}/v1/mailbox/{address}` returning a JSON array of
///   envelopes, which the relay drops once served.
#[derive(Debug, Clone)]
pub struct HttpMailbox {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpMailbox {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Mailbox for HttpMailbox {
    async fn enqueue(&self, envelope: &Envelope) -> Result<bool, RelayError> {
        let body = envelope
            .to_json()
            .map_err(|e| RelayError::Malformed(e.to_string()))?;
        let response = self
            .client
            .post(format!("{}/v1/envelopes", self.base_url))
            .header("content-type", "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RelayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(target = %envelope.target, "envelope enqueued at relay");
            Ok(true)
        } else if status.is_client_error() && status.as_u16() != 429 {
            Ok(false)
        } else {
            Err(RelayError::Status(status.as_u16()))
        }
    }

    async fn fetch(&self, address: &str) -> Result<Vec<Envelope>, RelayError> {
        let response = self
            .client
            .get(format!("{}/v1/mailbox/{}", self.base_url, address))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RelayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }
        let raw: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RelayError::Malformed(e.to_string()))?;

        let mut envelopes = Vec::with_capacity(raw.len());
        for value in raw {
            let bytes = serde_json::to_vec(&value).map_err(|e| RelayError::Malformed(e.to_string()))?;
            match Envelope::from_json(&bytes) {
                Ok(env) => envelopes.push(env),
                Err(e) => debug!(error = %e, "skipping malformed relayed envelope"),
            }
        }
        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn envelope(target: &str) -> Envelope {
        Envelope::new("agent1qsender", target, Uuid::new_v4(), "model:00")
    }

    #[tokio::test]
    async fn test_in_memory_enqueue_fetch() {
        let mailbox = InMemoryMailbox::new();
        assert!(mailbox.enqueue(&envelope("agent1qbob")).await.unwrap());
        assert!(mailbox.enqueue(&envelope("agent1qbob")).await.unwrap());
        assert!(mailbox.enqueue(&envelope("agent1qcarol")).await.unwrap());
        assert_eq!(mailbox.pending("agent1qbob"), 2);

        let taken = mailbox.fetch("agent1qbob").await.unwrap();
        assert_eq!(taken.len(), 2);
        assert!(mailbox.fetch("agent1qbob").await.unwrap().is_empty());
        assert_eq!(mailbox.pending("agent1qcarol"), 1);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RelayError::Unreachable("x".into()).is_retryable());
        assert!(RelayError::Status(502).is_retryable());
        assert!(!RelayError::Status(400).is_retryable());
        assert!(!RelayError::Malformed("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_http_mailbox_roundtrip() {
        use axum::extract::{Path, State};
        use axum::routing::{get, post};
        use axum::{Json, Router};

        let store = InMemoryMailbox::new();
        let app = Router::new()
            .route(
                "/v1/envelopes",
                post(|State(store): State<InMemoryMailbox>, body: axum::body::Bytes| async move {
                    match Envelope::from_json(&body) {
                        Ok(env) if env.target.starts_with("agent1q") => {
                            store.enqueue(&env).await.unwrap();
                            axum::http::StatusCode::OK
                        }
                        _ => axum::http::StatusCode::BAD_REQUEST,
                    }
                }),
            )
            .route(
                "/v1/mailbox/{address}",
                get(|State(store): State<InMemoryMailbox>, Path(address): Path<String>| async move {
                    Json(store.fetch(&address).await.unwrap())
                }),
            )
            .with_state(store);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mailbox = HttpMailbox::new(format!("http://{addr}"), Duration::from_secs(5));
        let env = envelope("agent1qbob");
        assert!(mailbox.enqueue(&env).await.unwrap());
        assert!(!mailbox.enqueue(&envelope("nobody")).await.unwrap());

        let fetched = mailbox.fetch("agent1qbob").await.unwrap();
        assert_eq!(fetched, vec![env]);
        assert!(mailbox.fetch("agent1qbob").await.unwrap().is_empty());
    }
}
