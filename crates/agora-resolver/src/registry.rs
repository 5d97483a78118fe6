//! Registry (Almanac) collaborator: address to declared endpoints.
//!
//! The Almanac itself lives elsewhere; this module only defines the narrow
//! query interface the resolver consumes, an in-memory implementation for
//! tests and offline use, and an HTTP adapter for a registry query API.

use agora_types::error::AgoraError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Errors from a registry or name-service query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("registry query failed: {0}")]
    Registry(String),
    #[error("name service query failed: {0}")]
    NameService(String),
}

impl From<ResolveError> for AgoraError {
    fn from(e: ResolveError) -> Self {
        AgoraError::Resolution(e.to_string())
    }
}

/// One declared endpoint of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Full URL of the agent's submit route.
    pub url: String,
    /// Relative selection weight; unweighted endpoints are tried in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl Endpoint {
    /// An unweighted endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: None,
        }
    }

    /// A weighted endpoint.
    pub fn weighted(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight: Some(weight),
        }
    }
}

/// A registration as returned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Registered agent address.
    pub address: String,
    /// Unix seconds when the registration was made.
    #[serde(default)]
    pub timestamp: u64,
    /// Unix seconds after which the registration no longer counts.
    pub expiry: u64,
    /// Declared endpoints.
    pub endpoints: Vec<Endpoint>,
    /// Protocol digests the agent advertises.
    #[serde(default)]
    pub protocols: Vec<String>,
}

impl AgentRecord {
    /// Whether the registration is still valid at `now`.
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.expiry > now
    }
}

/// Query interface of the on-chain registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Freshest registration of `address` for `service`, `None` when the
    /// agent has never registered.
    async fn query_record(
        &self,
        address: &str,
        service: &str,
    ) -> Result<Option<AgentRecord>, ResolveError>;
}

/// In-memory registry keeping every registration ever made.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    records: Arc<RwLock<HashMap<(String, String), Vec<AgentRecord>>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration. Older registrations are kept; queries return the
    /// freshest one that has not expired.
    pub fn register(&self, service: &str, record: AgentRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry((record.address.clone(), service.to_string()))
            .or_default()
            .push(record);
    }

    /// Drop every registration of `address`.
    pub fn deregister(&self, address: &str) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.retain(|(a, _), _| a != address);
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn query_record(
        &self,
        address: &str,
        service: &str,
    ) -> Result<Option<AgentRecord>, ResolveError> {
        let now = agora_wire::unix_now();
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let freshest = records
            .get(&(address.to_string(), service.to_string()))
            .and_then(|history| {
                history
                    .iter()
                    .filter(|r| r.is_valid_at(now))
                    .max_by_key(|r| r.timestamp)
                    .cloned()
            });
        Ok(freshest)
    }
}

/// Registry adapter for an HTTP query API.
///
/// `GET {base_url}/v1/almanac/agents/{address}?service={service}` returning
/// an [`AgentRecord`]; `404` means not registered.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRegistryClient {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn query_record(
        &self,
        address: &str,
        service: &str,
    ) -> Result<Option<AgentRecord>, ResolveError> {
        let url = format!("{}/v1/almanac/agents/{}", self.base_url, address);
        let response = self
            .client
            .get(&url)
            .query(&[("service", service)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ResolveError::Registry(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ResolveError::Registry(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        let record: AgentRecord = response
            .json()
            .await
            .map_err(|e| ResolveError::Registry(e.to_string()))?;
        Ok(Some(record))
    }
}
