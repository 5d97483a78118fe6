//! Name service collaborator: human-readable name to agent address.

use crate::registry::ResolveError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Query interface of the name service.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Address bound to `name`, `None` when the name is not registered.
    async fn get_agent_address(&self, name: &str) -> Result<Option<String>, ResolveError>;
}

/// In-memory name table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNameService {
    names: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryNameService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `address`, replacing any previous binding.
    pub fn bind(&self, name: impl Into<String>, address: impl Into<String>) {
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        names.insert(name.into(), address.into());
    }

    pub fn unbind(&self, name: &str) {
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        names.remove(name);
    }
}

#[async_trait]
impl NameService for InMemoryNameService {
    async fn get_agent_address(&self, name: &str) -> Result<Option<String>, ResolveError> {
        let names = self.names.read().unwrap_or_else(|e| e.into_inner());
        Ok(names.get(name).cloned())
    }
}

#[derive(Deserialize)]
struct NameRecord {
    address: Option<String>,
}

/// Name service adapter for an HTTP query API.
///
/// `GET {base_url}/v1/names/{name}` returning `{"address": "agent1..."}`;
/// `404` or a null address means the name is not registered.
#[derive(Debug, Clone)]
pub struct HttpNameService {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpNameService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl NameService for HttpNameService {
    async fn get_agent_address(&self, name: &str) -> Result<Option<String>, ResolveError> {
        let url = format!("{}/v1/names/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ResolveError::NameService(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ResolveError::NameService(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        let record: NameRecord = response
            .json()
            .await
            .map_err(|e| ResolveError::NameService(e.to_string()))?;
        Ok(record.address)
    }
}
