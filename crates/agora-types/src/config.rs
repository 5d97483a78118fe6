//! Agent configuration types.
//!
//! Every section carries `#[serde(default)]` so a partial `config.toml` only
//! overrides what it names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level configuration for one agent process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Identity and listener settings.
    pub agent: AgentSection,
    /// Outbound delivery tuning.
    pub delivery: DeliveryConfig,
    /// Endpoint resolution.
    pub resolver: ResolverConfig,
    /// Store-and-forward relay.
    pub relay: RelayConfig,
    /// Dialogue engine.
    pub dialogue: DialogueConfig,
    /// Persistence backend.
    pub storage: StorageConfig,
    /// Log output.
    pub log: LogConfig,
}

/// Identity and listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Human-readable agent name (used in logs and the protocol manifest).
    pub name: String,
    /// Seed phrase for deterministic key derivation. A random key is
    /// generated when absent.
    pub seed: Option<String>,
    /// Derivation index used together with `seed`.
    pub index: u32,
    /// Address the `/submit` listener binds to.
    pub listen_addr: String,
    /// Public URL other agents should use to reach this agent. Advertised
    /// endpoints are managed by the registry collaborator; this value is only
    /// reported in the manifest.
    pub public_endpoint: Option<String>,
    /// Accept envelopes without a valid signature for every handler.
    pub allow_unsigned: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "agora-agent".to_string(),
            seed: None,
            index: 0,
            listen_addr: "127.0.0.1:8000".to_string(),
            public_endpoint: None,
            allow_unsigned: false,
        }
    }
}

/// Outbound delivery tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Timeout for a single HTTP POST attempt.
    pub attempt_timeout_ms: u64,
    /// Attempts per endpoint (including the first try).
    pub max_attempts_per_endpoint: u32,
    /// Upper bound on endpoints tried for one send.
    pub max_endpoints: usize,
    /// Initial backoff between attempts.
    pub min_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// Lifetime stamped on outgoing envelopes.
    pub envelope_ttl_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 5_000,
            max_attempts_per_endpoint: 2,
            max_endpoints: 4,
            min_backoff_ms: 200,
            max_backoff_ms: 5_000,
            envelope_ttl_secs: 300,
        }
    }
}

/// Endpoint resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Base URL of the registry (Almanac) query API.
    pub registry_url: Option<String>,
    /// Base URL of the name-service query API.
    pub name_service_url: Option<String>,
    /// Service name used when querying registrations.
    pub service: String,
    /// Static rules consulted before the network. Each destination maps to
    /// its agent address, endpoint URLs, or both.
    pub rules: HashMap<String, Vec<String>>,
    /// Timeout for registry and name-service queries.
    pub query_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            registry_url: None,
            name_service_url: None,
            service: "agora".to_string(),
            rules: HashMap::new(),
            query_timeout_ms: 5_000,
        }
    }
}

/// Store-and-forward relay (mailbox) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Mailbox base URL; relay fallback is disabled when absent.
    pub mailbox_url: Option<String>,
    /// How often to poll the mailbox for inbound envelopes.
    pub poll_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mailbox_url: None,
            poll_interval_secs: 5,
        }
    }
}

/// Dialogue engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// An instance with no traffic for this long is ended.
    pub inactivity_timeout_secs: u64,
    /// How often stale instances are swept.
    pub sweep_interval_secs: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. In-memory storage is used when absent.
    pub path: Option<PathBuf>,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
