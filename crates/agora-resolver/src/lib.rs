//! Destination resolution for the Agora agent network.
//!
//! A destination is either an agent address (`agent1...`) or a
//! human-readable name. Resolvers turn it into the endpoints the dispatcher
//! should try, consulting the registry (Almanac) and the name service
//! through the collaborator traits in [`registry`] and [`name_service`].

pub mod name_service;
pub mod registry;
pub mod resolver;

pub use name_service::{HttpNameService, InMemoryNameService, NameService};
pub use registry::{
    AgentRecord, Endpoint, HttpRegistryClient, InMemoryRegistry, RegistryClient, ResolveError,
};
pub use resolver::{
    order_endpoints, order_endpoints_with, select_endpoint, AlmanacResolver, ChainResolver,
    GlobalResolver, NameServiceResolver, Resolution, Resolve, RulesBasedResolver,
};

use agora_types::config::ResolverConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Build the resolver chain described by `config`.
///
/// Static rules come first. The network tier is a [`GlobalResolver`] when a
/// name service is configured, an [`AlmanacResolver`] when only a registry
/// is configured, and absent otherwise.
pub fn resolver_from_config(config: &ResolverConfig) -> Arc<dyn Resolve> {
    let timeout = Duration::from_millis(config.query_timeout_ms);
    let mut chain = ChainResolver::default();

    if !config.rules.is_empty() {
        chain.push(Arc::new(RulesBasedResolver::new(config.rules.clone())));
    }

    if let Some(registry_url) = &config.registry_url {
        let registry: Arc<dyn RegistryClient> =
            Arc::new(HttpRegistryClient::new(registry_url.clone(), timeout));
        match &config.name_service_url {
            Some(ns_url) => {
                let names: Arc<dyn NameService> =
                    Arc::new(HttpNameService::new(ns_url.clone(), timeout));
                chain.push(Arc::new(GlobalResolver::new(names, registry, &config.service)));
            }
            None => chain.push(Arc::new(AlmanacResolver::new(registry, config.service.clone()))),
        }
    }

    info!(
        rules = config.rules.len(),
        registry = config.registry_url.as_deref().unwrap_or("-"),
        name_service = config.name_service_url.as_deref().unwrap_or("-"),
        "resolver chain configured"
    );
    Arc::new(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_offline_config_uses_rules_only() {
        let bob = agora_wire::Identity::generate().address().to_string();
        let mut rules = HashMap::new();
        rules.insert(
            "bob.agent".to_string(),
            vec![bob.clone(), "http://bob/submit".to_string()],
        );
        let config = ResolverConfig {
            rules,
            ..Default::default()
        };
        let resolver = resolver_from_config(&config);
        let res = resolver.resolve("bob.agent").await.unwrap();
        assert_eq!(res.urls(), vec!["http://bob/submit".to_string()]);
        assert_eq!(res.address, Some(bob));
        assert!(resolver.resolve("carol.agent").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_config_resolves_nothing() {
        let resolver = resolver_from_config(&ResolverConfig::default());
        assert!(resolver.resolve("bob.agent").await.unwrap().is_empty());
    }
}
