//! Resolver chain: destination (address or name) to ordered endpoints.
//!
//! Every resolver answers the same question. An empty endpoint list is a
//! normal answer ("nobody to deliver to directly"), which the dispatcher
//! turns into a relay attempt or a failed status. `Err` only surfaces
//! collaborator failures (registry or name service unreachable).

use crate::name_service::NameService;
use crate::registry::{Endpoint, RegistryClient, ResolveError};
use agora_wire::{is_valid_address, unix_now};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of resolving one destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Address the destination stands for, when known.
    pub address: Option<String>,
    /// Declared endpoints, in registry order.
    pub endpoints: Vec<Endpoint>,
}

impl Resolution {
    /// Nothing found.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Nothing found, but the destination's address is known.
    pub fn address_only(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            endpoints: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint URLs in registry order.
    pub fn urls(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.url.clone()).collect()
    }
}

/// Capability shared by every resolver.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, destination: &str) -> Result<Resolution, ResolveError>;
}

/// Resolves a literal address through the registry.
#[derive(Clone)]
pub struct AlmanacResolver {
    registry: Arc<dyn RegistryClient>,
    service: String,
}

impl AlmanacResolver {
    pub fn new(registry: Arc<dyn RegistryClient>, service: impl Into<String>) -> Self {
        Self {
            registry,
            service: service.into(),
        }
    }
}

#[async_trait]
impl Resolve for AlmanacResolver {
    async fn resolve(&self, destination: &str) -> Result<Resolution, ResolveError> {
        if !is_valid_address(destination) {
            debug!(destination, "not an address, nothing to look up");
            return Ok(Resolution::empty());
        }

        let record = self.registry.query_record(destination, &self.service).await?;
        let now = unix_now();
        match record {
            Some(record) if record.is_valid_at(now) => {
                debug!(
                    address = destination,
                    endpoints = record.endpoints.len(),
                    "resolved through registry"
                );
                Ok(Resolution {
                    address: Some(destination.to_string()),
                    endpoints: record.endpoints,
                })
            }
            Some(record) => {
                debug!(
                    address = destination,
                    expiry = record.expiry,
                    "registration expired"
                );
                Ok(Resolution::address_only(destination))
            }
            None => Ok(Resolution::address_only(destination)),
        }
    }
}

/// Resolves a human-readable name, then looks the bound address up in the
/// registry. Address-shaped destinations go straight to the registry.
#[derive(Clone)]
pub struct NameServiceResolver {
    names: Arc<dyn NameService>,
    almanac: AlmanacResolver,
}

impl NameServiceResolver {
    pub fn new(names: Arc<dyn NameService>, almanac: AlmanacResolver) -> Self {
        Self { names, almanac }
    }

    /// Address bound to `name`, if any.
    pub async fn lookup(&self, name: &str) -> Result<Option<String>, ResolveError> {
        self.names.get_agent_address(name).await
    }
}

#[async_trait]
impl Resolve for NameServiceResolver {
    async fn resolve(&self, destination: &str) -> Result<Resolution, ResolveError> {
        if is_valid_address(destination) {
            return self.almanac.resolve(destination).await;
        }
        match self.lookup(destination).await? {
            Some(address) => {
                debug!(name = destination, %address, "name bound");
                self.almanac.resolve(&address).await
            }
            None => {
                debug!(name = destination, "name not registered");
                Ok(Resolution::empty())
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Rule {
    address: Option<String>,
    endpoints: Vec<Endpoint>,
}

/// Static routing table. A rule maps a destination to the agent address it
/// stands for, to endpoint URLs, or to both.
#[derive(Debug, Clone, Default)]
pub struct RulesBasedResolver {
    rules: HashMap<String, Rule>,
}

impl RulesBasedResolver {
    /// Build from a destination to values table. A value that is an agent
    /// address becomes the destination's target; every other value is an
    /// endpoint URL.
    pub fn new(rules: HashMap<String, Vec<String>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(dest, values)| {
                let mut rule = Rule::default();
                for value in values {
                    if !is_valid_address(&value) {
                        rule.endpoints.push(Endpoint::new(value));
                    } else if rule.address.is_none() {
                        rule.address = Some(value);
                    } else {
                        warn!(destination = %dest, extra = %value, "rule names more than one address, keeping the first");
                    }
                }
                (dest, rule)
            })
            .collect();
        Self { rules }
    }

    /// Build from fully specified (possibly weighted) endpoints.
    pub fn from_endpoints(rules: HashMap<String, Vec<Endpoint>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(dest, endpoints)| {
                (
                    dest,
                    Rule {
                        address: None,
                        endpoints,
                    },
                )
            })
            .collect();
        Self { rules }
    }

    /// Add or replace one endpoint rule.
    pub fn insert(&mut self, destination: impl Into<String>, endpoints: Vec<Endpoint>) {
        self.rules.insert(
            destination.into(),
            Rule {
                address: None,
                endpoints,
            },
        );
    }

    /// Add or replace a rule routing `destination` to `address`, optionally
    /// at fixed endpoints. With no endpoints the rest of a chain resolves
    /// the address.
    pub fn route(
        &mut self,
        destination: impl Into<String>,
        address: impl Into<String>,
        endpoints: Vec<Endpoint>,
    ) {
        self.rules.insert(
            destination.into(),
            Rule {
                address: Some(address.into()),
                endpoints,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl Resolve for RulesBasedResolver {
    async fn resolve(&self, destination: &str) -> Result<Resolution, ResolveError> {
        let literal = || is_valid_address(destination).then(|| destination.to_string());
        let Some(rule) = self.rules.get(destination) else {
            return Ok(Resolution {
                address: literal(),
                endpoints: Vec::new(),
            });
        };
        let address = rule.address.clone().or_else(literal);
        if address.is_none() && !rule.endpoints.is_empty() {
            warn!(destination, "rule lists endpoints but no agent address to sign for");
        }
        Ok(Resolution {
            address,
            endpoints: rule.endpoints.clone(),
        })
    }
}

/// Name service first; destinations that are not registered names go to
/// the registry directly.
#[derive(Clone)]
pub struct GlobalResolver {
    names: NameServiceResolver,
    almanac: AlmanacResolver,
}

impl GlobalResolver {
    pub fn new(names: Arc<dyn NameService>, registry: Arc<dyn RegistryClient>, service: &str) -> Self {
        let almanac = AlmanacResolver::new(registry, service);
        Self {
            names: NameServiceResolver::new(names, almanac.clone()),
            almanac,
        }
    }
}

#[async_trait]
impl Resolve for GlobalResolver {
    async fn resolve(&self, destination: &str) -> Result<Resolution, ResolveError> {
        if is_valid_address(destination) {
            return self.almanac.resolve(destination).await;
        }
        match self.names.lookup(destination).await {
            Ok(Some(address)) => self.almanac.resolve(&address).await,
            Ok(None) => self.almanac.resolve(destination).await,
            Err(e) => {
                warn!(destination, error = %e, "name service unavailable, trying registry");
                self.almanac.resolve(destination).await
            }
        }
    }
}

/// Tries resolvers in order; the first non-empty answer wins. Once a
/// resolver maps the destination to an address, later resolvers look up
/// that address instead.
#[derive(Clone, Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn Resolve>>,
}

impl ChainResolver {
    pub fn new(resolvers: Vec<Arc<dyn Resolve>>) -> Self {
        Self { resolvers }
    }

    pub fn push(&mut self, resolver: Arc<dyn Resolve>) {
        self.resolvers.push(resolver);
    }
}

#[async_trait]
impl Resolve for ChainResolver {
    async fn resolve(&self, destination: &str) -> Result<Resolution, ResolveError> {
        let mut lookup = destination.to_string();
        let mut address: Option<String> = None;
        let mut last_err = None;
        for resolver in &self.resolvers {
            match resolver.resolve(&lookup).await {
                Ok(resolution) if !resolution.is_empty() => {
                    return Ok(Resolution {
                        address: address.or(resolution.address),
                        endpoints: resolution.endpoints,
                    });
                }
                Ok(resolution) => {
                    if address.is_none() {
                        if let Some(found) = resolution.address {
                            if found != lookup {
                                debug!(destination, address = %found, "destination mapped to address");
                                lookup = found.clone();
                            }
                            address = Some(found);
                        }
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }
        match (address, last_err) {
            (Some(address), _) => Ok(Resolution::address_only(address)),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(Resolution::empty()),
        }
    }
}

/// Full delivery priority order for a set of endpoints.
///
/// Unweighted sets keep their listed order. When any endpoint carries a
/// weight, the order is a weighted random draw without replacement
/// (missing weights count as 1); zero-weight endpoints go last.
pub fn order_endpoints(endpoints: &[Endpoint]) -> Vec<Endpoint> {
    order_endpoints_with(endpoints, &mut rand::thread_rng())
}

/// [`order_endpoints`] with a caller-supplied random source.
pub fn order_endpoints_with<R: Rng + ?Sized>(endpoints: &[Endpoint], rng: &mut R) -> Vec<Endpoint> {
    if endpoints.iter().all(|e| e.weight.is_none()) {
        return endpoints.to_vec();
    }

    let (mut pool, zero): (Vec<&Endpoint>, Vec<&Endpoint>) =
        endpoints.iter().partition(|e| e.weight.unwrap_or(1) > 0);
    let mut ordered = Vec::with_capacity(endpoints.len());

    while !pool.is_empty() {
        let total: u64 = pool.iter().map(|e| e.weight.unwrap_or(1) as u64).sum();
        let mut pick = rng.gen_range(0..total);
        let mut idx = pool.len() - 1;
        for (i, e) in pool.iter().enumerate() {
            let w = e.weight.unwrap_or(1) as u64;
            if pick < w {
                idx = i;
                break;
            }
            pick -= w;
        }
        ordered.push(pool.remove(idx).clone());
    }

    ordered.extend(zero.into_iter().cloned());
    ordered
}

/// The single endpoint to try first, if any.
pub fn select_endpoint(endpoints: &[Endpoint]) -> Option<Endpoint> {
    order_endpoints(endpoints).into_iter().next()
}
