//! Several agents in one process, delivering to each other without the
//! network.

use crate::agent::{Agent, Inbox, RunningAgent};
use crate::error::{KernelError, KernelResult};
use agora_runtime::LocalRouter;
use agora_wire::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::info;

/// Address to inbox table shared by every agent of a bureau.
#[derive(Clone, Default)]
pub struct BureauRouter {
    inboxes: Arc<RwLock<HashMap<String, Inbox>>>,
}

impl BureauRouter {
    fn insert(&self, address: &str, inbox: Inbox) -> bool {
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        if inboxes.contains_key(address) {
            return false;
        }
        inboxes.insert(address.to_string(), inbox);
        true
    }

    fn inbox(&self, address: &str) -> Option<Inbox> {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inboxes.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LocalRouter for BureauRouter {
    fn is_local(&self, address: &str) -> bool {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(address)
    }

    async fn route(&self, envelope: Envelope) -> Result<(), String> {
        let inbox = self
            .inbox(&envelope.target)
            .ok_or_else(|| format!("{} is not in this bureau", envelope.target))?;
        inbox.push(envelope).await
    }
}

/// Owns a group of agents sharing a shutdown signal.
pub struct Bureau {
    agents: Vec<Agent>,
    router: BureauRouter,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Default for Bureau {
    fn default() -> Self {
        Self::new()
    }
}

impl Bureau {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            agents: Vec::new(),
            router: BureauRouter::default(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Take ownership of `agent` and route local traffic to it.
    pub fn add(&mut self, agent: Agent) -> KernelResult<()> {
        if !self.router.insert(agent.address(), agent.inbox()) {
            return Err(KernelError::DuplicateAgent(agent.address().to_string()));
        }
        agent
            .dispatcher()
            .set_local_router(Arc::new(self.router.clone()));
        info!(agent = %agent.name(), address = %agent.address(), "agent joined bureau");
        self.agents.push(agent);
        Ok(())
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn router(&self) -> &BureauRouter {
        &self.router
    }

    /// A receiver that flips to `true` on [`Bureau::shutdown`].
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Start every agent.
    pub async fn start(&mut self) -> KernelResult<Vec<RunningAgent>> {
        let mut running = Vec::with_capacity(self.agents.len());
        for agent in &mut self.agents {
            running.push(agent.start(self.shutdown_rx.clone()).await?);
        }
        info!(agents = running.len(), "bureau started");
        Ok(running)
    }

    pub fn shutdown(&self) {
        info!("bureau shutting down");
        let _ = self.shutdown_tx.send(true);
    }

    /// Start every agent and run until Ctrl-C.
    pub async fn run(mut self) -> KernelResult<()> {
        let running = self.start().await?;
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C, shutting down");
        }
        self.shutdown();
        futures::future::join_all(running.into_iter().map(RunningAgent::join)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::config::AgentConfig;

    fn quiet_agent(seed: &str) -> Agent {
        let mut config = AgentConfig::default();
        config.agent.name = seed.to_string();
        config.agent.seed = Some(seed.to_string());
        Agent::new(config).unwrap().without_listener()
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut bureau = Bureau::new();
        bureau.add(quiet_agent("same")).unwrap();
        assert!(matches!(
            bureau.add(quiet_agent("same")),
            Err(KernelError::DuplicateAgent(_))
        ));
        assert_eq!(bureau.router().len(), 1);
    }

    #[tokio::test]
    async fn test_router_knows_members() {
        let mut bureau = Bureau::new();
        bureau.add(quiet_agent("a")).unwrap();
        bureau.add(quiet_agent("b")).unwrap();
        let a = bureau.agents()[0].address().to_string();
        assert!(bureau.router().is_local(&a));
        assert!(!bureau.router().is_local("agent1qnobody"));

        let stray = Envelope::new(a.clone(), "agent1qnobody", uuid::Uuid::new_v4(), "model:00");
        assert!(bureau.router().route(stray).await.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut bureau = Bureau::new();
        bureau.add(quiet_agent("x")).unwrap();
        let running = bureau.start().await.unwrap();
        assert_eq!(running.len(), 1);
        bureau.shutdown();
        for agent in running {
            tokio::time::timeout(std::time::Duration::from_secs(5), agent.join())
                .await
                .unwrap();
        }
    }
}
