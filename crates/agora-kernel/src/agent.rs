//! A single agent: identity, dispatcher, inbound listener and background
//! tasks, all stopped through one shutdown channel.

use crate::error::{KernelError, KernelResult};
use agora_memory::SqliteStore;
use agora_resolver::resolver_from_config;
use agora_runtime::{
    Context, DispatchOptions, Dispatcher, HttpMailbox, Mailbox, Protocol,
};
use agora_types::config::AgentConfig;
use agora_types::error::{AgoraError, AgoraResult};
use agora_types::model::Model;
use agora_types::storage::{KeyValueStore, MemoryStore};
use agora_wire::{Envelope, EnvelopeServer, EnvelopeSink, Identity};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inbound envelopes waiting for the dispatch loop.
pub const INBOX_CAPACITY: usize = 1024;

type IntervalFn = Arc<dyn Fn(Dispatcher) -> BoxFuture<'static, AgoraResult<()>> + Send + Sync>;

struct IntervalTask {
    period: Duration,
    run: IntervalFn,
}

/// Feeds the agent's dispatch loop.
#[derive(Clone)]
pub struct Inbox {
    tx: mpsc::Sender<Envelope>,
}

impl Inbox {
    pub async fn push(&self, envelope: Envelope) -> Result<(), String> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| "agent is not running".to_string())
    }
}

#[async_trait]
impl EnvelopeSink for Inbox {
    async fn submit(&self, envelope: Envelope) -> Result<(), String> {
        self.push(envelope).await
    }
}

/// An autonomous agent.
pub struct Agent {
    config: AgentConfig,
    dispatcher: Dispatcher,
    inbox: Inbox,
    inbox_rx: Option<mpsc::Receiver<Envelope>>,
    intervals: Vec<IntervalTask>,
    serve: bool,
}

impl Agent {
    /// Assemble an agent from configuration: identity from the seed (or a
    /// fresh key), SQLite storage when a path is set, the configured
    /// resolver chain and relay.
    pub fn new(config: AgentConfig) -> KernelResult<Self> {
        let identity = match &config.agent.seed {
            Some(seed) => Identity::from_seed(seed, config.agent.index).map_err(AgoraError::from)?,
            None => Identity::generate(),
        };

        let store: Arc<dyn KeyValueStore> = match &config.storage.path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };

        let options = DispatchOptions::from_config(&config.delivery, config.agent.allow_unsigned);
        let mut builder = Dispatcher::builder(Arc::new(identity))
            .resolver(resolver_from_config(&config.resolver))
            .store(store)
            .options(options)
            .dialogue_timeout(Duration::from_secs(config.dialogue.inactivity_timeout_secs));
        if let Some(url) = &config.relay.mailbox_url {
            let timeout = Duration::from_millis(config.delivery.attempt_timeout_ms);
            builder = builder.mailbox(Arc::new(HttpMailbox::new(url.clone(), timeout)));
        }

        Ok(Self::with_dispatcher(config, builder.build()))
    }

    /// Wrap an already assembled dispatcher.
    pub fn with_dispatcher(config: AgentConfig, dispatcher: Dispatcher) -> Self {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        info!(agent = %config.agent.name, address = %dispatcher.address(), "agent created");
        Self {
            config,
            dispatcher,
            inbox: Inbox { tx },
            inbox_rx: Some(rx),
            intervals: Vec::new(),
            serve: true,
        }
    }

    /// Skip the HTTP listener; the agent then only receives through its
    /// inbox (local delivery or the relay).
    pub fn without_listener(mut self) -> Self {
        self.serve = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.agent.name
    }

    pub fn address(&self) -> &str {
        self.dispatcher.address()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    pub fn include(&mut self, protocol: Protocol) -> KernelResult<()> {
        self.dispatcher.include(protocol)?;
        Ok(())
    }

    pub fn on_message<M, F, Fut>(&mut self, handler: F) -> KernelResult<()>
    where
        M: Model,
        F: Fn(Context, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<()>> + Send + 'static,
    {
        self.dispatcher.on_message::<M, F, Fut>(handler)?;
        Ok(())
    }

    /// Run `task` every `period`, first tick one period after start.
    pub fn on_interval<F, Fut>(&mut self, period: Duration, task: F)
    where
        F: Fn(Dispatcher) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<()>> + Send + 'static,
    {
        let run: IntervalFn = Arc::new(move |d| Box::pin(task(d)));
        self.intervals.push(IntervalTask { period, run });
    }

    /// Self-description: name, address, endpoint and protocol manifests.
    pub fn manifest(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.config.agent.name,
            "address": self.address(),
            "endpoint": self.config.agent.public_endpoint,
            "protocols": self.dispatcher.manifests(),
        })
    }

    /// Spawn the dispatch loop, the listener and background tasks. They run
    /// until `shutdown` flips to `true`.
    pub async fn start(&mut self, shutdown: watch::Receiver<bool>) -> KernelResult<RunningAgent> {
        if self.inbox_rx.is_none() {
            return Err(KernelError::AlreadyStarted(self.address().to_string()));
        }
        let name = self.config.agent.name.clone();
        let mut tasks = Vec::new();

        let mut submit_url = None;
        if self.serve {
            let addr: SocketAddr = self.config.agent.listen_addr.parse().map_err(|e| {
                KernelError::BootFailed(format!(
                    "invalid listen address '{}': {e}",
                    self.config.agent.listen_addr
                ))
            })?;
            let (server, handle) = EnvelopeServer::start(addr, Arc::new(self.inbox.clone()), shutdown.clone())
                .await
                .map_err(|e| KernelError::BootFailed(format!("cannot bind {addr}: {e}")))?;
            submit_url = Some(server.submit_url());
            tasks.push(handle);
        }

        if let Some(rx) = self.inbox_rx.take() {
            tasks.push(spawn_dispatch_loop(
                name.clone(),
                self.dispatcher.clone(),
                rx,
                shutdown.clone(),
            ));
        }

        for task in self.intervals.drain(..) {
            tasks.push(spawn_interval(
                name.clone(),
                task,
                self.dispatcher.clone(),
                shutdown.clone(),
            ));
        }

        if let Some(mailbox) = self.dispatcher.mailbox() {
            tasks.push(spawn_relay_poll(
                name.clone(),
                mailbox,
                self.dispatcher.address().to_string(),
                self.inbox.clone(),
                Duration::from_secs(self.config.relay.poll_interval_secs.max(1)),
                shutdown.clone(),
            ));
        }

        tasks.push(spawn_dialogue_sweep(
            name.clone(),
            self.dispatcher.clone(),
            Duration::from_secs(self.config.dialogue.sweep_interval_secs.max(1)),
            shutdown,
        ));

        info!(agent = %name, address = %self.address(), submit_url = ?submit_url, "agent started");
        Ok(RunningAgent {
            name,
            address: self.address().to_string(),
            submit_url,
            tasks,
        })
    }

    /// Start and block until shutdown.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> KernelResult<()> {
        let running = self.start(shutdown).await?;
        running.join().await;
        Ok(())
    }
}

/// Handles of a started agent.
pub struct RunningAgent {
    name: String,
    address: String,
    submit_url: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningAgent {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// URL of the `/submit` listener, `None` when running without one.
    pub fn submit_url(&self) -> Option<&str> {
        self.submit_url.as_deref()
    }

    /// Wait for every task to stop.
    pub async fn join(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(agent = %self.name, error = %e, "agent task ended abnormally");
            }
        }
        info!(agent = %self.name, "agent stopped");
    }
}

fn spawn_dispatch_loop(
    name: String,
    dispatcher: Dispatcher,
    mut rx: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(envelope) => {
                        dispatcher.receive(envelope).await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(agent = %name, "dispatch loop stopped");
    })
}

fn spawn_interval(
    name: String,
    task: IntervalTask,
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(task.period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if let Err(e) = (task.run)(dispatcher.clone()).await {
                warn!(agent = %name, error = %e, "interval task failed");
            }
        }
        debug!(agent = %name, "interval task stopped");
    })
}

fn spawn_relay_poll(
    name: String,
    mailbox: Arc<dyn Mailbox>,
    address: String,
    inbox: Inbox,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match mailbox.fetch(&address).await {
                Ok(envelopes) => {
                    if !envelopes.is_empty() {
                        debug!(agent = %name, count = envelopes.len(), "fetched relayed envelopes");
                    }
                    for envelope in envelopes {
                        if inbox.push(envelope).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!(agent = %name, error = %e, "mailbox poll failed"),
            }
        }
        debug!(agent = %name, "relay poll stopped");
    })
}

fn spawn_dialogue_sweep(
    name: String,
    dispatcher: Dispatcher,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let ended = dispatcher.sweep();
            if ended > 0 {
                info!(agent = %name, ended, "ended inactive dialogues");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_runtime::InMemoryMailbox;
    use agora_types::storage::KeyValueStore;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Tick {
        n: u64,
    }

    fn test_config(name: &str) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.agent.name = name.to_string();
        config.agent.listen_addr = "127.0.0.1:0".to_string();
        config
    }

    #[test]
    fn test_seeded_agent_has_stable_address() {
        let mut config = test_config("alice");
        config.agent.seed = Some("alice seed phrase".to_string());
        let a = Agent::new(config.clone()).unwrap();
        let b = Agent::new(config).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.name(), "alice");
    }

    #[test]
    fn test_sqlite_storage_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config("store");
        config.storage.path = Some(dir.path().join("agent.db"));
        let agent = Agent::new(config).unwrap();
        agent
            .dispatcher()
            .storage()
            .set("k", serde_json::json!(1))
            .unwrap();
        assert!(dir.path().join("agent.db").exists());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (tx, rx) = watch::channel(false);
        let mut agent = Agent::new(test_config("twice")).unwrap().without_listener();
        let running = agent.start(rx.clone()).await.unwrap();
        assert!(running.submit_url().is_none());
        assert!(matches!(
            agent.start(rx).await,
            Err(KernelError::AlreadyStarted(_))
        ));
        tx.send(true).unwrap();
        running.join().await;
    }

    #[tokio::test]
    async fn test_bad_listen_address() {
        let (_tx, rx) = watch::channel(false);
        let mut config = test_config("bad");
        config.agent.listen_addr = "not an address".to_string();
        let mut agent = Agent::new(config).unwrap();
        assert!(matches!(
            agent.start(rx).await,
            Err(KernelError::BootFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_interval_task_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut agent = Agent::new(test_config("ticker")).unwrap().without_listener();
        agent.on_interval(Duration::from_millis(20), |d| async move {
            let store = d.storage();
            let n = store.get("ticks")?.and_then(|v| v.as_u64()).unwrap_or(0);
            store.set("ticks", serde_json::json!(n + 1))
        });
        let store = agent.dispatcher().storage();
        let running = agent.start(rx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        running.join().await;
        let ticks = store.get("ticks").unwrap().and_then(|v| v.as_u64()).unwrap();
        assert!(ticks >= 2);
    }

    #[tokio::test]
    async fn test_relay_poll_feeds_dispatch() {
        let (tx, rx) = watch::channel(false);
        let mailbox = Arc::new(InMemoryMailbox::new());
        let bob_id = Arc::new(Identity::generate());
        let dispatcher = Dispatcher::builder(bob_id.clone()).mailbox(mailbox.clone()).build();
        let mut config = test_config("bob");
        config.relay.poll_interval_secs = 1;
        let mut bob = Agent::with_dispatcher(config, dispatcher).without_listener();

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        bob.on_message::<Tick, _, _>(move |_ctx, tick| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(tick.n);
                Ok(())
            }
        })
        .unwrap();
        let running = bob.start(rx).await.unwrap();

        let alice = Identity::generate();
        let mut env = Envelope::new(alice.address(), bob_id.address(), uuid::Uuid::new_v4(), Tick::schema_digest());
        env.encode_payload(&Tick { n: 7 }).unwrap();
        env.nonce = Some(1);
        env.sign(&alice).unwrap();
        mailbox.enqueue(&env).await.unwrap();

        let n = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 7);
        tx.send(true).unwrap();
        running.join().await;
    }

    #[test]
    fn test_manifest_lists_protocols() {
        let mut agent = Agent::new(test_config("m")).unwrap();
        let mut proto = Protocol::new("tick", "1.0");
        proto.on_message::<Tick, _, _>(|_c, _m| async { Ok(()) }).unwrap();
        agent.include(proto).unwrap();
        let manifest = agent.manifest();
        assert_eq!(manifest["name"], "m");
        assert_eq!(manifest["protocols"][0]["name"], "tick");
    }
}
