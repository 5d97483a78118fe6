//! The send/receive pipeline.
//!
//! Outbound: pick a session, resolve the destination, check the dialogue,
//! wrap and sign an envelope, then try local delivery, each resolved
//! endpoint in priority order, and finally the relay. Network trouble never
//! surfaces as `Err`; it becomes a [`MsgStatus`].
//!
//! Inbound: expiry, handler lookup, signature, replay, payload, dialogue,
//! then the handler. Rejections become a [`ReceiveOutcome::Dropped`].
//! Handlers run one at a time under the dispatch lock.

use crate::context::Context;
use crate::dialogue::{Dialogue, DialogueEngine};
use crate::protocol::{HandlerEntry, Protocol};
use crate::relay::Mailbox;
use crate::replay::ReplayGuard;
use crate::retry::{compute_backoff, retry_async, RetryConfig, RetryOutcome};
use crate::session::SessionTable;
use agora_resolver::{order_endpoints, ChainResolver, Resolution, Resolve};
use agora_types::config::DeliveryConfig;
use agora_types::error::{AgoraError, AgoraResult};
use agora_types::model::Model;
use agora_types::storage::{KeyValueStore, MemoryStore};
use agora_wire::{is_valid_address, unix_now, Envelope, EnvelopeError, HttpTransport, Identity, Transport};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Endpoint label reported for in-process delivery.
pub const LOCAL_ENDPOINT: &str = "local";

/// Final state of one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    EnqueuedForRelay,
    /// No endpoint accepted the envelope and the relay was unavailable.
    Failed,
}

/// Result of [`Dispatcher::send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MsgStatus {
    pub status: DeliveryStatus,
    pub detail: String,
    pub destination: String,
    pub endpoint: Option<String>,
    pub session: Uuid,
}

impl MsgStatus {
    fn failed(destination: &str, session: Uuid, detail: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            detail: detail.into(),
            destination: destination.to_string(),
            endpoint: None,
            session,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    pub fn is_failed(&self) -> bool {
        self.status == DeliveryStatus::Failed
    }
}

/// Why an inbound envelope was not handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Expired,
    Misaddressed,
    UnknownSchema,
    MissingSignature,
    InvalidSignature,
    Replay,
    MalformedPayload,
    IllegalTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Handled,
    Dropped(DropReason),
}

/// In-process delivery for agents sharing a runtime.
#[async_trait]
pub trait LocalRouter: Send + Sync {
    fn is_local(&self, address: &str) -> bool;

    /// Queue an envelope for a local agent. Must not wait for it to be handled.
    async fn route(&self, envelope: Envelope) -> Result<(), String>;
}

/// Delivery tuning.
///
/// Inbound handlers run one at a time under the dispatcher's receive lock.
/// A handler that awaits `ctx.send` or `ctx.reply` holds that lock for the
/// whole delivery, so an unreachable peer stalls every other inbound
/// envelope for up to [`DispatchOptions::worst_case_send_time`]. Keep these
/// bounds small for agents whose handlers reply, or have handlers spawn
/// their outbound work.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub attempt_timeout: Duration,
    pub retry: RetryConfig,
    pub max_endpoints: usize,
    pub envelope_ttl: Duration,
    /// Accept unsigned envelopes for every handler.
    pub allow_unsigned: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default(), false)
    }
}

impl DispatchOptions {
    pub fn from_config(config: &DeliveryConfig, allow_unsigned: bool) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            retry: RetryConfig::for_delivery(config),
            max_endpoints: config.max_endpoints.max(1),
            envelope_ttl: Duration::from_secs(config.envelope_ttl_secs),
            allow_unsigned,
        }
    }

    /// Upper bound on one send before the relay step: every endpoint tried
    /// up to `max_attempts` times with the full backoff between attempts.
    /// The relay enqueue adds its own retries on top.
    pub fn worst_case_send_time(&self) -> Duration {
        let attempts = self.retry.max_attempts.max(1);
        let backoff_ms: u64 = (0..attempts - 1)
            .map(|attempt| {
                if self.retry.jitter > 0.0 {
                    self.retry.max_delay_ms
                } else {
                    compute_backoff(&self.retry, attempt)
                }
            })
            .sum();
        let backoff = Duration::from_millis(backoff_ms);
        let per_endpoint = self.attempt_timeout * attempts + backoff;
        per_endpoint * self.max_endpoints as u32
    }
}

#[derive(Clone)]
struct Registered {
    entry: HandlerEntry,
    protocol: Option<Arc<ProtocolInfo>>,
}

struct ProtocolInfo {
    digest: String,
    name: String,
    dialogue: Option<Arc<Dialogue>>,
    manifest: serde_json::Value,
}

/// Builds a [`Dispatcher`].
pub struct DispatcherBuilder {
    identity: Arc<Identity>,
    resolver: Arc<dyn Resolve>,
    transport: Arc<dyn Transport>,
    mailbox: Option<Arc<dyn Mailbox>>,
    store: Arc<dyn KeyValueStore>,
    options: DispatchOptions,
    dialogue_timeout: Duration,
    strict_roles: bool,
}

impl DispatcherBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dialogue_timeout(mut self, timeout: Duration) -> Self {
        self.dialogue_timeout = timeout;
        self
    }

    pub fn strict_roles(mut self, strict: bool) -> Self {
        self.strict_roles = strict;
        self
    }

    pub fn build(self) -> Dispatcher {
        let dialogues = DialogueEngine::new(self.dialogue_timeout)
            .with_strict_roles(self.strict_roles)
            .with_store(self.store.clone());
        // Nonces start at the current time in microseconds so they keep
        // increasing across restarts.
        let nonce_seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        Dispatcher {
            inner: Arc::new(Inner {
                identity: self.identity,
                resolver: self.resolver,
                transport: self.transport,
                mailbox: self.mailbox,
                local: RwLock::new(None),
                store: self.store,
                dialogues,
                options: self.options,
                handlers: RwLock::new(HashMap::new()),
                protocols: RwLock::new(HashMap::new()),
                model_protocols: RwLock::new(HashMap::new()),
                sessions: SessionTable::new(),
                idle_timeout: self.dialogue_timeout,
                replay: ReplayGuard::new(),
                nonce: AtomicU64::new(nonce_seed),
                dispatch_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

struct Inner {
    identity: Arc<Identity>,
    resolver: Arc<dyn Resolve>,
    transport: Arc<dyn Transport>,
    mailbox: Option<Arc<dyn Mailbox>>,
    local: RwLock<Option<Arc<dyn LocalRouter>>>,
    store: Arc<dyn KeyValueStore>,
    dialogues: DialogueEngine,
    options: DispatchOptions,
    handlers: RwLock<HashMap<String, Registered>>,
    protocols: RwLock<HashMap<String, Arc<ProtocolInfo>>>,
    model_protocols: RwLock<HashMap<String, Arc<ProtocolInfo>>>,
    sessions: SessionTable,
    idle_timeout: Duration,
    replay: ReplayGuard,
    nonce: AtomicU64,
    dispatch_lock: tokio::sync::Mutex<()>,
}

/// One agent's message pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Start building a dispatcher for `identity`. Defaults: no resolution,
    /// HTTP transport, no relay, in-memory storage.
    pub fn builder(identity: Arc<Identity>) -> DispatcherBuilder {
        DispatcherBuilder {
            identity,
            resolver: Arc::new(ChainResolver::default()),
            transport: Arc::new(HttpTransport::new()),
            mailbox: None,
            store: Arc::new(MemoryStore::new()),
            options: DispatchOptions::default(),
            dialogue_timeout: Duration::from_secs(600),
            strict_roles: false,
        }
    }

    pub fn address(&self) -> &str {
        self.inner.identity.address()
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.inner.identity
    }

    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        self.inner.store.clone()
    }

    pub fn dialogues(&self) -> &DialogueEngine {
        &self.inner.dialogues
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.inner.sessions
    }

    pub fn mailbox(&self) -> Option<Arc<dyn Mailbox>> {
        self.inner.mailbox.clone()
    }

    pub fn set_local_router(&self, router: Arc<dyn LocalRouter>) {
        let mut local = self.inner.local.write().unwrap_or_else(|e| e.into_inner());
        *local = Some(router);
    }

    fn local_router(&self) -> Option<Arc<dyn LocalRouter>> {
        self.inner
            .local
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Register every handler of `protocol`. Fails without registering
    /// anything if one of its schemas already has a handler.
    pub fn include(&self, protocol: Protocol) -> AgoraResult<()> {
        let info = Arc::new(ProtocolInfo {
            digest: protocol.digest(),
            name: protocol.name().to_string(),
            dialogue: protocol.dialogue().cloned(),
            manifest: protocol.manifest(),
        });

        let mut handlers = self.inner.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(dup) = protocol
            .handlers()
            .find(|h| handlers.contains_key(h.schema_digest()))
        {
            return Err(AgoraError::Protocol(format!(
                "{} is already handled; cannot include protocol '{}'",
                dup.model(),
                protocol.name()
            )));
        }
        for entry in protocol.handlers() {
            handlers.insert(
                entry.schema_digest().to_string(),
                Registered {
                    entry: entry.clone(),
                    protocol: Some(info.clone()),
                },
            );
        }
        drop(handlers);

        let mut by_model = self
            .inner
            .model_protocols
            .write()
            .unwrap_or_else(|e| e.into_inner());
        for digest in protocol.model_digests() {
            by_model
                .entry(digest.to_string())
                .or_insert_with(|| info.clone());
        }
        drop(by_model);

        info!(protocol = %info.name, digest = %info.digest, "protocol included");
        self.inner
            .protocols
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info.digest.clone(), info);
        Ok(())
    }

    /// Register a handler outside any protocol.
    pub fn on_message<M, F, Fut>(&self, handler: F) -> AgoraResult<()>
    where
        M: Model,
        F: Fn(Context, M) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = AgoraResult<()>> + Send + 'static,
    {
        let entry = HandlerEntry::new::<M, F, Fut>(false, handler);
        let mut handlers = self.inner.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(entry.schema_digest()) {
            return Err(AgoraError::Protocol(format!(
                "{} is already handled",
                entry.model()
            )));
        }
        handlers.insert(
            entry.schema_digest().to_string(),
            Registered {
                entry,
                protocol: None,
            },
        );
        Ok(())
    }

    /// Digests of every included protocol.
    pub fn protocol_digests(&self) -> Vec<String> {
        let protocols = self.inner.protocols.read().unwrap_or_else(|e| e.into_inner());
        let mut digests: Vec<String> = protocols.keys().cloned().collect();
        digests.sort();
        digests
    }

    /// Manifests of every included protocol.
    pub fn manifests(&self) -> Vec<serde_json::Value> {
        let protocols = self.inner.protocols.read().unwrap_or_else(|e| e.into_inner());
        protocols.values().map(|p| p.manifest.clone()).collect()
    }

    pub fn handles(&self, schema_digest: &str) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(schema_digest)
    }

    fn protocol_for_model(&self, schema_digest: &str) -> Option<Arc<ProtocolInfo>> {
        self.inner
            .model_protocols
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(schema_digest)
            .cloned()
    }

    fn next_nonce(&self) -> u64 {
        self.inner.nonce.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send `message`, reusing the conversation's session if one exists.
    pub async fn send<M: Model>(&self, destination: &str, message: &M) -> AgoraResult<MsgStatus> {
        self.send_in_session(destination, message, None).await
    }

    /// Send `message` in `session` (or the conversation's session, or a new
    /// one). `Err` only for unencodable messages or signing failures.
    pub async fn send_in_session<M: Model>(
        &self,
        destination: &str,
        message: &M,
        session: Option<Uuid>,
    ) -> AgoraResult<MsgStatus> {
        let schema_digest = M::schema_digest();
        let protocol = self.protocol_for_model(&schema_digest);
        let protocol_digest = protocol.as_ref().map(|p| p.digest.clone());

        let (target, resolution) = self.resolve_target(destination).await;
        let Some(target) = target else {
            let session = session.unwrap_or_else(Uuid::new_v4);
            let detail = if resolution.is_empty() {
                "unable to resolve destination"
            } else {
                "endpoints known but no agent address for destination"
            };
            warn!(destination, detail, "cannot address envelope");
            return Ok(MsgStatus::failed(destination, session, detail));
        };
        let session = self
            .inner
            .sessions
            .select(&target, protocol_digest.as_deref(), session);

        if let Some(dialogue) = protocol.as_ref().and_then(|p| p.dialogue.as_ref()) {
            if let Err(e) =
                self.inner
                    .dialogues
                    .check(dialogue, &target, session, self.address(), &schema_digest)
            {
                warn!(destination, %session, error = %e, "send rejected by dialogue");
                return Ok(MsgStatus::failed(destination, session, e.to_string()));
            }
        }

        let mut envelope = Envelope::new(self.address(), target.clone(), session, schema_digest.clone());
        envelope.protocol_digest = protocol_digest.clone();
        envelope
            .encode_payload(message)
            .map_err(|e| AgoraError::Serialization(e.to_string()))?;
        envelope.expires = Some(unix_now() + self.inner.options.envelope_ttl.as_secs());
        envelope.nonce = Some(self.next_nonce());
        envelope.sign(&self.inner.identity)?;

        let status = self.deliver(destination, &envelope, &resolution).await;

        if status.status != DeliveryStatus::Failed {
            self.inner
                .sessions
                .remember(&target, protocol_digest.as_deref(), session);
            if let Some(dialogue) = protocol.as_ref().and_then(|p| p.dialogue.as_ref()) {
                match self.inner.dialogues.advance(
                    dialogue,
                    &target,
                    session,
                    self.address(),
                    &schema_digest,
                ) {
                    Ok(t) if t.terminal => {
                        self.inner
                            .sessions
                            .end(&target, protocol_digest.as_deref(), session)
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%session, error = %e, "dialogue moved while sending"),
                }
            }
        }
        Ok(status)
    }

    /// Target address and endpoints for `destination`. The address is
    /// `None` when the destination is a name nobody resolved.
    async fn resolve_target(&self, destination: &str) -> (Option<String>, Resolution) {
        if let Some(router) = self.local_router() {
            if router.is_local(destination) {
                return (Some(destination.to_string()), Resolution::empty());
            }
        }
        let fallback = is_valid_address(destination).then(|| destination.to_string());
        match self.inner.resolver.resolve(destination).await {
            Ok(resolution) => {
                let address = resolution.address.clone().or(fallback);
                (address, resolution)
            }
            Err(e) => {
                warn!(destination, error = %e, "resolution failed");
                (fallback, Resolution::empty())
            }
        }
    }

    async fn deliver(&self, destination: &str, envelope: &Envelope, resolution: &Resolution) -> MsgStatus {
        let mut failures: Vec<String> = Vec::new();
        let report = |status: DeliveryStatus, endpoint: Option<String>, detail: String| MsgStatus {
            status,
            detail,
            destination: destination.to_string(),
            endpoint,
            session: envelope.session,
        };

        if let Some(router) = self.local_router() {
            if router.is_local(&envelope.target) {
                match router.route(envelope.clone()).await {
                    Ok(()) => {
                        debug!(target = %envelope.target, session = %envelope.session, "delivered locally");
                        return report(
                            DeliveryStatus::Delivered,
                            Some(LOCAL_ENDPOINT.to_string()),
                            "delivered to local agent".to_string(),
                        );
                    }
                    Err(e) => failures.push(format!("local: {e}")),
                }
            }
        }

        let options = &self.inner.options;
        for endpoint in order_endpoints(&resolution.endpoints)
            .into_iter()
            .take(options.max_endpoints)
        {
            let url = endpoint.url;
            let outcome = retry_async(
                &options.retry,
                || self.inner.transport.deliver(&url, envelope, options.attempt_timeout),
                |e| e.is_retryable(),
            )
            .await;
            match outcome {
                RetryOutcome::Success { attempts, .. } => {
                    debug!(endpoint = %url, attempts, session = %envelope.session, "envelope delivered");
                    return report(
                        DeliveryStatus::Delivered,
                        Some(url),
                        "delivered".to_string(),
                    );
                }
                RetryOutcome::Exhausted { last_error, attempts } => {
                    debug!(endpoint = %url, attempts, error = %last_error, "endpoint failed");
                    failures.push(last_error.to_string());
                }
            }
        }

        if let Some(mailbox) = &self.inner.mailbox {
            let outcome = retry_async(
                &options.retry,
                || mailbox.enqueue(envelope),
                |e| e.is_retryable(),
            )
            .await;
            match outcome.into_result() {
                Ok(true) => {
                    info!(target = %envelope.target, session = %envelope.session, "envelope enqueued for relay");
                    return report(
                        DeliveryStatus::EnqueuedForRelay,
                        None,
                        "enqueued at relay".to_string(),
                    );
                }
                Ok(false) => failures.push("relay refused envelope".to_string()),
                Err(e) => failures.push(format!("relay: {e}")),
            }
        }

        let detail = if failures.is_empty() {
            "no endpoints and no relay available".to_string()
        } else {
            failures.join("; ")
        };
        warn!(destination, session = %envelope.session, %detail, "delivery failed");
        report(DeliveryStatus::Failed, None, detail)
    }

    /// Process one inbound envelope. Envelopes are processed one at a time
    /// and the handler future is awaited before the next one starts, so
    /// sends made from a handler delay all other inbound traffic (see
    /// [`DispatchOptions`]).
    pub async fn receive(&self, envelope: Envelope) -> ReceiveOutcome {
        let _turn = self.inner.dispatch_lock.lock().await;
        let outcome = self.process(envelope).await;
        if let ReceiveOutcome::Dropped(reason) = outcome {
            debug!(?reason, "envelope dropped");
        }
        outcome
    }

    async fn process(&self, envelope: Envelope) -> ReceiveOutcome {
        let now = unix_now();
        if let Err(e) = envelope.check_expiry(now) {
            info!(sender = %envelope.sender, error = %e, "dropping expired envelope");
            return ReceiveOutcome::Dropped(DropReason::Expired);
        }
        if envelope.target != self.address() {
            warn!(sender = %envelope.sender, target = %envelope.target, "dropping envelope addressed elsewhere");
            return ReceiveOutcome::Dropped(DropReason::Misaddressed);
        }

        let registered = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&envelope.schema_digest)
            .cloned();
        let Some(Registered { entry, protocol }) = registered else {
            info!(sender = %envelope.sender, schema = %envelope.schema_digest, "no handler for schema");
            return ReceiveOutcome::Dropped(DropReason::UnknownSchema);
        };

        match envelope.verify() {
            Ok(()) => {}
            Err(EnvelopeError::MissingSignature)
                if entry.allows_unverified() || self.inner.options.allow_unsigned =>
            {
                debug!(sender = %envelope.sender, "accepting unsigned envelope");
            }
            Err(EnvelopeError::MissingSignature) => {
                warn!(sender = %envelope.sender, model = entry.model(), "unsigned envelope rejected");
                return ReceiveOutcome::Dropped(DropReason::MissingSignature);
            }
            Err(EnvelopeError::MalformedPayload(e)) => {
                warn!(sender = %envelope.sender, error = %e, "undecodable payload");
                return ReceiveOutcome::Dropped(DropReason::MalformedPayload);
            }
            Err(e) => {
                warn!(sender = %envelope.sender, error = %e, "signature verification failed");
                return ReceiveOutcome::Dropped(DropReason::InvalidSignature);
            }
        }

        if !self.inner.replay.is_fresh(&envelope.sender, envelope.nonce) {
            warn!(sender = %envelope.sender, nonce = ?envelope.nonce, "replayed envelope");
            return ReceiveOutcome::Dropped(DropReason::Replay);
        }

        let protocol_digest = protocol.as_ref().map(|p| p.digest.clone());
        if envelope.protocol_digest.is_some() && envelope.protocol_digest != protocol_digest {
            debug!(
                claimed = ?envelope.protocol_digest,
                local = ?protocol_digest,
                "protocol digest differs from local registration"
            );
        }

        let ctx = Context::new(
            self.clone(),
            envelope.sender.clone(),
            envelope.session,
            protocol_digest.clone(),
            envelope.schema_digest.clone(),
        );
        let handler = match (entry.call)(ctx, &envelope) {
            Ok(fut) => fut,
            Err(e) => {
                warn!(sender = %envelope.sender, model = entry.model(), error = %e, "malformed payload");
                return ReceiveOutcome::Dropped(DropReason::MalformedPayload);
            }
        };

        let mut finished = false;
        if let Some(dialogue) = protocol.as_ref().and_then(|p| p.dialogue.as_ref()) {
            match self.inner.dialogues.advance(
                dialogue,
                &envelope.sender,
                envelope.session,
                &envelope.sender,
                &envelope.schema_digest,
            ) {
                Ok(t) => finished = t.terminal,
                Err(e) => {
                    warn!(sender = %envelope.sender, session = %envelope.session, error = %e, "illegal dialogue transition");
                    return ReceiveOutcome::Dropped(DropReason::IllegalTransition);
                }
            }
        }

        self.inner
            .replay
            .record(&envelope.sender, envelope.nonce, envelope.expires, now);
        if finished {
            self.inner
                .sessions
                .end(&envelope.sender, protocol_digest.as_deref(), envelope.session);
        } else {
            self.inner
                .sessions
                .remember(&envelope.sender, protocol_digest.as_deref(), envelope.session);
        }

        debug!(sender = %envelope.sender, model = entry.model(), session = %envelope.session, "dispatching");
        if let Err(e) = handler.await {
            warn!(sender = %envelope.sender, model = entry.model(), error = %e, "handler failed");
        }
        ReceiveOutcome::Handled
    }

    /// Periodic cleanup: end dialogue instances idle past their timeout,
    /// forget nonces of expired envelopes and conversations idle for as
    /// long as the dialogue timeout. Returns the number of dialogues ended.
    pub fn sweep(&self) -> usize {
        self.sweep_at(unix_now())
    }

    fn sweep_at(&self, now: u64) -> usize {
        let ended = self.inner.dialogues.prune_expired(now);
        let nonces = self.inner.replay.prune(now);
        let sessions = self
            .inner
            .sessions
            .prune_idle(now, self.inner.idle_timeout.as_secs());
        if nonces > 0 || sessions > 0 {
            debug!(nonces, sessions, "pruned replay and session state");
        }
        ended
    }
}
