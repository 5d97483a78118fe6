//! Dialogues: validated message state machines layered over a protocol.
//!
//! A [`Dialogue`] is an immutable graph whose edges are labelled with schema
//! digests. The [`DialogueEngine`] keeps one instance per (dialogue, peer,
//! session) and accepts a message only when an edge labelled with its schema
//! leaves the instance's current state.

use agora_types::model::{sha256_hex, Model, PROTOCOL_DIGEST_PREFIX};
use agora_types::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors from dialogue construction and transition checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialogueError {
    #[error("edge references undeclared state '{0}'")]
    UndeclaredState(String),
    #[error("state '{state}' has two edges for schema {schema}")]
    DuplicateSchema { state: String, schema: String },
    #[error("state '{0}' is not reachable from the default state")]
    Unreachable(String),
    #[error("dialogue has no terminal state")]
    NoTerminal,
    #[error("terminal state '{0}' has outgoing edges")]
    TerminalHasEdges(String),
    #[error("no transition from '{state}' for schema {schema}")]
    IllegalTransition { state: String, schema: String },
    #[error("{sender} may not send {schema} as {expected:?}")]
    RoleMismatch {
        sender: String,
        schema: String,
        expected: Role,
    },
}

impl From<DialogueError> for agora_types::error::AgoraError {
    fn from(e: DialogueError) -> Self {
        agora_types::error::AgoraError::Dialogue(e.to_string())
    }
}

/// Which party may send along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The party that sent the first message of the session.
    Initiator,
    /// The other party.
    Responder,
    /// Either party.
    Any,
}

/// One labelled transition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub schema_digest: String,
    pub model: String,
    pub target: String,
    pub role: Role,
    /// Observable edges are reported to observers outside the two parties.
    pub observable: bool,
}

impl Edge {
    /// Edge labelled with `M`'s schema, sendable by either party.
    pub fn of<M: Model>(source: &str, target: &str) -> Self {
        Self::with_digest(source, target, &M::schema_digest(), model_name::<M>())
    }

    pub fn with_digest(source: &str, target: &str, schema_digest: &str, model: &str) -> Self {
        Self {
            source: source.to_string(),
            schema_digest: schema_digest.to_string(),
            model: model.to_string(),
            target: target.to_string(),
            role: Role::Any,
            observable: false,
        }
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn observable(mut self) -> Self {
        self.observable = true;
        self
    }
}

/// Short type name of a model, used in manifests and logs.
pub fn model_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Collects states and edges, then validates them into a [`Dialogue`].
#[derive(Debug, Clone)]
pub struct DialogueBuilder {
    name: String,
    version: String,
    default_state: String,
    states: BTreeSet<String>,
    terminals: BTreeSet<String>,
    edges: Vec<Edge>,
}

impl DialogueBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>, default_state: impl Into<String>) -> Self {
        let default_state = default_state.into();
        let mut states = BTreeSet::new();
        states.insert(default_state.clone());
        Self {
            name: name.into(),
            version: version.into(),
            default_state,
            states,
            terminals: BTreeSet::new(),
            edges: Vec::new(),
        }
    }

    pub fn state(mut self, name: impl Into<String>) -> Self {
        self.states.insert(name.into());
        self
    }

    /// Declare a terminal state (declaring it as a state too).
    pub fn terminal(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.states.insert(name.clone());
        self.terminals.insert(name);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Shorthand for an unrestricted edge labelled with `M`.
    pub fn transition<M: Model>(self, source: &str, target: &str) -> Self {
        self.edge(Edge::of::<M>(source, target))
    }

    pub fn build(self) -> Result<Dialogue, DialogueError> {
        for edge in &self.edges {
            for state in [&edge.source, &edge.target] {
                if !self.states.contains(state) {
                    return Err(DialogueError::UndeclaredState(state.clone()));
                }
            }
        }

        let mut seen = BTreeSet::new();
        for edge in &self.edges {
            if !seen.insert((edge.source.as_str(), edge.schema_digest.as_str())) {
                return Err(DialogueError::DuplicateSchema {
                    state: edge.source.clone(),
                    schema: edge.schema_digest.clone(),
                });
            }
        }

        if self.terminals.is_empty() {
            return Err(DialogueError::NoTerminal);
        }
        if let Some(edge) = self.edges.iter().find(|e| self.terminals.contains(&e.source)) {
            return Err(DialogueError::TerminalHasEdges(edge.source.clone()));
        }

        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::from([self.default_state.as_str()]);
        while let Some(state) = queue.pop_front() {
            if !reached.insert(state) {
                continue;
            }
            for edge in self.edges.iter().filter(|e| e.source == state) {
                queue.push_back(edge.target.as_str());
            }
        }
        if let Some(state) = self.states.iter().find(|s| !reached.contains(s.as_str())) {
            return Err(DialogueError::Unreachable(state.clone()));
        }

        let mut edges = self.edges;
        edges.sort();
        let digest = graph_digest(&self.default_state, &self.states, &self.terminals, &edges);
        Ok(Dialogue {
            name: self.name,
            version: self.version,
            default_state: self.default_state,
            states: self.states,
            terminals: self.terminals,
            edges,
            digest,
        })
    }
}

fn graph_digest(
    default_state: &str,
    states: &BTreeSet<String>,
    terminals: &BTreeSet<String>,
    edges: &[Edge],
) -> String {
    let canonical = serde_json::json!({
        "default": default_state,
        "states": states,
        "terminals": terminals,
        "edges": edges
            .iter()
            .map(|e| serde_json::json!([e.source, e.schema_digest, e.target, e.role, e.observable]))
            .collect::<Vec<_>>(),
    });
    format!(
        "{PROTOCOL_DIGEST_PREFIX}{}",
        sha256_hex(agora_types::model::canonical_json(&canonical).as_bytes())
    )
}

/// A validated, immutable dialogue graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialogue {
    name: String,
    version: String,
    default_state: String,
    states: BTreeSet<String>,
    terminals: BTreeSet<String>,
    edges: Vec<Edge>,
    digest: String,
}

impl Dialogue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn default_state(&self) -> &str {
        &self.default_state
    }

    /// Digest over the graph structure, independent of name and version.
    pub fn protocol_digest(&self) -> &str {
        &self.digest
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminals.contains(state)
    }

    /// The edge leaving `state` labelled with `schema_digest`.
    pub fn edge_from(&self, state: &str, schema_digest: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.source == state && e.schema_digest == schema_digest)
    }

    /// Every schema digest that labels an edge.
    pub fn schema_digests(&self) -> BTreeSet<&str> {
        self.edges.iter().map(|e| e.schema_digest.as_str()).collect()
    }

    pub fn manifest(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "version": self.version,
            "digest": self.digest,
            "default_state": self.default_state,
            "states": self.states,
            "terminal_states": self.terminals,
            "edges": self.edges,
        })
    }
}

/// Applied (or would-be) transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Instance {
    dialogue: String,
    peer: String,
    session: Uuid,
    state: String,
    initiator: String,
    last_activity: u64,
}

type InstanceKey = (String, String, Uuid);

/// Tracks live dialogue instances for one agent.
pub struct DialogueEngine {
    instances: Mutex<HashMap<InstanceKey, Instance>>,
    inactivity_timeout: Duration,
    strict_roles: bool,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl DialogueEngine {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            inactivity_timeout,
            strict_roles: false,
            store: None,
        }
    }

    /// Require senders to match each edge's [`Role`].
    pub fn with_strict_roles(mut self, strict: bool) -> Self {
        self.strict_roles = strict;
        self
    }

    /// Mirror instances to `store` and reload any left by a previous run.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self.restore();
        self
    }

    fn store_key(dialogue: &str, peer: &str, session: Uuid) -> String {
        format!("dialogue:{dialogue}:{peer}:{session}")
    }

    fn restore(&self) {
        let Some(store) = &self.store else { return };
        let keys = match store.keys_with_prefix("dialogue:") {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "could not list stored dialogue instances");
                return;
            }
        };
        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            let instance = store
                .get(&key)
                .ok()
                .flatten()
                .and_then(|v| serde_json::from_value::<Instance>(v).ok());
            match instance {
                Some(inst) => {
                    instances.insert(
                        (inst.dialogue.clone(), inst.peer.clone(), inst.session),
                        inst,
                    );
                }
                None => warn!(%key, "skipping unreadable dialogue instance"),
            }
        }
        debug!(count = instances.len(), "restored dialogue instances");
    }

    fn persist(&self, instance: &Instance) {
        if let Some(store) = &self.store {
            let key = Self::store_key(&instance.dialogue, &instance.peer, instance.session);
            let result = serde_json::to_value(instance)
                .map_err(agora_types::error::AgoraError::from)
                .and_then(|v| store.set(&key, v));
            if let Err(e) = result {
                warn!(%key, error = %e, "could not persist dialogue instance");
            }
        }
    }

    fn forget(&self, dialogue: &str, peer: &str, session: Uuid) {
        if let Some(store) = &self.store {
            let key = Self::store_key(dialogue, peer, session);
            if let Err(e) = store.remove(&key) {
                warn!(%key, error = %e, "could not remove dialogue instance");
            }
        }
    }

    fn is_stale(&self, instance: &Instance, now: u64) -> bool {
        now.saturating_sub(instance.last_activity) > self.inactivity_timeout.as_secs()
    }

    fn evaluate(
        &self,
        dialogue: &Dialogue,
        current: Option<&Instance>,
        sender: &str,
        schema_digest: &str,
    ) -> Result<Transition, DialogueError> {
        let state = current
            .map(|i| i.state.as_str())
            .unwrap_or(dialogue.default_state());
        let edge = dialogue
            .edge_from(state, schema_digest)
            .ok_or_else(|| DialogueError::IllegalTransition {
                state: state.to_string(),
                schema: schema_digest.to_string(),
            })?;

        if self.strict_roles {
            let initiator = current.map(|i| i.initiator.as_str()).unwrap_or(sender);
            let allowed = match edge.role {
                Role::Any => true,
                Role::Initiator => sender == initiator,
                Role::Responder => sender != initiator,
            };
            if !allowed {
                return Err(DialogueError::RoleMismatch {
                    sender: sender.to_string(),
                    schema: schema_digest.to_string(),
                    expected: edge.role,
                });
            }
        }

        Ok(Transition {
            from: state.to_string(),
            to: edge.target.clone(),
            terminal: dialogue.is_terminal(&edge.target),
        })
    }

    /// Whether `sender` may send `schema_digest` now, without changing state.
    pub fn check(
        &self,
        dialogue: &Dialogue,
        peer: &str,
        session: Uuid,
        sender: &str,
        schema_digest: &str,
    ) -> Result<Transition, DialogueError> {
        let now = agora_wire::unix_now();
        let key = (dialogue.protocol_digest().to_string(), peer.to_string(), session);
        let instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        let current = instances.get(&key).filter(|i| !self.is_stale(i, now));
        self.evaluate(dialogue, current, sender, schema_digest)
    }

    /// Apply the transition for `schema_digest` sent by `sender`.
    ///
    /// `peer` is the other party of the conversation; it keys the instance
    /// together with the session. Reaching a terminal state ends the instance.
    pub fn advance(
        &self,
        dialogue: &Dialogue,
        peer: &str,
        session: Uuid,
        sender: &str,
        schema_digest: &str,
    ) -> Result<Transition, DialogueError> {
        let now = agora_wire::unix_now();
        let digest = dialogue.protocol_digest().to_string();
        let key = (digest.clone(), peer.to_string(), session);

        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        if instances.get(&key).is_some_and(|i| self.is_stale(i, now)) {
            debug!(dialogue = dialogue.name(), peer, %session, "stale instance restarted");
            instances.remove(&key);
        }

        let current = instances.get(&key);
        let transition = self.evaluate(dialogue, current, sender, schema_digest)?;
        let initiator = current
            .map(|i| i.initiator.clone())
            .unwrap_or_else(|| sender.to_string());

        if transition.terminal {
            instances.remove(&key);
            drop(instances);
            self.forget(&digest, peer, session);
            debug!(dialogue = dialogue.name(), peer, %session, state = %transition.to, "dialogue finished");
        } else {
            let instance = Instance {
                dialogue: digest,
                peer: peer.to_string(),
                session,
                state: transition.to.clone(),
                initiator,
                last_activity: now,
            };
            instances.insert(key, instance.clone());
            drop(instances);
            self.persist(&instance);
        }
        Ok(transition)
    }

    /// Current state of an instance, `None` when none is live.
    pub fn state_of(&self, dialogue: &Dialogue, peer: &str, session: Uuid) -> Option<String> {
        let key = (dialogue.protocol_digest().to_string(), peer.to_string(), session);
        let instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        instances.get(&key).map(|i| i.state.clone())
    }

    /// Number of live instances.
    pub fn active(&self) -> usize {
        self.instances.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop instances idle for longer than the inactivity timeout.
    pub fn prune_expired(&self, now: u64) -> usize {
        let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<InstanceKey> = instances
            .iter()
            .filter(|(_, i)| self.is_stale(i, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            instances.remove(key);
        }
        drop(instances);
        for (dialogue, peer, session) in &stale {
            self.forget(dialogue, peer, *session);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "pruned idle dialogue instances");
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::storage::MemoryStore;
    use schemars::JsonSchema;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Request {
        item: String,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Confirm {
        accepted: bool,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Cancel {
        reason: String,
    }

    const ALICE: &str = "agent1qalice";
    const BOB: &str = "agent1qbob";

    fn two_step() -> Dialogue {
        DialogueBuilder::new("order", "1.0", "default")
            .state("requested")
            .terminal("done")
            .transition::<Request>("default", "requested")
            .transition::<Confirm>("requested", "done")
            .build()
            .unwrap()
    }

    fn engine() -> DialogueEngine {
        DialogueEngine::new(Duration::from_secs(600))
    }

    #[test]
    fn test_out_of_order_message_rejected() {
        let d = two_step();
        let e = engine();
        let session = Uuid::new_v4();
        let err = e
            .advance(&d, BOB, session, BOB, &Confirm::schema_digest())
            .unwrap_err();
        assert!(matches!(err, DialogueError::IllegalTransition { ref state, .. } if state == "default"));
        assert!(e.state_of(&d, BOB, session).is_none());
    }

    #[test]
    fn test_full_conversation_reaches_terminal() {
        let d = two_step();
        let e = engine();
        let session = Uuid::new_v4();

        let t = e.advance(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();
        assert_eq!((t.from.as_str(), t.to.as_str(), t.terminal), ("default", "requested", false));
        assert_eq!(e.state_of(&d, BOB, session).as_deref(), Some("requested"));

        let t = e.advance(&d, BOB, session, BOB, &Confirm::schema_digest()).unwrap();
        assert!(t.terminal);
        assert!(e.state_of(&d, BOB, session).is_none());
        assert_eq!(e.active(), 0);
    }

    #[test]
    fn test_acceptance_iff_edge_exists() {
        let d = two_step();
        let digests = [
            Request::schema_digest(),
            Confirm::schema_digest(),
            Cancel::schema_digest(),
        ];
        for state in ["default", "requested"] {
            for digest in &digests {
                let e = engine();
                let session = Uuid::new_v4();
                if state == "requested" {
                    e.advance(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();
                }
                let accepted = e.check(&d, BOB, session, BOB, digest).is_ok();
                assert_eq!(accepted, d.edge_from(state, digest).is_some(), "{state} / {digest}");
            }
        }
    }

    #[test]
    fn test_check_does_not_mutate() {
        let d = two_step();
        let e = engine();
        let session = Uuid::new_v4();
        e.check(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();
        assert!(e.state_of(&d, BOB, session).is_none());
    }

    #[test]
    fn test_sessions_are_independent() {
        let d = two_step();
        let e = engine();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        e.advance(&d, BOB, s1, ALICE, &Request::schema_digest()).unwrap();
        assert!(e.check(&d, BOB, s2, BOB, &Confirm::schema_digest()).is_err());
        assert!(e.check(&d, BOB, s1, BOB, &Confirm::schema_digest()).is_ok());
    }

    #[test]
    fn test_prune_expired() {
        let d = two_step();
        let e = DialogueEngine::new(Duration::from_secs(60));
        let session = Uuid::new_v4();
        e.advance(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();

        let now = agora_wire::unix_now();
        assert_eq!(e.prune_expired(now), 0);
        assert_eq!(e.prune_expired(now + 61), 1);
        assert!(e.state_of(&d, BOB, session).is_none());
    }

    #[test]
    fn test_strict_roles() {
        let d = DialogueBuilder::new("order", "1.0", "default")
            .state("requested")
            .terminal("done")
            .edge(Edge::of::<Request>("default", "requested").role(Role::Initiator))
            .edge(Edge::of::<Confirm>("requested", "done").role(Role::Responder))
            .build()
            .unwrap();
        let e = engine().with_strict_roles(true);
        let session = Uuid::new_v4();

        e.advance(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();
        let err = e
            .advance(&d, BOB, session, ALICE, &Confirm::schema_digest())
            .unwrap_err();
        assert!(matches!(err, DialogueError::RoleMismatch { expected: Role::Responder, .. }));
        e.advance(&d, BOB, session, BOB, &Confirm::schema_digest()).unwrap();
    }

    #[test]
    fn test_roles_ignored_when_not_strict() {
        let d = DialogueBuilder::new("order", "1.0", "default")
            .state("requested")
            .terminal("done")
            .edge(Edge::of::<Request>("default", "requested").role(Role::Initiator))
            .edge(Edge::of::<Confirm>("requested", "done").role(Role::Responder))
            .build()
            .unwrap();
        let e = engine();
        let session = Uuid::new_v4();
        e.advance(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();
        e.advance(&d, BOB, session, ALICE, &Confirm::schema_digest()).unwrap();
    }

    #[test]
    fn test_instances_survive_restart_through_store() {
        let d = two_step();
        let store = Arc::new(MemoryStore::new());
        let session = Uuid::new_v4();
        {
            let e = engine().with_store(store.clone());
            e.advance(&d, BOB, session, ALICE, &Request::schema_digest()).unwrap();
        }
        let key = format!("dialogue:{}:{}:{}", d.protocol_digest(), BOB, session);
        assert!(store.get(&key).unwrap().is_some());

        let e = engine().with_store(store.clone());
        assert_eq!(e.state_of(&d, BOB, session).as_deref(), Some("requested"));
        e.advance(&d, BOB, session, BOB, &Confirm::schema_digest()).unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_builder_rejects_undeclared_state() {
        let err = DialogueBuilder::new("x", "1", "default")
            .terminal("done")
            .transition::<Request>("default", "nowhere")
            .build()
            .unwrap_err();
        assert_eq!(err, DialogueError::UndeclaredState("nowhere".into()));
    }

    #[test]
    fn test_builder_rejects_duplicate_schema() {
        let err = DialogueBuilder::new("x", "1", "default")
            .state("a")
            .terminal("done")
            .transition::<Request>("default", "a")
            .transition::<Request>("default", "done")
            .transition::<Confirm>("a", "done")
            .build()
            .unwrap_err();
        assert!(matches!(err, DialogueError::DuplicateSchema { .. }));
    }

    #[test]
    fn test_builder_rejects_unreachable_state() {
        let err = DialogueBuilder::new("x", "1", "default")
            .state("island")
            .terminal("done")
            .transition::<Request>("default", "done")
            .build()
            .unwrap_err();
        assert_eq!(err, DialogueError::Unreachable("island".into()));
    }

    #[test]
    fn test_builder_requires_terminal() {
        let err = DialogueBuilder::new("x", "1", "default")
            .state("a")
            .transition::<Request>("default", "a")
            .build()
            .unwrap_err();
        assert_eq!(err, DialogueError::NoTerminal);
    }

    #[test]
    fn test_builder_rejects_edges_out_of_terminal() {
        let err = DialogueBuilder::new("x", "1", "default")
            .terminal("done")
            .transition::<Request>("default", "done")
            .transition::<Cancel>("done", "default")
            .build()
            .unwrap_err();
        assert_eq!(err, DialogueError::TerminalHasEdges("done".into()));
    }

    #[test]
    fn test_digest_ignores_name_and_edge_order() {
        let a = two_step();
        let b = DialogueBuilder::new("renamed", "2.0", "default")
            .terminal("done")
            .state("requested")
            .transition::<Confirm>("requested", "done")
            .transition::<Request>("default", "requested")
            .build()
            .unwrap();
        assert_eq!(a.protocol_digest(), b.protocol_digest());
        assert!(a.protocol_digest().starts_with(PROTOCOL_DIGEST_PREFIX));

        let c = DialogueBuilder::new("order", "1.0", "default")
            .state("requested")
            .terminal("done")
            .transition::<Request>("default", "requested")
            .transition::<Cancel>("requested", "done")
            .build()
            .unwrap();
        assert_ne!(a.protocol_digest(), c.protocol_digest());
    }

    #[test]
    fn test_manifest_lists_graph() {
        let m = two_step().manifest();
        assert_eq!(m["name"], "order");
        assert_eq!(m["edges"].as_array().unwrap().len(), 2);
        assert_eq!(m["terminal_states"][0], "done");
        assert!(m["edges"][0]["model"].as_str().is_some());
    }
}
