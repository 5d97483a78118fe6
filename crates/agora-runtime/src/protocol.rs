//! Protocols: named bundles of message models, handlers and reply rules.

use crate::context::Context;
use crate::dialogue::{model_name, Dialogue};
use agora_types::error::{AgoraError, AgoraResult};
use agora_types::model::{canonical_json, sha256_hex, Model, PROTOCOL_DIGEST_PREFIX};
use agora_wire::{Envelope, EnvelopeError};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a type-erased handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = AgoraResult<()>> + Send>>;

/// Decodes the envelope payload and produces the handler's future.
pub(crate) type ErasedHandler =
    Arc<dyn Fn(Context, &Envelope) -> Result<HandlerFuture, EnvelopeError> + Send + Sync>;

/// A registered message handler.
#[derive(Clone)]
pub struct HandlerEntry {
    pub(crate) model: &'static str,
    pub(crate) schema_digest: String,
    pub(crate) allow_unverified: bool,
    pub(crate) call: ErasedHandler,
}

impl HandlerEntry {
    pub(crate) fn new<M, F, Fut>(allow_unverified: bool, handler: F) -> Self
    where
        M: Model,
        F: Fn(Context, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<()>> + Send + 'static,
    {
        let call: ErasedHandler = Arc::new(move |ctx: Context, envelope: &Envelope| {
            let message: M = match envelope.decode_payload::<M>()? {
                Some(m) => m,
                // An absent payload decodes as the empty object.
                None => serde_json::from_value(serde_json::json!({}))
                    .map_err(|e| EnvelopeError::MalformedPayload(e.to_string()))?,
            };
            let fut: HandlerFuture = Box::pin(handler(ctx, message));
            Ok(fut)
        });
        Self {
            model: model_name::<M>(),
            schema_digest: M::schema_digest(),
            allow_unverified,
            call,
        }
    }

    pub fn model(&self) -> &str {
        self.model
    }

    pub fn schema_digest(&self) -> &str {
        &self.schema_digest
    }

    pub fn allows_unverified(&self) -> bool {
        self.allow_unverified
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("model", &self.model)
            .field("schema_digest", &self.schema_digest)
            .field("allow_unverified", &self.allow_unverified)
            .finish()
    }
}

/// A named, versioned set of models with their handlers.
///
/// The digest covers the model digests, the declared reply pairs and the
/// attached dialogue graph; it does not cover the name or version, so two
/// structurally identical protocols interoperate.
#[derive(Debug, Clone)]
pub struct Protocol {
    name: String,
    version: String,
    models: BTreeMap<String, String>,
    replies: BTreeMap<String, BTreeSet<String>>,
    handlers: BTreeMap<String, HandlerEntry>,
    dialogue: Option<Arc<Dialogue>>,
}

impl Protocol {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            models: BTreeMap::new(),
            replies: BTreeMap::new(),
            handlers: BTreeMap::new(),
            dialogue: None,
        }
    }

    /// Attach a dialogue. Every schema labelling one of its edges becomes a
    /// model of this protocol.
    pub fn with_dialogue(mut self, dialogue: Dialogue) -> Self {
        for edge in dialogue.edges() {
            self.models
                .entry(edge.schema_digest.clone())
                .or_insert_with(|| edge.model.clone());
        }
        self.dialogue = Some(Arc::new(dialogue));
        self
    }

    /// Declare a model without handling it (e.g. one this side only sends).
    pub fn model<M: Model>(&mut self) -> &mut Self {
        self.models.insert(M::schema_digest(), model_name::<M>().to_string());
        self
    }

    /// Declare that `R` is a valid reply to `M`. Recorded in the manifest
    /// only; replies are not enforced.
    pub fn reply<M: Model, R: Model>(&mut self) -> &mut Self {
        self.model::<M>();
        self.model::<R>();
        self.replies
            .entry(M::schema_digest())
            .or_default()
            .insert(R::schema_digest());
        self
    }

    /// Handle `M`; the envelope must carry a valid signature.
    pub fn on_message<M, F, Fut>(&mut self, handler: F) -> AgoraResult<&mut Self>
    where
        M: Model,
        F: Fn(Context, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<()>> + Send + 'static,
    {
        self.add_handler(HandlerEntry::new::<M, F, Fut>(false, handler))
    }

    /// Handle `M`, also accepting unsigned envelopes.
    pub fn on_unverified_message<M, F, Fut>(&mut self, handler: F) -> AgoraResult<&mut Self>
    where
        M: Model,
        F: Fn(Context, M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgoraResult<()>> + Send + 'static,
    {
        self.add_handler(HandlerEntry::new::<M, F, Fut>(true, handler))
    }

    fn add_handler(&mut self, entry: HandlerEntry) -> AgoraResult<&mut Self> {
        if self.handlers.contains_key(&entry.schema_digest) {
            return Err(AgoraError::Protocol(format!(
                "protocol '{}' already handles {}",
                self.name, entry.model
            )));
        }
        self.models
            .insert(entry.schema_digest.clone(), entry.model.to_string());
        self.handlers.insert(entry.schema_digest.clone(), entry);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dialogue(&self) -> Option<&Arc<Dialogue>> {
        self.dialogue.as_ref()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &HandlerEntry> {
        self.handlers.values()
    }

    pub fn contains_model(&self, schema_digest: &str) -> bool {
        self.models.contains_key(schema_digest)
    }

    pub fn model_digests(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Declared replies to `schema_digest`.
    pub fn replies_to(&self, schema_digest: &str) -> Option<&BTreeSet<String>> {
        self.replies.get(schema_digest)
    }

    pub fn digest(&self) -> String {
        let pairs: Vec<(&String, &String)> = self
            .replies
            .iter()
            .flat_map(|(m, rs)| rs.iter().map(move |r| (m, r)))
            .collect();
        let canonical = serde_json::json!({
            "models": self.models.keys().collect::<Vec<_>>(),
            "replies": pairs,
            "dialogue": self.dialogue.as_ref().map(|d| d.protocol_digest()),
        });
        format!(
            "{PROTOCOL_DIGEST_PREFIX}{}",
            sha256_hex(canonical_json(&canonical).as_bytes())
        )
    }

    /// Self-description advertised to peers.
    pub fn manifest(&self) -> serde_json::Value {
        let models: Vec<_> = self
            .models
            .iter()
            .map(|(digest, name)| serde_json::json!({ "digest": digest, "name": name }))
            .collect();
        let interactions: Vec<_> = self
            .models
            .keys()
            .filter(|d| self.handlers.contains_key(*d) || self.replies.contains_key(*d))
            .map(|d| {
                let replies: Vec<&String> =
                    self.replies.get(d).map(|r| r.iter().collect()).unwrap_or_default();
                serde_json::json!({ "request": d, "responses": replies })
            })
            .collect();
        serde_json::json!({
            "name": self.name,
            "version": self.version,
            "digest": self.digest(),
            "models": models,
            "interactions": interactions,
            "dialogue": self.dialogue.as_ref().map(|d| d.manifest()),
        })
    }
}
