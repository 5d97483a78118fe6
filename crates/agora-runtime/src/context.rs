//! Per-message handler context.

use crate::dispatcher::{Dispatcher, MsgStatus};
use agora_types::error::AgoraResult;
use agora_types::model::Model;
use agora_types::storage::KeyValueStore;
use std::sync::Arc;
use uuid::Uuid;

/// What a handler knows about the message it is handling, plus a way to
/// answer within the same session.
#[derive(Clone)]
pub struct Context {
    dispatcher: Dispatcher,
    sender: String,
    session: Uuid,
    protocol_digest: Option<String>,
    schema_digest: String,
}

impl Context {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        sender: String,
        session: Uuid,
        protocol_digest: Option<String>,
        schema_digest: String,
    ) -> Self {
        Self {
            dispatcher,
            sender,
            session,
            protocol_digest,
            schema_digest,
        }
    }

    /// This agent's address.
    pub fn address(&self) -> &str {
        self.dispatcher.address()
    }

    /// Address of the agent that sent the message.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn protocol_digest(&self) -> Option<&str> {
        self.protocol_digest.as_deref()
    }

    pub fn schema_digest(&self) -> &str {
        &self.schema_digest
    }

    /// The agent's key-value store.
    pub fn storage(&self) -> Arc<dyn KeyValueStore> {
        self.dispatcher.storage()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Send `message` to `destination` within the current session.
    pub async fn send<M: Model>(&self, destination: &str, message: &M) -> AgoraResult<MsgStatus> {
        self.dispatcher
            .send_in_session(destination, message, Some(self.session))
            .await
    }

    /// Answer the sender within the current session.
    pub async fn reply<M: Model>(&self, message: &M) -> AgoraResult<MsgStatus> {
        self.send(&self.sender, message).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("address", &self.address())
            .field("sender", &self.sender)
            .field("session", &self.session)
            .field("protocol_digest", &self.protocol_digest)
            .finish()
    }
}
