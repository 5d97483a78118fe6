//! Agora agent runtime.
//!
//! - [`Protocol`]: models, handlers and reply rules under one digest
//! - [`Dialogue`]: state machine constraining message order per session
//! - [`Dispatcher`]: the outbound and inbound message pipeline
//! - [`Mailbox`]: store-and-forward relay for agents without an endpoint

pub mod context;
pub mod dialogue;
pub mod dispatcher;
pub mod protocol;
pub mod relay;
pub mod replay;
pub mod retry;
pub mod session;

pub use context::Context;
pub use dialogue::{Dialogue, DialogueBuilder, DialogueEngine, DialogueError, Edge, Role, Transition};
pub use dispatcher::{
    DeliveryStatus, DispatchOptions, Dispatcher, DispatcherBuilder, DropReason, LocalRouter, MsgStatus,
    ReceiveOutcome, LOCAL_ENDPOINT,
};
pub use protocol::{HandlerEntry, HandlerFuture, Protocol};
pub use relay::{HttpMailbox, InMemoryMailbox, Mailbox, RelayError};
pub use retry::{retry_async, RetryConfig, RetryOutcome};
