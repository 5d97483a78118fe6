//! Agora kernel: assembles agents from configuration and runs them.
//!
//! - [`Agent`]: identity, dispatcher, `/submit` listener, interval tasks,
//!   relay polling and dialogue sweeping under one shutdown signal
//! - [`Bureau`]: several agents in one process with in-memory delivery
//! - [`config::load_config`]: TOML configuration with logged fallbacks
//! - [`logging::init_logging`]: `tracing` subscriber setup

pub mod agent;
pub mod bureau;
pub mod config;
pub mod error;
pub mod logging;

pub use agent::{Agent, Inbox, RunningAgent, INBOX_CAPACITY};
pub use bureau::{Bureau, BureauRouter};
pub use error::{KernelError, KernelResult};
