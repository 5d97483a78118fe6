//! Persistence for Agora agents.
//!
//! Provides a SQLite implementation of [`agora_types::storage::KeyValueStore`],
//! used to keep dialogue instances and agent state across restarts.

pub mod migration;
pub mod store;

pub use store::SqliteStore;
