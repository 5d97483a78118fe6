//! Core types and traits for the Agora agent network.
//!
//! This crate defines the data structures shared by the wire codec, the
//! resolver chain, the dispatcher and the agent kernel. It contains no
//! networking and no business logic.

pub mod config;
pub mod error;
pub mod model;
pub mod storage;
