//! Shared domain types for procflow.
//!
//! This crate contains the data model of the process engine: definitions,
//! nodes and transitions, running instances, tasks, reminder parameters,
//! lifecycle events, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod instance;
pub mod process;
pub mod remind;
