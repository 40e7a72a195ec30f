//! Process engine and repository trait definitions for procflow.
//!
//! This crate defines the persistence "port" (`ProcessRepository`) that the
//! infrastructure layer implements, together with the engine that walks
//! process graphs. It depends only on `procflow-types` -- never on
//! `procflow-infra` or any storage crate.

pub mod cache;
pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expression;
pub mod handler;
pub mod listener;
pub mod lock;
pub mod remind;
pub mod repository;
pub mod scheduler;

#[cfg(test)]
mod testing;
