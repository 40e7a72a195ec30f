//! Infrastructure layer for procflow.
//!
//! Contains implementations of the traits defined in `procflow-core`: the
//! in-memory process repository and the engine configuration loader.

pub mod config;
pub mod memory;

#[cfg(test)]
mod scenarios;
