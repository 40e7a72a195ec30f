//! Engine configuration types.
//!
//! `EngineConfig` represents `engine.toml` in the data directory. Every field
//! has a default, so an empty or missing file yields a working engine.

use serde::{Deserialize, Serialize};

/// Tunables for the process engine and the reminder scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum node visits in one traversal step before it is aborted.
    #[serde(default = "default_max_steps_per_traversal")]
    pub max_steps_per_traversal: u32,

    /// Seconds between reminder scheduler ticks.
    #[serde(default = "default_reminder_interval_secs")]
    pub reminder_interval_secs: u64,

    /// How far back a tick looks for cadence occurrences, in seconds.
    #[serde(default = "default_reminder_tolerance_secs")]
    pub reminder_tolerance_secs: u64,

    /// Timeout applied to instances whose definition sets none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,

    /// Keep validated definitions in the engine cache.
    #[serde(default = "default_cache_definitions")]
    pub cache_definitions: bool,
}

fn default_max_steps_per_traversal() -> u32 {
    1_000
}

fn default_reminder_interval_secs() -> u64 {
    60
}

fn default_reminder_tolerance_secs() -> u64 {
    60
}

fn default_cache_definitions() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_traversal: default_max_steps_per_traversal(),
            reminder_interval_secs: default_reminder_interval_secs(),
            reminder_tolerance_secs: default_reminder_tolerance_secs(),
            default_timeout_secs: None,
            cache_definitions: default_cache_definitions(),
        }
    }
}
