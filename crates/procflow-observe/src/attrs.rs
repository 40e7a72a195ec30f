//! Span field names shared by the engine and its front ends.
//!
//! The engine declares these fields on its operation spans; front ends use
//! the constants with `Span::record` so the names cannot drift.

/// Id of the process definition an operation works on.
pub const DEFINITION_ID: &str = "procflow.definition_id";

/// Id of the process instance an operation works on.
pub const INSTANCE_ID: &str = "procflow.instance_id";

pub const TASK_ID: &str = "procflow.task_id";

pub const NODE_ID: &str = "procflow.node_id";

/// Final state of an instance after the operation (`active`, `complete`, ...).
pub const INSTANCE_STATE: &str = "procflow.instance_state";
