//! Process instance and task types.
//!
//! An instance is one running (or finished) occurrence of a definition. It
//! owns the variable map, the set of nodes where tokens are parked, and the
//! lifecycle state. Tasks are the pending work items attached to task nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::process::Variables;
use crate::remind::RemindParam;

// ---------------------------------------------------------------------------
// Instance state
// ---------------------------------------------------------------------------

/// Lifecycle state of a process instance.
///
/// `Active` is the only non-terminal state; nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Active,
    Complete,
    Timeout,
    Termination,
}

impl InstanceState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceState::Active)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Active => write!(f, "active"),
            InstanceState::Complete => write!(f, "complete"),
            InstanceState::Timeout => write!(f, "timeout"),
            InstanceState::Termination => write!(f, "termination"),
        }
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(InstanceState::Active),
            "complete" => Ok(InstanceState::Complete),
            "timeout" => Ok(InstanceState::Timeout),
            "termination" => Ok(InstanceState::Termination),
            other => Err(format!("invalid instance state: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Process instance
// ---------------------------------------------------------------------------

/// Records gateways that could not route. The instance stays `Active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Nodes where tokens are parked without a route.
    pub node_ids: Vec<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A running or finished occurrence of a process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    /// UUIDv7 assigned at start.
    pub id: Uuid,
    pub definition_id: String,
    pub definition_version: u32,
    /// Nodes where tokens are waiting: open task nodes, partial joins, failed gateways.
    #[serde(default)]
    pub current_nodes: BTreeSet<String>,
    #[serde(default)]
    pub variables: Variables,
    pub state: InstanceState,
    /// Arrival counts at joins that have not fired yet.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub join_arrivals: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remind: Option<RemindParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of committed writes; used for optimistic concurrency.
    #[serde(default)]
    pub revision: u64,
}

impl ProcessInstance {
    /// A fresh `Active` instance with no parked tokens.
    pub fn new(
        definition_id: impl Into<String>,
        definition_version: u32,
        variables: Variables,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            definition_id: definition_id.into(),
            definition_version,
            current_nodes: BTreeSet::new(),
            variables,
            state: InstanceState::Active,
            join_arrivals: BTreeMap::new(),
            failure: None,
            remind: None,
            deadline: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    /// Whether a routing failure is recorded on the instance.
    pub fn is_flagged(&self) -> bool {
        self.failure.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Completed,
    Terminated,
}

impl TaskState {
    pub fn is_open(&self) -> bool {
        matches!(self, TaskState::Created)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => write!(f, "created"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Pending work attached to a task node of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub node_id: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub state: TaskState,
    /// Output variables supplied at completion.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: Variables,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        instance_id: Uuid,
        node_id: impl Into<String>,
        assignees: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            instance_id,
            node_id: node_id.into(),
            assignees,
            state: TaskState::Created,
            output: Variables::new(),
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }
}
