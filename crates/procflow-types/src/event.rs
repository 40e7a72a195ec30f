//! Lifecycle event payloads delivered to registered listeners.
//!
//! Payloads are built lazily by the engine: when no listener of a given
//! payload type is registered, the value is never constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instance::Task;

/// Task lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Created { task: Task },
    Completed { task: Task },
    /// Force-closed by termination or timeout of the instance.
    Terminated { task: Task },
}

impl TaskEvent {
    pub fn task(&self) -> &Task {
        match self {
            TaskEvent::Created { task }
            | TaskEvent::Completed { task }
            | TaskEvent::Terminated { task } => task,
        }
    }
}

/// Instance lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstanceEvent {
    Started {
        instance_id: Uuid,
        definition_id: String,
    },
    Completed {
        instance_id: Uuid,
        definition_id: String,
        at: DateTime<Utc>,
    },
    TimedOut {
        instance_id: Uuid,
        definition_id: String,
        at: DateTime<Utc>,
    },
    Terminated {
        instance_id: Uuid,
        definition_id: String,
        at: DateTime<Utc>,
    },
    /// A gateway had no satisfied guard and no default edge.
    RoutingFailed {
        instance_id: Uuid,
        definition_id: String,
        node_id: String,
    },
}

impl InstanceEvent {
    pub fn instance_id(&self) -> Uuid {
        match self {
            InstanceEvent::Started { instance_id, .. }
            | InstanceEvent::Completed { instance_id, .. }
            | InstanceEvent::TimedOut { instance_id, .. }
            | InstanceEvent::Terminated { instance_id, .. }
            | InstanceEvent::RoutingFailed { instance_id, .. } => *instance_id,
        }
    }
}

/// A reminder that came due for an active instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderEvent {
    pub instance_id: Uuid,
    pub definition_id: String,
    /// Task node the reminder belongs to; `None` for instance-level reminders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Open tasks the reminder is about.
    #[serde(default)]
    pub task_ids: Vec<Uuid>,
    /// The cadence occurrence that triggered the reminder.
    pub occurrence: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}
