//! Per-step execution state.
//!
//! `Execution` is the view handed to handlers while a node is processed: the
//! instance id, the definition, the node, and a mutable borrow of the
//! instance variables. `StepState` accumulates everything one traversal
//! step changes so it can be committed in a single repository write.

use chrono::{DateTime, Utc};
use procflow_types::instance::{ExecutionFailure, ProcessInstance, Task};
use procflow_types::process::{Node, NodeKind, ProcessDefinition, Variables};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::StepCommit;

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Handler-facing view of the node being processed.
///
/// Not persisted; it borrows from the instance owned by the current step.
pub struct Execution<'a> {
    pub instance_id: Uuid,
    pub definition: &'a ProcessDefinition,
    pub node: &'a Node,
    pub variables: &'a mut Variables,
    pub now: DateTime<Utc>,
}

impl<'a> Execution<'a> {
    pub fn definition_id(&self) -> &str {
        &self.definition.id
    }

    pub fn variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Assignees declared on the node; empty for non-task nodes.
    pub fn assignees(&self) -> &[String] {
        match &self.node.kind {
            NodeKind::Task { assignees, .. } => assignees,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Step state
// ---------------------------------------------------------------------------

/// Unit of work on the traversal worklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Run the node's handler and kind-specific logic.
    Enter(String),
    /// Route out of a node along its transitions.
    Leave(String),
}

/// Changes accumulated by one traversal step.
pub(crate) struct StepState {
    pub instance: ProcessInstance,
    pub created_tasks: Vec<Task>,
    pub updated_tasks: Vec<Task>,
    /// Nodes that could not route during this step.
    pub routing_failures: Vec<String>,
    pub now: DateTime<Utc>,
}

impl StepState {
    pub fn new(instance: ProcessInstance, now: DateTime<Utc>) -> Self {
        Self {
            instance,
            created_tasks: Vec::new(),
            updated_tasks: Vec::new(),
            routing_failures: Vec::new(),
            now,
        }
    }

    /// Park a token at `node_id` and record the routing failure on the instance.
    pub fn flag_routing_failure(&mut self, node_id: &str) {
        self.instance.current_nodes.insert(node_id.to_string());
        self.routing_failures.push(node_id.to_string());

        let message = format!("no satisfied transition out of node '{node_id}'");
        match &mut self.instance.failure {
            Some(failure) => {
                if !failure.node_ids.iter().any(|n| n == node_id) {
                    failure.node_ids.push(node_id.to_string());
                }
                failure.message = message;
                failure.at = self.now;
            }
            None => {
                self.instance.failure = Some(ExecutionFailure {
                    node_ids: vec![node_id.to_string()],
                    message,
                    at: self.now,
                });
            }
        }
    }

    pub fn into_commit(mut self) -> StepCommit {
        self.instance.updated_at = self.now;
        StepCommit {
            instance: self.instance,
            created_tasks: self.created_tasks,
            updated_tasks: self.updated_tasks,
        }
    }
}
