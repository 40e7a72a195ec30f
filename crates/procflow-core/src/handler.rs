//! Handler registry: pluggable strategies invoked during traversal.
//!
//! Two extension points exist:
//! - `FlowHandler` runs whenever a node that references it is entered, before
//!   the node's kind-specific logic. It may read and mutate instance variables.
//! - `CreateTaskHandler` decides which tasks a task node creates.
//!
//! Handlers are looked up by the string ids declared in definitions. The
//! registry is an explicit value handed to the engine builder.

use std::collections::HashMap;
use std::sync::Arc;

use procflow_types::instance::Task;

use crate::error::{EngineError, HandlerError};
use crate::execution::Execution;

/// Registry id of the create-task handler used when a node names none.
pub const DEFAULT_TASK_HANDLER: &str = "default";

/// Registry id of the built-in handler that creates one task per assignee.
pub const PER_ASSIGNEE_TASK_HANDLER: &str = "per_assignee";

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// Cross-cutting side effect run on node entry.
pub trait FlowHandler: Send + Sync {
    fn handle(&self, execution: &mut Execution<'_>) -> Result<(), HandlerError>;
}

/// Creates the tasks for a task node.
///
/// Returning no tasks lets the token pass straight through the node.
pub trait CreateTaskHandler: Send + Sync {
    fn create_tasks(&self, execution: &Execution<'_>) -> Result<Vec<Task>, HandlerError>;
}

// ---------------------------------------------------------------------------
// Built-in task handlers
// ---------------------------------------------------------------------------

/// One task carrying every assignee of the node.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleTaskHandler;

impl CreateTaskHandler for SingleTaskHandler {
    fn create_tasks(&self, execution: &Execution<'_>) -> Result<Vec<Task>, HandlerError> {
        Ok(vec![Task::new(
            execution.instance_id,
            execution.node.id.clone(),
            execution.assignees().to_vec(),
            execution.now,
        )])
    }
}

/// One task per assignee; the node advances once all of them are completed.
#[derive(Debug, Default, Clone, Copy)]
pub struct PerAssigneeTaskHandler;

impl CreateTaskHandler for PerAssigneeTaskHandler {
    fn create_tasks(&self, execution: &Execution<'_>) -> Result<Vec<Task>, HandlerError> {
        let assignees = execution.assignees();
        if assignees.is_empty() {
            return Err(HandlerError::new(format!(
                "task node '{}' has no assignees",
                execution.node.id
            )));
        }
        Ok(assignees
            .iter()
            .map(|a| {
                Task::new(
                    execution.instance_id,
                    execution.node.id.clone(),
                    vec![a.clone()],
                    execution.now,
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Handlers keyed by the ids that definitions reference.
#[derive(Clone)]
pub struct HandlerRegistry {
    flow: HashMap<String, Arc<dyn FlowHandler>>,
    task: HashMap<String, Arc<dyn CreateTaskHandler>>,
}

impl HandlerRegistry {
    /// A registry holding the built-in task handlers.
    pub fn new() -> Self {
        let mut task: HashMap<String, Arc<dyn CreateTaskHandler>> = HashMap::new();
        task.insert(DEFAULT_TASK_HANDLER.to_string(), Arc::new(SingleTaskHandler));
        task.insert(
            PER_ASSIGNEE_TASK_HANDLER.to_string(),
            Arc::new(PerAssigneeTaskHandler),
        );
        Self {
            flow: HashMap::new(),
            task,
        }
    }

    /// Register a flow handler under `id`, replacing any previous one.
    pub fn with_flow_handler(mut self, id: impl Into<String>, handler: Arc<dyn FlowHandler>) -> Self {
        self.flow.insert(id.into(), handler);
        self
    }

    /// Register a create-task handler under `id`, replacing any previous one.
    pub fn with_task_handler(
        mut self,
        id: impl Into<String>,
        handler: Arc<dyn CreateTaskHandler>,
    ) -> Self {
        self.task.insert(id.into(), handler);
        self
    }

    pub fn has_flow_handler(&self, id: &str) -> bool {
        self.flow.contains_key(id)
    }

    pub fn has_task_handler(&self, id: &str) -> bool {
        self.task.contains_key(id)
    }

    /// Resolve a flow handler; an unknown id is a configuration error.
    pub fn flow_handler(&self, id: &str) -> Result<Arc<dyn FlowHandler>, EngineError> {
        self.flow
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Configuration(format!("unknown flow handler '{id}'")))
    }

    /// Resolve a create-task handler, falling back to the default when `id` is `None`.
    pub fn task_handler(&self, id: Option<&str>) -> Result<Arc<dyn CreateTaskHandler>, EngineError> {
        let id = id.unwrap_or(DEFAULT_TASK_HANDLER);
        self.task
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Configuration(format!("unknown task handler '{id}'")))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut flow: Vec<_> = self.flow.keys().collect();
        let mut task: Vec<_> = self.task.keys().collect();
        flow.sort();
        task.sort();
        f.debug_struct("HandlerRegistry")
            .field("flow", &flow)
            .field("task", &task)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use procflow_types::process::{Node, NodeKind, ProcessDefinition, Variables};
    use serde_json::json;
    use uuid::Uuid;

    struct Stamp;

    impl FlowHandler for Stamp {
        fn handle(&self, execution: &mut Execution<'_>) -> Result<(), HandlerError> {
            let id = execution.node.id.clone();
            execution.set_variable("stamped", json!(id));
            Ok(())
        }
    }

    fn definition(assignees: Vec<String>) -> ProcessDefinition {
        ProcessDefinition {
            id: "p".to_string(),
            version: 1,
            name: None,
            description: None,
            nodes: vec![Node {
                id: "review".to_string(),
                name: None,
                kind: NodeKind::Task {
                    assignees,
                    task_handler: None,
                    remind: None,
                },
                handler: None,
                transitions: vec![],
            }],
            remind: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_builtin_task_handlers_registered() {
        let registry = HandlerRegistry::new();
        assert!(registry.has_task_handler(DEFAULT_TASK_HANDLER));
        assert!(registry.has_task_handler(PER_ASSIGNEE_TASK_HANDLER));
        assert!(registry.task_handler(None).is_ok());
        assert!(matches!(
            registry.task_handler(Some("missing")),
            Err(EngineError::Configuration(_))
        ));
        assert!(registry.flow_handler("missing").is_err());
    }

    #[test]
    fn test_single_and_per_assignee_handlers() {
        let def = definition(vec!["alice".to_string(), "bob".to_string()]);
        let mut vars = Variables::new();
        let exec = Execution {
            instance_id: Uuid::now_v7(),
            definition: &def,
            node: &def.nodes[0],
            variables: &mut vars,
            now: Utc::now(),
        };

        let single = SingleTaskHandler.create_tasks(&exec).unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].assignees, vec!["alice", "bob"]);
        assert_eq!(single[0].node_id, "review");

        let split = PerAssigneeTaskHandler.create_tasks(&exec).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[1].assignees, vec!["bob"]);
    }

    #[test]
    fn test_per_assignee_requires_assignees() {
        let def = definition(vec![]);
        let mut vars = Variables::new();
        let exec = Execution {
            instance_id: Uuid::now_v7(),
            definition: &def,
            node: &def.nodes[0],
            variables: &mut vars,
            now: Utc::now(),
        };
        assert!(PerAssigneeTaskHandler.create_tasks(&exec).is_err());
    }

    #[test]
    fn test_registered_flow_handler_mutates_variables() {
        let registry = HandlerRegistry::new().with_flow_handler("stamp", Arc::new(Stamp));
        assert!(registry.has_flow_handler("stamp"));

        let def = definition(vec![]);
        let mut vars = Variables::new();
        let mut exec = Execution {
            instance_id: Uuid::now_v7(),
            definition: &def,
            node: &def.nodes[0],
            variables: &mut vars,
            now: Utc::now(),
        };
        registry.flow_handler("stamp").unwrap().handle(&mut exec).unwrap();
        assert_eq!(vars.get("stamped"), Some(&json!("review")));
    }
}
