//! Process definition types.
//!
//! A `ProcessDefinition` is an immutable graph of `Node`s connected by
//! `Transition`s. Definitions are authored as YAML (or JSON) and validated
//! by `procflow-core` before any instance is started from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::remind::RemindParam;

/// Runtime variable map of a process instance.
///
/// A `BTreeMap` keeps serialized instances and expression contexts stable.
pub type Variables = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Process Definition
// ---------------------------------------------------------------------------

/// Immutable process graph template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Stable identifier used by callers to start instances.
    pub id: String,
    /// Monotonic version number, recorded on every instance.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Nodes in declaration order.
    pub nodes: Vec<Node>,
    /// Instance-level reminder cadence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remind: Option<RemindParam>,
    /// Seconds after start at which an active instance times out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_version() -> u32 {
    1
}

impl ProcessDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The first start node, if any.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| matches!(n.kind, NodeKind::Start))
    }

    /// Number of transitions across the whole graph that target `id`.
    pub fn incoming_count(&self, id: &str) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.transitions.iter())
            .filter(|t| t.target == id)
            .count()
    }

    /// Iterate over every guard expression in the definition.
    pub fn guard_expressions(&self) -> impl Iterator<Item = (&Node, &str)> {
        self.nodes.iter().flat_map(|node| {
            node.transitions
                .iter()
                .filter_map(|t| t.condition.as_ref())
                .flat_map(|c| c.expressions())
                .map(move |expr| (node, expr))
        })
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// A node in the process graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within its definition.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kind-specific payload, tagged by `kind`.
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Registry id of a generic flow handler run whenever the node is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Outgoing transitions in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,
}

impl Node {
    /// Display label: the name when present, else the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Node kind with its kind-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point of the process. Exactly one per definition.
    Start,
    /// Creates pending work and waits for its external completion.
    Task {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        assignees: Vec<String>,
        /// Registry id of the create-task handler; the default handler when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_handler: Option<String>,
        /// Reminder cadence while the node has open tasks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remind: Option<RemindParam>,
    },
    /// Exclusive gateway: the first satisfied guard wins.
    Condition,
    /// Parallel join: waits for `expected` arrivals (default: incoming edge count).
    Join {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<u32>,
    },
    /// Terminal node of a branch.
    End,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Task { .. } => "task",
            NodeKind::Condition => "condition",
            NodeKind::Join { .. } => "join",
            NodeKind::End => "end",
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions and guards
// ---------------------------------------------------------------------------

/// A directed edge to `target`, optionally guarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub target: String,
    /// Absent means unconditional (the default edge at a gateway).
    #[serde(default, alias = "when", skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionGroups>,
}

impl Transition {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: None,
        }
    }

    pub fn guarded(target: impl Into<String>, condition: ConditionGroups) -> Self {
        Self {
            target: target.into(),
            condition: Some(condition),
        }
    }
}

/// Disjunction of conjunctions of atomic expressions.
///
/// `[[a, b], [c]]` reads as `(a && b) || c`. In definition files a bare
/// string is shorthand for a single one-atom group, and a bare string in
/// group position is a one-atom group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConditionSpec")]
pub struct ConditionGroups(pub Vec<Vec<String>>);

impl ConditionGroups {
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        Self(groups)
    }

    /// A guard made of one expression.
    pub fn single(expression: impl Into<String>) -> Self {
        Self(vec![vec![expression.into()]])
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.0
    }

    /// Every atomic expression, in order.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flatten().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionSpec {
    Single(String),
    Groups(Vec<GroupSpec>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupSpec {
    Single(String),
    All(Vec<String>),
}

impl From<ConditionSpec> for ConditionGroups {
    fn from(spec: ConditionSpec) -> Self {
        match spec {
            ConditionSpec::Single(expr) => ConditionGroups::single(expr),
            ConditionSpec::Groups(groups) => ConditionGroups(
                groups
                    .into_iter()
                    .map(|g| match g {
                        GroupSpec::Single(expr) => vec![expr],
                        GroupSpec::All(all) => all,
                    })
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
