//! Process definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and `ProcessDefinition`, validates the graph
//! (one start, reachable end, no dangling transitions), and discovers
//! definition files on disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use procflow_types::process::{NodeKind, ProcessDefinition};
use thiserror::Error;

use crate::error::EngineError;
use crate::expression::ConditionEvaluator;
use crate::remind::ReminderRule;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or validating a definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A transition targets a node id that does not exist.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// No end node can be reached from the start node.
    #[error("unreachable end: {0}")]
    UnreachableEnd(String),

    /// A guard expression does not parse.
    #[error("expression error: {0}")]
    ExpressionError(String),
}

impl From<DefinitionError> for EngineError {
    fn from(e: DefinitionError) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON) string into a structurally valid `ProcessDefinition`.
///
/// Runs `validate_definition` after deserialization. Guard expressions and
/// handler references are checked later, when the definition is deployed to
/// an engine that knows its evaluator and registry.
pub fn parse_definition_yaml(yaml: &str) -> Result<ProcessDefinition, DefinitionError> {
    let def: ProcessDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `ProcessDefinition` to a YAML string.
pub fn serialize_definition_yaml(def: &ProcessDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `ProcessDefinition`.
///
/// Checks:
/// - Id is non-empty and at least one node exists
/// - Node ids are unique
/// - Exactly one start node, with one unguarded outgoing transition and no incoming ones
/// - At least one end node, and end nodes have no outgoing transitions
/// - Every other node has at least one outgoing transition
/// - Every transition targets an existing node
/// - Guards have at least one group
/// - Join `expected` and `timeout_secs` are > 0 when set
/// - An end node is reachable from the start node
pub fn validate_definition(def: &ProcessDefinition) -> Result<(), DefinitionError> {
    if def.id.trim().is_empty() {
        return Err(DefinitionError::ValidationError(
            "definition id must not be empty".to_string(),
        ));
    }
    if def.nodes.is_empty() {
        return Err(DefinitionError::ValidationError(format!(
            "definition '{}' has no nodes",
            def.id
        )));
    }

    let mut seen_ids = HashSet::new();
    for node in &def.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(DefinitionError::ValidationError(format!(
                "duplicate node id: '{}'",
                node.id
            )));
        }
    }

    let starts: Vec<_> = def
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Start))
        .collect();
    let start = match starts.as_slice() {
        [start] => *start,
        [] => {
            return Err(DefinitionError::ValidationError(format!(
                "definition '{}' has no start node",
                def.id
            )));
        }
        many => {
            return Err(DefinitionError::ValidationError(format!(
                "definition '{}' has {} start nodes, expected exactly one",
                def.id,
                many.len()
            )));
        }
    };
    if start.transitions.len() != 1 || start.transitions[0].condition.is_some() {
        return Err(DefinitionError::ValidationError(format!(
            "start node '{}' must have exactly one unguarded transition",
            start.id
        )));
    }
    if def.incoming_count(&start.id) > 0 {
        return Err(DefinitionError::ValidationError(format!(
            "start node '{}' must not be a transition target",
            start.id
        )));
    }

    if !def.nodes.iter().any(|n| matches!(n.kind, NodeKind::End)) {
        return Err(DefinitionError::ValidationError(format!(
            "definition '{}' has no end node",
            def.id
        )));
    }

    for node in &def.nodes {
        match &node.kind {
            NodeKind::End if !node.transitions.is_empty() => {
                return Err(DefinitionError::ValidationError(format!(
                    "end node '{}' must not have outgoing transitions",
                    node.id
                )));
            }
            NodeKind::End => {}
            _ if node.transitions.is_empty() => {
                return Err(DefinitionError::ValidationError(format!(
                    "{} node '{}' has no outgoing transitions",
                    node.kind.as_str(),
                    node.id
                )));
            }
            NodeKind::Join {
                expected: Some(0), ..
            } => {
                return Err(DefinitionError::ValidationError(format!(
                    "join node '{}' must expect at least one arrival",
                    node.id
                )));
            }
            _ => {}
        }

        for transition in &node.transitions {
            if !seen_ids.contains(transition.target.as_str()) {
                return Err(DefinitionError::UnknownNode(format!(
                    "node '{}' transitions to unknown node '{}'",
                    node.id, transition.target
                )));
            }
            if let Some(condition) = &transition.condition {
                if condition.is_empty() || condition.groups().iter().any(Vec::is_empty) {
                    return Err(DefinitionError::ValidationError(format!(
                        "transition '{}' -> '{}' has an empty condition group",
                        node.id, transition.target
                    )));
                }
            }
        }
    }

    if let Some(t) = def.timeout_secs {
        if t == 0 {
            return Err(DefinitionError::ValidationError(
                "timeout must be > 0".to_string(),
            ));
        }
    }

    check_reachability(def, &start.id)
}

/// Ids of every node reachable from `from`, `from` included.
///
/// Empty when `from` is not a node of `def`.
pub fn reachable_from<'d>(def: &'d ProcessDefinition, from: &str) -> HashSet<&'d str> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: HashMap<&str, NodeIndex> = def
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
        .collect();

    for node in &def.nodes {
        for transition in &node.transitions {
            if let (Some(&src), Some(&dst)) = (
                indices.get(node.id.as_str()),
                indices.get(transition.target.as_str()),
            ) {
                graph.add_edge(src, dst, ());
            }
        }
    }

    let mut reachable = HashSet::new();
    let Some(&start_idx) = indices.get(from) else {
        return reachable;
    };
    let mut dfs = Dfs::new(&graph, start_idx);
    while let Some(idx) = dfs.next(&graph) {
        reachable.insert(graph[idx]);
    }
    reachable
}

/// Verify an end node is reachable from `start_id`.
///
/// Nodes that cannot be reached are logged, not rejected.
fn check_reachability(def: &ProcessDefinition, start_id: &str) -> Result<(), DefinitionError> {
    if def.node(start_id).is_none() {
        return Err(DefinitionError::UnknownNode(start_id.to_string()));
    }
    let reachable = reachable_from(def, start_id);

    let end_reachable = def
        .nodes
        .iter()
        .any(|n| matches!(n.kind, NodeKind::End) && reachable.contains(n.id.as_str()));
    if !end_reachable {
        return Err(DefinitionError::UnreachableEnd(format!(
            "no end node is reachable from start node '{start_id}' in '{}'",
            def.id
        )));
    }

    for node in &def.nodes {
        if !reachable.contains(node.id.as_str()) {
            tracing::warn!(
                definition = %def.id,
                node_id = %node.id,
                "node is unreachable from the start node"
            );
        }
    }

    Ok(())
}

/// Syntax-check every guard expression with `evaluator`.
pub fn validate_guards(
    def: &ProcessDefinition,
    evaluator: &dyn ConditionEvaluator,
) -> Result<(), DefinitionError> {
    for (node, expression) in def.guard_expressions() {
        evaluator.validate(expression).map_err(|e| {
            DefinitionError::ExpressionError(format!("node '{}': {e}", node.id))
        })?;
    }
    Ok(())
}

/// Check that every reminder cadence on the definition and its task nodes compiles.
pub fn validate_reminders(def: &ProcessDefinition) -> Result<(), DefinitionError> {
    if let Some(remind) = &def.remind {
        ReminderRule::compile(remind).map_err(|e| {
            DefinitionError::ValidationError(format!("definition reminder: {e}"))
        })?;
    }
    for node in &def.nodes {
        if let NodeKind::Task {
            remind: Some(remind),
            ..
        } = &node.kind
        {
            ReminderRule::compile(remind).map_err(|e| {
                DefinitionError::ValidationError(format!("node '{}' reminder: {e}", node.id))
            })?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a process definition from a YAML file.
pub fn load_definition_file(path: &Path) -> Result<ProcessDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_definition_yaml(&content)
}

/// Save a process definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_definition_file(path: &Path, def: &ProcessDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_definition_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all definition YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Files that fail to parse
/// are logged and skipped.
pub fn discover_definitions(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, ProcessDefinition)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, ProcessDefinition)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_definition_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "skipping invalid process definition file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
