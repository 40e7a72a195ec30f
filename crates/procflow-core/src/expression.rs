//! Guard expression evaluation for transitions.
//!
//! A guard is a disjunction of conjunctions (`ConditionGroups`): the guard
//! holds when at least one group has every atomic expression true. The
//! default evaluator interprets atoms as JEXL, with every instance variable
//! bound at the top level of the evaluation context.
//!
//! **Security note:** Variables are always passed as context objects, NEVER
//! interpolated into expression strings.

use procflow_types::process::{ConditionGroups, Variables};
use serde_json::{Map, Value, json};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// Evaluator trait
// ---------------------------------------------------------------------------

/// Pluggable guard evaluator.
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate `groups` against `variables` (OR of ANDs, short-circuiting).
    ///
    /// An empty group list, or an empty group, is `false`. Expressions the
    /// language cannot evaluate raise `EngineError::Configuration`.
    ///
    /// With [`JexlEvaluator`] a guard that reads a variable absent from
    /// `variables` is such an error, not `false`. The engine propagates it
    /// and commits nothing, so `start` or `complete_task` fails and the
    /// instance is left as it was. Definitions that branch on optional data
    /// should set a default in a flow handler or an earlier task output.
    fn evaluate(&self, groups: &ConditionGroups, variables: &Variables)
    -> Result<bool, EngineError>;

    /// Syntax-check a single atomic expression at definition load time.
    fn validate(&self, expression: &str) -> Result<(), EngineError>;
}

/// Short-circuiting OR-of-ANDs over `groups`, delegating atoms to `atom`.
///
/// Stops at the first fully-true group, and inside a group at the first
/// false atom.
pub fn evaluate_groups<F>(groups: &ConditionGroups, mut atom: F) -> Result<bool, EngineError>
where
    F: FnMut(&str) -> Result<bool, EngineError>,
{
    for group in groups.groups() {
        if group.is_empty() {
            continue;
        }
        let mut all_true = true;
        for expression in group {
            if !atom(expression)? {
                all_true = false;
                break;
            }
        }
        if all_true {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// JexlEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with the standard transforms pre-registered.
///
/// Supports expressions such as `amount > 1000`,
/// `department|lower == 'finance'`, or `tags|length > 0`.
pub struct JexlEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl JexlEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().cloned().unwrap_or(Value::Null);
                let needle = args.get(1).cloned().unwrap_or(Value::Null);
                let found = match (&subject, &needle) {
                    (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
                    (Value::Array(items), n) => items.contains(n),
                    (Value::Object(map), Value::String(key)) => map.contains_key(key),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Build the evaluation context: one top-level key per variable.
    ///
    /// Integers are widened to floats so that `count == 3` matches a
    /// variable stored as the integer 3.
    pub fn context(variables: &Variables) -> Value {
        let map: Map<String, Value> = variables
            .iter()
            .map(|(k, v)| (k.clone(), normalize_numbers(v)))
            .collect();
        Value::Object(map)
    }

    /// Evaluate one atom against a prepared context object.
    pub fn evaluate_atom(&self, expression: &str, context: &Value) -> Result<bool, EngineError> {
        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| {
                EngineError::Configuration(format!(
                    "failed to evaluate expression '{expression}': {e}"
                ))
            })?;
        Ok(truthy(&result))
    }
}

impl Default for JexlEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEvaluator for JexlEvaluator {
    fn evaluate(
        &self,
        groups: &ConditionGroups,
        variables: &Variables,
    ) -> Result<bool, EngineError> {
        if groups.is_empty() {
            return Ok(false);
        }
        let context = Self::context(variables);
        evaluate_groups(groups, |expression| self.evaluate_atom(expression, &context))
    }

    fn validate(&self, expression: &str) -> Result<(), EngineError> {
        if expression.trim().is_empty() {
            return Err(EngineError::Configuration(
                "guard expression must not be empty".to_string(),
            ));
        }
        // Evaluating against an empty context surfaces syntax errors; any
        // other failure depends on runtime variables and is not a load error.
        match self.evaluator.eval_in_context(expression, json!({})) {
            Err(err @ jexl_eval::error::EvaluationError::ParseError(_)) => Err(
                EngineError::Configuration(format!("invalid expression '{expression}': {err}")),
            ),
            _ => Ok(()),
        }
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) if !n.is_f64() => n.as_f64().map(|f| json!(f)).unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
