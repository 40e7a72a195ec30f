//! Engine error taxonomy.
//!
//! `EngineError` is what every public engine operation returns. Module-level
//! errors (`DefinitionError`, `RemindError`) fold into its `Configuration`
//! variant; handler and listener failures carry their own types so callers
//! implementing those traits never depend on the full taxonomy.

use procflow_types::error::RepositoryError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the process engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed definition: dangling transition, missing start or end,
    /// unparseable expression, unknown handler. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A gateway had no satisfied guard and no default edge. The instance
    /// stays active and flagged; fix the variables and retry.
    #[error("routing error: instance {instance_id} has no route out of node '{node_id}'")]
    Routing { instance_id: Uuid, node_id: String },

    /// Operation on a terminal instance or a closed task.
    #[error("state error: {0}")]
    State(String),

    /// A registered handler failed; nothing from the step was committed.
    #[error("handler failed at node '{node_id}': {message}")]
    Handler { node_id: String, message: String },

    /// A listener failed; the remaining listeners were not invoked.
    #[error("listener failed: {0}")]
    Listener(#[from] ListenerError),

    /// Runtime failure that is neither routing nor state related.
    #[error("execution error: {0}")]
    Execution(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// Whether retrying the same call can succeed without changing the definition.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Routing { .. } | EngineError::Repository(RepositoryError::Conflict(_))
        )
    }
}

/// Failure reported by a flow or create-task handler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by a lifecycle listener.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
