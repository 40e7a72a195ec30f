use thiserror::Error;

/// Errors from repository operations (used by the trait definitions in procflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    /// Optimistic concurrency check failed or a unique key was reused.
    #[error("conflict: {0}")]
    Conflict(String),
}
