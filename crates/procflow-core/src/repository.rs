//! Process repository trait definition.
//!
//! Defines the storage interface for definitions, instances, and tasks. The
//! infrastructure layer (procflow-infra) implements this trait.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use procflow_types::error::RepositoryError;
use procflow_types::instance::{ProcessInstance, Task};
use procflow_types::process::ProcessDefinition;
use uuid::Uuid;

/// Everything one traversal step writes, applied atomically.
///
/// `instance.revision` is the revision the step was computed from. The
/// repository rejects the commit with `RepositoryError::Conflict` when the
/// stored revision differs, and stores the instance with revision + 1.
#[derive(Debug, Clone)]
pub struct StepCommit {
    pub instance: ProcessInstance,
    /// Tasks inserted by this step.
    pub created_tasks: Vec<Task>,
    /// Existing tasks whose state changed in this step.
    pub updated_tasks: Vec<Task>,
}

/// Repository trait for process persistence.
///
/// Covers three entity families:
/// - **Definitions:** load and upsert by id.
/// - **Instances:** load, optimistic save, and listing of active instances.
/// - **Tasks:** load and list; written only through `commit_step`.
pub trait ProcessRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Get the current definition with this id.
    fn load_definition(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ProcessDefinition>, RepositoryError>> + Send;

    /// Upsert a definition (insert or replace by id).
    fn save_definition(
        &self,
        def: &ProcessDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    fn load_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ProcessInstance>, RepositoryError>> + Send;

    /// Save an instance without task changes, under the same revision check
    /// as `commit_step`. Returns the new revision.
    fn save_instance(
        &self,
        instance: &ProcessInstance,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// All instances in the `Active` state.
    fn list_active_instances(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ProcessInstance>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    fn load_task(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Task>, RepositoryError>> + Send;

    /// Tasks of an instance, in creation order.
    fn list_tasks(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Write an instance with its task inserts and updates: all or nothing.
    /// Returns the new revision.
    fn commit_step(
        &self,
        commit: &StepCommit,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
