//! In-memory process repository.
//!
//! Implements `ProcessRepository` from `procflow-core` on `DashMap`s. Reads
//! clone out of the maps so no shard guard outlives the call. Writes that
//! touch several entities (`save_instance`, `commit_step`) go through a
//! single write gate so a step is applied all-or-nothing, and every instance
//! write is checked against the stored revision.

use std::sync::Mutex;

use dashmap::DashMap;
use procflow_core::repository::{ProcessRepository, StepCommit};
use procflow_types::error::RepositoryError;
use procflow_types::instance::{ProcessInstance, Task};
use procflow_types::process::ProcessDefinition;
use uuid::Uuid;

/// Process storage that lives as long as the value.
#[derive(Default)]
pub struct MemoryProcessRepository {
    definitions: DashMap<String, ProcessDefinition>,
    instances: DashMap<Uuid, ProcessInstance>,
    tasks: DashMap<Uuid, Task>,
    /// Task ids per instance, in creation order.
    task_order: DashMap<Uuid, Vec<Uuid>>,
    write_gate: Mutex<()>,
}

impl MemoryProcessRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Fail with `Conflict` unless `instance.revision` matches what is stored.
    fn check_revision(&self, instance: &ProcessInstance) -> Result<(), RepositoryError> {
        let stored = self.instances.get(&instance.id).map(|i| i.revision);
        match stored {
            None if instance.revision == 0 => Ok(()),
            None => Err(RepositoryError::Conflict(format!(
                "instance {} expected at revision {} but is not stored",
                instance.id, instance.revision
            ))),
            Some(current) if current == instance.revision => Ok(()),
            Some(current) => Err(RepositoryError::Conflict(format!(
                "instance {} is at revision {current}, write was based on {}",
                instance.id, instance.revision
            ))),
        }
    }

    fn store_instance(&self, instance: &ProcessInstance) -> u64 {
        let mut stored = instance.clone();
        stored.revision = instance.revision + 1;
        let revision = stored.revision;
        self.instances.insert(stored.id, stored);
        revision
    }
}

impl std::fmt::Debug for MemoryProcessRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProcessRepository")
            .field("definitions", &self.definitions.len())
            .field("instances", &self.instances.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl ProcessRepository for MemoryProcessRepository {
    async fn load_definition(&self, id: &str) -> Result<Option<ProcessDefinition>, RepositoryError> {
        Ok(self.definitions.get(id).map(|d| d.clone()))
    }

    async fn save_definition(&self, def: &ProcessDefinition) -> Result<(), RepositoryError> {
        self.definitions.insert(def.id.clone(), def.clone());
        Ok(())
    }

    async fn load_instance(&self, id: &Uuid) -> Result<Option<ProcessInstance>, RepositoryError> {
        Ok(self.instances.get(id).map(|i| i.clone()))
    }

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<u64, RepositoryError> {
        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());
        self.check_revision(instance)?;
        Ok(self.store_instance(instance))
    }

    async fn list_active_instances(&self) -> Result<Vec<ProcessInstance>, RepositoryError> {
        let mut active: Vec<ProcessInstance> = self
            .instances
            .iter()
            .filter(|entry| entry.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by_key(|i| (i.created_at, i.id));
        Ok(active)
    }

    async fn load_task(&self, id: &Uuid) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.get(id).map(|t| t.clone()))
    }

    async fn list_tasks(&self, instance_id: &Uuid) -> Result<Vec<Task>, RepositoryError> {
        let ids = self
            .task_order
            .get(instance_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect())
    }

    async fn commit_step(&self, commit: &StepCommit) -> Result<u64, RepositoryError> {
        let _gate = self.write_gate.lock().unwrap_or_else(|e| e.into_inner());
        let instance_id = commit.instance.id;
        self.check_revision(&commit.instance)?;

        // Validate everything before the first write.
        for task in &commit.created_tasks {
            if task.instance_id != instance_id {
                return Err(RepositoryError::Query(format!(
                    "task {} belongs to instance {}, not {instance_id}",
                    task.id, task.instance_id
                )));
            }
            if self.tasks.contains_key(&task.id) {
                return Err(RepositoryError::Conflict(format!("task {} already exists", task.id)));
            }
        }
        for task in &commit.updated_tasks {
            if !self.tasks.contains_key(&task.id) {
                return Err(RepositoryError::NotFound);
            }
        }

        for task in &commit.created_tasks {
            self.tasks.insert(task.id, task.clone());
            self.task_order.entry(instance_id).or_default().push(task.id);
        }
        for task in &commit.updated_tasks {
            self.tasks.insert(task.id, task.clone());
        }
        let revision = self.store_instance(&commit.instance);

        tracing::trace!(
            instance_id = %instance_id,
            revision,
            created = commit.created_tasks.len(),
            updated = commit.updated_tasks.len(),
            "step stored"
        );
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use procflow_types::instance::TaskState;
    use procflow_types::process::Variables;

    fn instance() -> ProcessInstance {
        ProcessInstance::new("p", 1, Variables::new(), Utc::now())
    }

    fn commit(instance: &ProcessInstance, created: Vec<Task>, updated: Vec<Task>) -> StepCommit {
        StepCommit {
            instance: instance.clone(),
            created_tasks: created,
            updated_tasks: updated,
        }
    }

    #[tokio::test]
    async fn test_commit_step_inserts_instance_and_tasks() {
        let repo = MemoryProcessRepository::new();
        let inst = instance();
        let first = Task::new(inst.id, "a".to_string(), vec![], Utc::now());
        let second = Task::new(inst.id, "b".to_string(), vec![], Utc::now());

        let revision = repo
            .commit_step(&commit(&inst, vec![first.clone(), second.clone()], vec![]))
            .await
            .unwrap();
        assert_eq!(revision, 1);

        let stored = repo.load_instance(&inst.id).await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        let tasks = repo.list_tasks(&inst.id).await.unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
    }

    #[tokio::test]
    async fn test_stale_revision_is_conflict() {
        let repo = MemoryProcessRepository::new();
        let inst = instance();
        repo.save_instance(&inst).await.unwrap();

        // Still based on revision 0.
        let err = repo.save_instance(&inst).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let fresh = repo.load_instance(&inst.id).await.unwrap().unwrap();
        assert_eq!(repo.save_instance(&fresh).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let repo = MemoryProcessRepository::new();
        let inst = instance();
        let orphan = Task::new(inst.id, "a".to_string(), vec![], Utc::now());
        let created = Task::new(inst.id, "b".to_string(), vec![], Utc::now());

        let err = repo
            .commit_step(&commit(&inst, vec![created.clone()], vec![orphan]))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
        assert!(repo.load_instance(&inst.id).await.unwrap().is_none());
        assert!(repo.load_task(&created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_updated_task_replaces_stored_copy() {
        let repo = MemoryProcessRepository::new();
        let inst = instance();
        let mut task = Task::new(inst.id, "a".to_string(), vec![], Utc::now());
        repo.commit_step(&commit(&inst, vec![task.clone()], vec![]))
            .await
            .unwrap();

        let stored = repo.load_instance(&inst.id).await.unwrap().unwrap();
        task.state = TaskState::Completed;
        repo.commit_step(&commit(&stored, vec![], vec![task.clone()]))
            .await
            .unwrap();

        let reloaded = repo.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, TaskState::Completed);
        assert_eq!(repo.list_tasks(&inst.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_active_skips_terminal_instances() {
        let repo = MemoryProcessRepository::new();
        let active = instance();
        let mut done = instance();
        done.state = procflow_types::instance::InstanceState::Complete;
        repo.save_instance(&active).await.unwrap();
        repo.save_instance(&done).await.unwrap();

        let listed = repo.list_active_instances().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);
        assert_eq!(repo.instance_count(), 2);
    }
}
