//! In-memory repository double shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::Mutex;

use procflow_types::error::RepositoryError;
use procflow_types::instance::{ProcessInstance, Task};
use procflow_types::process::ProcessDefinition;
use uuid::Uuid;

use crate::repository::{ProcessRepository, StepCommit};

/// Stores everything in mutex-guarded maps and counts commits.
#[derive(Default)]
pub(crate) struct MockRepo {
    pub definitions: Mutex<HashMap<String, ProcessDefinition>>,
    pub instances: Mutex<HashMap<Uuid, ProcessInstance>>,
    pub tasks: Mutex<Vec<Task>>,
    pub commits: Mutex<usize>,
}

impl ProcessRepository for MockRepo {
    async fn load_definition(&self, id: &str) -> Result<Option<ProcessDefinition>, RepositoryError> {
        Ok(self.definitions.lock().unwrap().get(id).cloned())
    }

    async fn save_definition(&self, def: &ProcessDefinition) -> Result<(), RepositoryError> {
        self.definitions
            .lock()
            .unwrap()
            .insert(def.id.clone(), def.clone());
        Ok(())
    }

    async fn load_instance(&self, id: &Uuid) -> Result<Option<ProcessInstance>, RepositoryError> {
        Ok(self.instances.lock().unwrap().get(id).cloned())
    }

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<u64, RepositoryError> {
        let mut stored = instance.clone();
        stored.revision += 1;
        self.instances.lock().unwrap().insert(stored.id, stored.clone());
        Ok(stored.revision)
    }

    async fn list_active_instances(&self) -> Result<Vec<ProcessInstance>, RepositoryError> {
        Ok(self
            .instances
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.is_active())
            .cloned()
            .collect())
    }

    async fn load_task(&self, id: &Uuid) -> Result<Option<Task>, RepositoryError> {
        Ok(self.tasks.lock().unwrap().iter().find(|t| t.id == *id).cloned())
    }

    async fn list_tasks(&self, instance_id: &Uuid) -> Result<Vec<Task>, RepositoryError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.instance_id == *instance_id)
            .cloned()
            .collect())
    }

    async fn commit_step(&self, commit: &StepCommit) -> Result<u64, RepositoryError> {
        *self.commits.lock().unwrap() += 1;
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.extend(commit.created_tasks.iter().cloned());
            for updated in &commit.updated_tasks {
                if let Some(t) = tasks.iter_mut().find(|t| t.id == updated.id) {
                    *t = updated.clone();
                }
            }
        }
        self.save_instance(&commit.instance).await
    }
}
