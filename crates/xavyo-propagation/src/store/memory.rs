//! In-memory execution store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionStore, StoreError, StoreResult};
use crate::execution::{ExecStatus, ExecutionRecord, RetryState, StoredTask, TaskRef};

/// Execution store kept in process memory.
///
/// Used by tests and single-node deployments without a database.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<Vec<ExecutionRecord>>,
    tasks: RwLock<HashMap<TaskRef, StoredTask>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, in start order.
    pub async fn all_executions(&self) -> Vec<ExecutionRecord> {
        self.executions.read().await.clone()
    }

    pub async fn all_tasks(&self) -> Vec<StoredTask> {
        self.tasks.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn start(&self, record: &ExecutionRecord) -> StoreResult<()> {
        self.executions.write().await.push(record.clone());
        Ok(())
    }

    async fn finish(
        &self,
        id: Uuid,
        status: ExecStatus,
        message: Option<String>,
    ) -> StoreResult<ExecutionRecord> {
        if status == ExecStatus::Created {
            return Err(StoreError::InvalidState(
                "an execution cannot finish as created".to_string(),
            ));
        }
        let mut executions = self.executions.write().await;
        let record = executions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::ExecutionNotFound { id })?;
        if record.is_finished() {
            return Err(StoreError::AlreadyFinished { id });
        }
        record.status = status;
        record.message = message;
        record.ended_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn executions(&self, task: &TaskRef) -> StoreResult<Vec<ExecutionRecord>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|r| r.task == *task)
            .cloned()
            .collect())
    }

    async fn save_task(&self, task: &StoredTask) -> StoreResult<()> {
        self.tasks.write().await.insert(task.task, task.clone());
        Ok(())
    }

    async fn task(&self, task: &TaskRef) -> StoreResult<Option<StoredTask>> {
        Ok(self.tasks.read().await.get(task).cloned())
    }

    async fn tasks_in_state(
        &self,
        tenant_id: Uuid,
        state: RetryState,
    ) -> StoreResult<Vec<StoredTask>> {
        let mut tasks: Vec<StoredTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.retry_state == state)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.updated_at);
        Ok(tasks)
    }

    async fn set_retry_state(&self, task: &TaskRef, state: RetryState) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let stored = tasks
            .get_mut(task)
            .ok_or(StoreError::TaskNotFound { task: *task })?;
        stored.retry_state = state;
        stored.updated_at = Utc::now();
        Ok(())
    }
}
