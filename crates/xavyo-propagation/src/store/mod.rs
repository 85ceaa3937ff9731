//! Persistence of execution records and stored tasks.
//!
//! Records are append-only apart from the single `finish` write. The retry
//! coordinator only trusts records whose `ended_at` is set.

mod memory;
mod postgres;

pub use memory::InMemoryExecutionStore;
pub use postgres::PgExecutionStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::execution::{ExecStatus, ExecutionRecord, RetryState, StoredTask, TaskRef};

/// Errors raised by execution stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Execution already has an end time.
    #[error("execution {id} is already finished")]
    AlreadyFinished { id: Uuid },

    #[error("execution {id} not found")]
    ExecutionNotFound { id: Uuid },

    #[error("stored task {task} not found")]
    TaskNotFound { task: TaskRef },

    #[error("Invalid stored value: {0}")]
    InvalidState(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for execution records and retry bookkeeping.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a freshly started record.
    async fn start(&self, record: &ExecutionRecord) -> StoreResult<()>;

    /// Finish a record. Fails if it was already finished.
    async fn finish(
        &self,
        id: Uuid,
        status: ExecStatus,
        message: Option<String>,
    ) -> StoreResult<ExecutionRecord>;

    /// All records of a task, oldest first.
    async fn executions(&self, task: &TaskRef) -> StoreResult<Vec<ExecutionRecord>>;

    /// Finished failures of a task since its last success.
    async fn failures_since_last_success(&self, task: &TaskRef) -> StoreResult<u32> {
        let records = self.executions(task).await?;
        let count = records
            .iter()
            .rev()
            .filter(|r| r.is_finished())
            .take_while(|r| r.status != ExecStatus::Success)
            .filter(|r| r.status == ExecStatus::Failure)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Most recent record of a task.
    async fn latest_execution(&self, task: &TaskRef) -> StoreResult<Option<ExecutionRecord>> {
        Ok(self.executions(task).await?.pop())
    }

    /// Insert or replace a stored task.
    async fn save_task(&self, task: &StoredTask) -> StoreResult<()>;

    async fn task(&self, task: &TaskRef) -> StoreResult<Option<StoredTask>>;

    /// Stored tasks of a tenant in the given state, least recently updated first.
    async fn tasks_in_state(&self, tenant_id: Uuid, state: RetryState)
        -> StoreResult<Vec<StoredTask>>;

    async fn set_retry_state(&self, task: &TaskRef, state: RetryState) -> StoreResult<()>;
}
