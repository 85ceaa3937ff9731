//! PostgreSQL execution store.
//!
//! Schema lives in `migrations/0001_propagation_executions.sql`. Enum columns
//! are stored as text.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;
use xavyo_connector::types::ParseEnumError;

use super::{ExecutionStore, StoreError, StoreResult};
use crate::execution::{ExecStatus, ExecutionRecord, RetryState, StoredTask, TaskRef};

/// Execution store backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> StoreResult<ExecutionRecord> {
        let kind: String = row.try_get("task_kind")?;
        let status: String = row.try_get("status")?;
        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            task: TaskRef {
                kind: kind.parse().map_err(invalid)?,
                id: row.try_get("task_id")?,
            },
            tenant_id: row.try_get("tenant_id")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            status: status.parse().map_err(invalid)?,
            executor: row.try_get("executor")?,
            message: row.try_get("message")?,
        })
    }

    fn row_to_task(row: &PgRow) -> StoreResult<StoredTask> {
        let kind: String = row.try_get("task_kind")?;
        let trace_level: String = row.try_get("trace_level")?;
        let retry_state: String = row.try_get("retry_state")?;
        Ok(StoredTask {
            task: TaskRef {
                kind: kind.parse().map_err(invalid)?,
                id: row.try_get("task_id")?,
            },
            tenant_id: row.try_get("tenant_id")?,
            trace_level: trace_level.parse().map_err(invalid)?,
            retry_state: retry_state.parse().map_err(invalid)?,
            payload: row.try_get("payload")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn invalid(err: ParseEnumError) -> StoreError {
    StoreError::InvalidState(err.to_string())
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    #[instrument(skip(self, record), fields(execution_id = %record.id, task = %record.task))]
    async fn start(&self, record: &ExecutionRecord) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO propagation_executions (
                id, tenant_id, task_kind, task_id, started_at, ended_at,
                status, executor, message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(record.task.kind.as_str())
        .bind(record.task.id)
        .bind(record.started_at)
        .bind(record.ended_at)
        .bind(record.status.as_str())
        .bind(&record.executor)
        .bind(&record.message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, message))]
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

        let row = sqlx::query(
            r"
            UPDATE propagation_executions
            SET status = $2, message = $3, ended_at = $4
            WHERE id = $1 AND ended_at IS NULL
            RETURNING id, tenant_id, task_kind, task_id, started_at, ended_at,
                      status, executor, message
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&message)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Self::row_to_record(&row);
        }

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM propagation_executions WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Err(StoreError::AlreadyFinished { id }),
            None => Err(StoreError::ExecutionNotFound { id }),
        }
    }

    #[instrument(skip(self))]
    async fn executions(&self, task: &TaskRef) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, tenant_id, task_kind, task_id, started_at, ended_at,
                   status, executor, message
            FROM propagation_executions
            WHERE task_kind = $1 AND task_id = $2
            ORDER BY started_at, id
            ",
        )
        .bind(task.kind.as_str())
        .bind(task.id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn failures_since_last_success(&self, task: &TaskRef) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM propagation_executions
            WHERE task_kind = $1 AND task_id = $2
              AND status = 'failure' AND ended_at IS NOT NULL
              AND started_at > COALESCE(
                  (SELECT MAX(started_at) FROM propagation_executions
                   WHERE task_kind = $1 AND task_id = $2 AND status = 'success'),
                  '-infinity'::timestamptz
              )
            ",
        )
        .bind(task.kind.as_str())
        .bind(task.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    #[instrument(skip(self, task), fields(task = %task.task))]
    async fn save_task(&self, task: &StoredTask) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO propagation_tasks (
                task_kind, task_id, tenant_id, trace_level, retry_state, payload, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (task_kind, task_id) DO UPDATE SET
                trace_level = EXCLUDED.trace_level,
                retry_state = EXCLUDED.retry_state,
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(task.task.kind.as_str())
        .bind(task.task.id)
        .bind(task.tenant_id)
        .bind(task.trace_level.as_str())
        .bind(task.retry_state.as_str())
        .bind(&task.payload)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn task(&self, task: &TaskRef) -> StoreResult<Option<StoredTask>> {
        let row = sqlx::query(
            r"
            SELECT task_kind, task_id, tenant_id, trace_level, retry_state, payload, updated_at
            FROM propagation_tasks
            WHERE task_kind = $1 AND task_id = $2
            ",
        )
        .bind(task.kind.as_str())
        .bind(task.id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn tasks_in_state(
        &self,
        tenant_id: Uuid,
        state: RetryState,
    ) -> StoreResult<Vec<StoredTask>> {
        let rows = sqlx::query(
            r"
            SELECT task_kind, task_id, tenant_id, trace_level, retry_state, payload, updated_at
            FROM propagation_tasks
            WHERE tenant_id = $1 AND retry_state = $2
            ORDER BY updated_at
            ",
        )
        .bind(tenant_id)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn set_retry_state(&self, task: &TaskRef, state: RetryState) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE propagation_tasks
            SET retry_state = $3, updated_at = $4
            WHERE task_kind = $1 AND task_id = $2
            ",
        )
        .bind(task.kind.as_str())
        .bind(task.id)
        .bind(state.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound { task: *task });
        }
        Ok(())
    }
}
