//! Retry Coordinator
//!
//! Decides the fate of failed tasks from their execution history. Each pass:
//!
//! 1. re-executes every `PendingRetry` propagation task (one new execution
//!    record each); success marks the task `Succeeded`, failure puts it back
//!    to `AwaitingDecision`;
//! 2. decides every retryable `AwaitingDecision` task whose latest execution
//!    has finished.
//!
//! A task is retried while `max_retries > 0` and its failure count since the
//! last success is at most `max_retries`; otherwise it is abandoned. Both
//! decisions are audited once.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEntry, AuditOutcome, AuditSink};
use crate::context::PropagationContext;
use crate::execution::{ExecStatus, ExecutionRecord, RetryState, StoredTask, TaskKind, TaskRef};
use crate::executor::TaskExecutor;
use crate::model::TraceLevel;
use crate::store::{ExecutionStore, StoreResult};

/// Counters of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPassReport {
    /// Propagation tasks re-executed.
    pub retried: usize,
    /// Re-executions that succeeded.
    pub succeeded: usize,
    /// Tasks moved to `PendingRetry`.
    pub scheduled: usize,
    /// Tasks abandoned.
    pub abandoned: usize,
}

impl RetryPassReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Applies the retry rule to stored tasks.
#[derive(Clone)]
pub struct RetryCoordinator {
    store: Arc<dyn ExecutionStore>,
    executor: TaskExecutor,
    audit: Arc<dyn AuditSink>,
    max_retries: i32,
}

impl RetryCoordinator {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        executor: TaskExecutor,
        audit: Arc<dyn AuditSink>,
        max_retries: i32,
    ) -> Self {
        Self {
            store,
            executor,
            audit,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> i32 {
        self.max_retries
    }

    /// Run one pass for the tenant of `ctx`.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn run_pass(&self, ctx: &PropagationContext) -> StoreResult<RetryPassReport> {
        let mut report = RetryPassReport::default();

        for stored in self
            .store
            .tasks_in_state(ctx.tenant_id, RetryState::PendingRetry)
            .await?
        {
            if stored.task.kind != TaskKind::Propagation {
                continue;
            }
            self.retry_propagation(ctx, &stored, &mut report).await?;
        }

        for stored in self
            .store
            .tasks_in_state(ctx.tenant_id, RetryState::AwaitingDecision)
            .await?
        {
            if !stored.is_retryable() {
                continue;
            }
            match self.store.latest_execution(&stored.task).await? {
                Some(latest) if latest.is_finished() => {
                    if latest.status == ExecStatus::Success {
                        self.store
                            .set_retry_state(&stored.task, RetryState::Succeeded)
                            .await?;
                        continue;
                    }
                }
                _ => {
                    debug!(task = %stored.task, "Latest execution still running, deciding later");
                    continue;
                }
            }
            match self.decide(ctx, &stored).await? {
                RetryState::PendingRetry => report.scheduled += 1,
                RetryState::Abandoned => report.abandoned += 1,
                _ => {}
            }
        }

        if !report.is_idle() {
            info!(
                retried = report.retried,
                succeeded = report.succeeded,
                scheduled = report.scheduled,
                abandoned = report.abandoned,
                "Retry pass finished"
            );
        }
        Ok(report)
    }

    async fn retry_propagation(
        &self,
        ctx: &PropagationContext,
        stored: &StoredTask,
        report: &mut RetryPassReport,
    ) -> StoreResult<()> {
        let task = match stored.propagation_task() {
            Ok(task) => task,
            Err(e) => {
                error!(task = %stored.task, error = %e, "Stored propagation task is unreadable, abandoning");
                self.store
                    .set_retry_state(&stored.task, RetryState::Abandoned)
                    .await?;
                report.abandoned += 1;
                return Ok(());
            }
        };

        report.retried += 1;
        debug!(task = %stored.task, resource = %task.resource(), "Re-executing propagation task");
        let outcome = self.executor.execute_single(ctx, task).await;

        let state = if outcome.is_failure() {
            RetryState::AwaitingDecision
        } else {
            report.succeeded += 1;
            RetryState::Succeeded
        };
        self.store.set_retry_state(&stored.task, state).await
    }

    /// Apply the retry rule to a task whose latest execution failed.
    pub async fn decide(
        &self,
        ctx: &PropagationContext,
        stored: &StoredTask,
    ) -> StoreResult<RetryState> {
        let failures = self.store.failures_since_last_success(&stored.task).await?;

        let (state, outcome, message) =
            if self.max_retries > 0 && i64::from(failures) <= i64::from(self.max_retries) {
                (
                    RetryState::PendingRetry,
                    AuditOutcome::WillRetry,
                    format!(
                        "Task {} will be retried [{}/{}]",
                        stored.task, failures, self.max_retries
                    ),
                )
            } else {
                warn!(task = %stored.task, failures, "Giving up on task");
                (
                    RetryState::Abandoned,
                    AuditOutcome::GivingUp,
                    format!(
                        "Task {} failed {} time(s), giving up",
                        stored.task, failures
                    ),
                )
            };

        self.store.set_retry_state(&stored.task, state).await?;
        self.audit
            .record(
                AuditEntry::new(ctx, AuditCategory::Retry, "retry", outcome)
                    .with_task(stored.task)
                    .with_message(message),
            )
            .await;
        Ok(state)
    }

    /// Record one delivery attempt of a notification task.
    ///
    /// The owner re-sends tasks listed by
    /// [`pending_notifications`](Self::pending_notifications); this only
    /// keeps the history the retry rule reads.
    #[instrument(skip(self, ctx, payload, result))]
    pub async fn record_notification_attempt(
        &self,
        ctx: &PropagationContext,
        id: Uuid,
        trace_level: TraceLevel,
        payload: serde_json::Value,
        result: Result<(), String>,
    ) -> StoreResult<()> {
        let task = TaskRef::notification(id);
        let record = ExecutionRecord::start(task, ctx.tenant_id, &self.executor.config().executor_name);
        self.store.start(&record).await?;

        let failed = result.is_err();
        let (status, message) = match result {
            Ok(()) => (ExecStatus::Success, None),
            Err(message) => (ExecStatus::Failure, Some(message)),
        };
        self.store.finish(record.id, status, message).await?;

        if trace_level.registers(failed) {
            let state = if failed {
                RetryState::AwaitingDecision
            } else {
                RetryState::Succeeded
            };
            self.store
                .save_task(&StoredTask::notification(id, ctx.tenant_id, trace_level, state, payload))
                .await?;
        } else if !failed && self.store.task(&task).await?.is_some() {
            self.store.set_retry_state(&task, RetryState::Succeeded).await?;
        }
        Ok(())
    }

    /// Notification tasks scheduled for another delivery.
    pub async fn pending_notifications(&self, tenant_id: Uuid) -> StoreResult<Vec<StoredTask>> {
        Ok(self
            .store
            .tasks_in_state(tenant_id, RetryState::PendingRetry)
            .await?
            .into_iter()
            .filter(|t| t.task.kind == TaskKind::Notification)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audit::CollectingAuditSink;
    use crate::executor::ExecutorConfig;
    use crate::resolver::StaticWriters;
    use crate::resource::ResourceCatalog;
    use crate::store::InMemoryExecutionStore;

    fn coordinator(
        max_retries: i32,
    ) -> (RetryCoordinator, Arc<InMemoryExecutionStore>, Arc<CollectingAuditSink>) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let audit = Arc::new(CollectingAuditSink::new());
        let executor = TaskExecutor::new(
            Arc::new(ResourceCatalog::new()),
            Arc::new(StaticWriters::new()),
            store.clone(),
            audit.clone(),
            ExecutorConfig::default(),
        );
        (
            RetryCoordinator::new(store.clone(), executor, audit.clone(), max_retries),
            store,
            audit,
        )
    }

    #[tokio::test]
    async fn test_notification_retried_then_abandoned() {
        let (coordinator, store, audit) = coordinator(2);
        let ctx = PropagationContext::system(Uuid::new_v4());
        let id = Uuid::new_v4();
        let payload = serde_json::json!({"recipient": "jdoe@example.com"});

        for expected in [RetryState::PendingRetry, RetryState::PendingRetry, RetryState::Abandoned] {
            coordinator
                .record_notification_attempt(&ctx, id, TraceLevel::Failures, payload.clone(), Err("smtp down".into()))
                .await
                .unwrap();
            coordinator.run_pass(&ctx).await.unwrap();
            let stored = store.task(&TaskRef::notification(id)).await.unwrap().unwrap();
            assert_eq!(stored.retry_state, expected);
        }

        assert_eq!(audit.with_outcome(AuditOutcome::WillRetry).len(), 2);
        assert_eq!(audit.with_outcome(AuditOutcome::GivingUp).len(), 1);

        // Abandoned tasks are not decided again.
        coordinator.run_pass(&ctx).await.unwrap();
        assert_eq!(audit.with_outcome(AuditOutcome::GivingUp).len(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_retries_abandons_immediately() {
        let (coordinator, store, audit) = coordinator(0);
        let ctx = PropagationContext::system(Uuid::new_v4());
        let id = Uuid::new_v4();

        coordinator
            .record_notification_attempt(&ctx, id, TraceLevel::All, serde_json::Value::Null, Err("boom".into()))
            .await
            .unwrap();
        let report = coordinator.run_pass(&ctx).await.unwrap();

        assert_eq!(report.abandoned, 1);
        assert_eq!(report.scheduled, 0);
        let stored = store.task(&TaskRef::notification(id)).await.unwrap().unwrap();
        assert_eq!(stored.retry_state, RetryState::Abandoned);
        assert_eq!(audit.with_outcome(AuditOutcome::GivingUp).len(), 1);
    }

    #[tokio::test]
    async fn test_pending_notifications_and_success() {
        let (coordinator, store, _audit) = coordinator(3);
        let ctx = PropagationContext::system(Uuid::new_v4());
        let id = Uuid::new_v4();

        coordinator
            .record_notification_attempt(&ctx, id, TraceLevel::Failures, serde_json::Value::Null, Err("boom".into()))
            .await
            .unwrap();
        coordinator.run_pass(&ctx).await.unwrap();
        let pending = coordinator.pending_notifications(ctx.tenant_id).await.unwrap();
        assert_eq!(pending.len(), 1);

        coordinator
            .record_notification_attempt(&ctx, id, TraceLevel::Failures, serde_json::Value::Null, Ok(()))
            .await
            .unwrap();
        let stored = store.task(&TaskRef::notification(id)).await.unwrap().unwrap();
        assert_eq!(stored.retry_state, RetryState::Succeeded);
        assert!(coordinator.pending_notifications(ctx.tenant_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_untraced_failures_are_not_kept() {
        let (coordinator, store, _audit) = coordinator(3);
        let ctx = PropagationContext::system(Uuid::new_v4());

        coordinator
            .record_notification_attempt(&ctx, Uuid::new_v4(), TraceLevel::None, serde_json::Value::Null, Err("boom".into()))
            .await
            .unwrap();

        assert!(store.all_tasks().await.is_empty());
        assert_eq!(coordinator.run_pass(&ctx).await.unwrap(), RetryPassReport::default());
    }
}
