//! Task Executor
//!
//! Runs propagation tasks against the resource writers.
//!
//! ## Execution policy
//!
//! - Priority tasks run one at a time, in order. The first failure stops the
//!   priority phase; the remaining priority tasks become `NotAttempted`.
//! - Other tasks go to a bounded worker pool.
//! - [`AsyncPolicy::Auto`] returns once the priority phase settles,
//!   [`AsyncPolicy::ForceSync`] waits for everything and
//!   [`AsyncPolicy::ForceAsync`] waits for nothing.
//!
//! Every task body runs on its own tokio task, so a panicking writer ends up
//! as a `Failure` outcome instead of taking the batch down.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use xavyo_connector::resilience::{single_attempt, RetryExecutor};
use xavyo_connector::types::ResourceOperation;

use crate::audit::{AuditCategory, AuditEntry, AuditOutcome, AuditSink};
use crate::context::PropagationContext;
use crate::error::PropagationError;
use crate::execution::{ExecStatus, ExecutionRecord, RetryState, StoredTask, TaskRef};
use crate::model::AsyncPolicy;
use crate::outcome::{Outcome, OutcomeSet, PropagationReporter};
use crate::resolver::WriterProvider;
use crate::resource::{PropagationPolicy, ResourceCatalog};
use crate::store::ExecutionStore;
use crate::task::PropagationTask;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum non-priority tasks running at once.
    pub concurrency: usize,
    /// Recorded as the executor of every execution record.
    pub executor_name: String,
    /// Whether non-priority tasks are skipped after a priority failure.
    pub skip_non_priority_on_priority_failure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            executor_name: "propagation".to_string(),
            skip_non_priority_on_priority_failure: true,
        }
    }
}

/// Outcomes of one `execute` call.
///
/// Under `Auto` and `ForceAsync` some outcomes may still be pending when the
/// call returns; [`wait_for_all`](Self::wait_for_all) resolves once every task
/// has one.
#[derive(Debug, Clone)]
pub struct PropagationResult {
    reporter: Arc<PropagationReporter>,
    policy: AsyncPolicy,
}

impl PropagationResult {
    /// Outcomes recorded so far, in task order.
    #[must_use]
    pub fn outcomes(&self) -> OutcomeSet {
        self.reporter.statuses()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.reporter.is_complete()
    }

    /// Wait for the background tasks and return the complete outcome set.
    pub async fn wait_for_all(&self) -> OutcomeSet {
        self.reporter.wait_complete().await;
        self.reporter.statuses()
    }

    pub fn reporter(&self) -> &Arc<PropagationReporter> {
        &self.reporter
    }

    pub fn policy(&self) -> AsyncPolicy {
        self.policy
    }
}

struct PriorityFailure {
    resource: String,
    message: String,
}

fn not_attempted_reason(resource: &str) -> String {
    format!("Not attempted because priority resource {resource} failed")
}

struct ExecutorInner {
    catalog: Arc<ResourceCatalog>,
    writers: Arc<dyn WriterProvider>,
    store: Arc<dyn ExecutionStore>,
    audit: Arc<dyn AuditSink>,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
}

/// Dispatches propagation tasks under the priority/async policy.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        writers: Arc<dyn WriterProvider>,
        store: Arc<dyn ExecutionStore>,
        audit: Arc<dyn AuditSink>,
        config: ExecutorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            inner: Arc::new(ExecutorInner {
                catalog,
                writers,
                store,
                audit,
                config,
                permits,
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.inner.store
    }

    /// Execute an ordered batch of tasks.
    ///
    /// A priority failure under `Auto` or `ForceSync` returns a
    /// [`PropagationError`] carrying every outcome of the batch.
    #[instrument(
        skip(self, ctx, tasks),
        fields(correlation_id = %ctx.correlation_id, tasks = tasks.len(), policy = %policy)
    )]
    pub async fn execute(
        &self,
        ctx: &PropagationContext,
        tasks: Vec<PropagationTask>,
        policy: AsyncPolicy,
    ) -> Result<PropagationResult, PropagationError> {
        let tasks: Vec<Arc<PropagationTask>> = tasks.into_iter().map(Arc::new).collect();
        let reporter = Arc::new(PropagationReporter::new(&tasks));
        let (priority, others): (Vec<_>, Vec<_>) =
            tasks.into_iter().partition(|t| t.is_priority());

        info!(
            priority = priority.len(),
            others = others.len(),
            "Executing propagation tasks"
        );

        let result = PropagationResult {
            reporter: reporter.clone(),
            policy,
        };

        match policy {
            AsyncPolicy::ForceAsync => {
                if !priority.is_empty() {
                    let this = self.clone();
                    let ctx = ctx.clone();
                    let reporter = reporter.clone();
                    tokio::spawn(async move {
                        this.run_priority_phase(&ctx, &priority, &reporter).await;
                    });
                }
                self.dispatch(ctx, others, &reporter);
                Ok(result)
            }
            AsyncPolicy::Auto | AsyncPolicy::ForceSync => {
                if let Some(failure) = self.run_priority_phase(ctx, &priority, &reporter).await {
                    if self.inner.config.skip_non_priority_on_priority_failure {
                        reporter.on_priority_failure(&others, &not_attempted_reason(&failure.resource));
                    } else {
                        await_all(self.dispatch(ctx, others, &reporter)).await;
                    }
                    return Err(PropagationError {
                        resource: failure.resource,
                        message: failure.message,
                        outcomes: reporter.statuses(),
                    });
                }

                let handles = self.dispatch(ctx, others, &reporter);
                if policy == AsyncPolicy::ForceSync {
                    await_all(handles).await;
                }
                Ok(result)
            }
        }
    }

    /// Execute one task outside of a batch (used by retry passes).
    pub async fn execute_single(&self, ctx: &PropagationContext, task: PropagationTask) -> Outcome {
        self.run_task(ctx, Arc::new(task)).await
    }

    async fn run_priority_phase(
        &self,
        ctx: &PropagationContext,
        priority: &[Arc<PropagationTask>],
        reporter: &PropagationReporter,
    ) -> Option<PriorityFailure> {
        for (i, task) in priority.iter().enumerate() {
            let outcome = self.run_task(ctx, task.clone()).await;
            if outcome.is_failure() {
                let message = outcome.message.clone().unwrap_or_default();
                reporter.record(outcome);
                warn!(
                    resource = %task.resource(),
                    remaining = priority.len() - i - 1,
                    "Priority resource failed, skipping remaining priority tasks"
                );
                reporter.on_priority_failure(&priority[i + 1..], &not_attempted_reason(task.resource()));
                return Some(PriorityFailure {
                    resource: task.resource().to_string(),
                    message,
                });
            }
            reporter.record(outcome);
        }
        None
    }

    fn dispatch(
        &self,
        ctx: &PropagationContext,
        tasks: Vec<Arc<PropagationTask>>,
        reporter: &Arc<PropagationReporter>,
    ) -> Vec<JoinHandle<()>> {
        tasks
            .into_iter()
            .map(|task| {
                let this = self.clone();
                let ctx = ctx.clone();
                let reporter = reporter.clone();
                tokio::spawn(async move {
                    // The semaphore is never closed.
                    let _permit = this.inner.permits.clone().acquire_owned().await.ok();
                    let outcome = this.run_task(&ctx, task).await;
                    reporter.record(outcome);
                })
            })
            .collect()
    }

    /// Run one task with its execution record, bookkeeping and audit.
    #[instrument(skip(self, ctx, task), fields(task_id = %task.id(), resource = %task.resource()))]
    async fn run_task(&self, ctx: &PropagationContext, task: Arc<PropagationTask>) -> Outcome {
        let task_ref = TaskRef::propagation(task.id());
        let record = ExecutionRecord::start(task_ref, ctx.tenant_id, &self.inner.config.executor_name);
        if let Err(e) = self.inner.store.start(&record).await {
            error!(error = %e, "Failed to record execution start");
        }

        let attempt = {
            let this = self.clone();
            let ctx = ctx.clone();
            let task = task.clone();
            tokio::spawn(async move { this.attempt(&ctx, &task).await })
        };
        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Propagation task aborted");
                Outcome::failure(&task, format!("propagation task aborted: {e}"))
            }
        };

        let failed = outcome.is_failure();
        let status = if failed {
            ExecStatus::Failure
        } else {
            ExecStatus::Success
        };
        if let Err(e) = self
            .inner
            .store
            .finish(record.id, status, outcome.message.clone())
            .await
        {
            error!(error = %e, "Failed to record execution end");
        }

        let trace = self
            .inner
            .catalog
            .get(task.resource())
            .map(|r| r.trace_level(task.operation()))
            .unwrap_or_default();

        if trace.registers(failed) {
            let state = if failed {
                RetryState::AwaitingDecision
            } else {
                RetryState::Succeeded
            };
            match StoredTask::propagation(&task, ctx.tenant_id, trace, state) {
                Ok(stored) => {
                    if let Err(e) = self.inner.store.save_task(&stored).await {
                        error!(error = %e, "Failed to register propagation task");
                    }
                }
                Err(e) => error!(error = %e, "Failed to serialize propagation task"),
            }
        }

        if trace.audits(failed) {
            let mut entry = AuditEntry::new(
                ctx,
                AuditCategory::Propagation,
                task.operation().as_str(),
                if failed {
                    AuditOutcome::Failure
                } else {
                    AuditOutcome::Success
                },
            )
            .with_subject(task.subject().clone())
            .with_resource(task.resource())
            .with_task(task_ref);
            if let Some(message) = &outcome.message {
                entry = entry.with_message(message.clone());
            }
            self.inner.audit.record(entry).await;
        }

        outcome
    }

    /// The write itself: guard, snapshots, in-call retry.
    async fn attempt(&self, ctx: &PropagationContext, task: &PropagationTask) -> Outcome {
        let Some(writer) = self.inner.writers.writer(task.resource()) else {
            return Outcome::failure(
                task,
                format!("no writer configured for resource {}", task.resource()),
            );
        };

        if !task.missing_mandatory().is_empty() {
            return Outcome::failure(
                task,
                format!(
                    "Not attempted because there are mandatory attributes without value(s): [{}]",
                    task.missing_mandatory().join(", ")
                ),
            );
        }

        let resource = self.inner.catalog.get(task.resource());
        let fetch = resource.is_some_and(|r| r.fetch_around_provisioning) && writer.supports_fetch();

        let mut before = None;
        if fetch {
            if let Some(key) = task.lookup_key() {
                match writer.fetch(task.object_class(), key).await {
                    Ok(Some(object)) => before = Some(object),
                    Ok(None) if task.operation() == ResourceOperation::Delete => {
                        debug!(key = %key, "Remote object not found, ignoring delete");
                        return Outcome::success(task)
                            .with_message(format!("{key} not found, ignoring delete"));
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Could not read remote object before write"),
                }
            }
        }

        let retry: RetryExecutor = resource
            .and_then(|r| r.propagation_policy.as_ref())
            .map(PropagationPolicy::retry_executor)
            .unwrap_or_else(single_attempt);
        let request = task.write_request();

        debug!(
            correlation_id = %ctx.correlation_id,
            operation = %task.operation(),
            connector = %writer.connector_type(),
            writer = writer.display_name(),
            "Writing to resource"
        );
        let result = retry.execute(|| writer.write(&request)).await;

        let mut after = None;
        if fetch {
            if let Some(key) = task.connector_object_key_hint().or(task.lookup_key()) {
                match writer.fetch(task.object_class(), key).await {
                    Ok(object) => after = object,
                    Err(e) => warn!(error = %e, "Could not read remote object after write"),
                }
            }
        }

        match result {
            Ok(uid) => {
                debug!(uid = ?uid, "Resource write succeeded");
                Outcome::success(task).with_snapshots(before, after)
            }
            Err(e) => {
                warn!(error_code = e.error_code(), error = %e, "Resource write failed");
                Outcome::failure(task, e.failure_reason()).with_snapshots(before, after)
            }
        }
    }
}

async fn await_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Propagation worker aborted");
        }
    }
}
