//! Propagation engine entry points.
//!
//! Wires the diff engine, task generator, executor and retry coordinator
//! around the injected capabilities.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::PropagationConfig;
use crate::context::PropagationContext;
use crate::diff::{DiffEngine, IdentitySnapshot, ResourceAssignmentDiff};
use crate::error::{EngineError, EngineResult};
use crate::executor::{PropagationResult, TaskExecutor};
use crate::generator::TaskGenerator;
use crate::model::{AsyncPolicy, SubjectRef, SubjectType};
use crate::resolver::{AttributeResolver, NoDerivedAttributes, SubjectDirectory, WriterProvider};
use crate::resource::ResourceCatalog;
use crate::retry::RetryCoordinator;
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use crate::worker::RetryWorker;

/// Builder for [`PropagationEngine`].
pub struct PropagationEngineBuilder {
    catalog: ResourceCatalog,
    writers: Arc<dyn WriterProvider>,
    directory: Arc<dyn SubjectDirectory>,
    store: Option<Arc<dyn ExecutionStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    resolver: Option<Arc<dyn AttributeResolver>>,
    config: PropagationConfig,
}

impl PropagationEngineBuilder {
    /// Execution store. Defaults to [`InMemoryExecutionStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Audit sink. Defaults to [`TracingAuditSink`].
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn AttributeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn config(mut self, config: PropagationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> PropagationEngine {
        let catalog = Arc::new(self.catalog);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryExecutionStore::new()));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(NoDerivedAttributes));

        let executor = TaskExecutor::new(
            catalog.clone(),
            self.writers.clone(),
            store.clone(),
            audit.clone(),
            self.config.executor_config(),
        );
        let coordinator = RetryCoordinator::new(
            store.clone(),
            executor.clone(),
            audit,
            self.config.max_retries,
        );

        PropagationEngine {
            diff: DiffEngine::new(catalog.clone()),
            generator: TaskGenerator::new(catalog.clone(), resolver),
            catalog,
            writers: self.writers,
            directory: self.directory,
            store,
            executor,
            coordinator,
            config: self.config,
        }
    }
}

/// Propagates identity changes to external resources.
pub struct PropagationEngine {
    catalog: Arc<ResourceCatalog>,
    writers: Arc<dyn WriterProvider>,
    directory: Arc<dyn SubjectDirectory>,
    store: Arc<dyn ExecutionStore>,
    diff: DiffEngine,
    generator: TaskGenerator,
    executor: TaskExecutor,
    coordinator: RetryCoordinator,
    config: PropagationConfig,
}

impl PropagationEngine {
    pub fn builder(
        catalog: ResourceCatalog,
        writers: Arc<dyn WriterProvider>,
        directory: Arc<dyn SubjectDirectory>,
    ) -> PropagationEngineBuilder {
        PropagationEngineBuilder {
            catalog,
            writers,
            directory,
            store: None,
            audit: None,
            resolver: None,
            config: PropagationConfig::default(),
        }
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn diff_engine(&self) -> &DiffEngine {
        &self.diff
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn retry_coordinator(&self) -> &RetryCoordinator {
        &self.coordinator
    }

    /// A retry worker driving this engine's coordinator.
    #[must_use]
    pub fn retry_worker(&self) -> RetryWorker {
        RetryWorker::new(self.coordinator.clone(), self.config.worker_config())
    }

    /// Propagate precomputed diffs of one subject.
    ///
    /// Every diff must concern the subject itself or, for a group, one of its
    /// dependents. Configuration problems (unknown resource, missing writer,
    /// duplicate diff, unrelated subject) fail before any write. A priority failure under `Auto` or `ForceSync` is returned as
    /// [`EngineError::Propagation`] with the outcomes of every task.
    #[instrument(
        skip(self, ctx, diffs, excluded),
        fields(correlation_id = %ctx.correlation_id, diffs = diffs.len())
    )]
    pub async fn propagate(
        &self,
        ctx: &PropagationContext,
        subject_type: SubjectType,
        subject_key: &str,
        diffs: Vec<ResourceAssignmentDiff>,
        excluded: &[String],
        policy: Option<AsyncPolicy>,
    ) -> EngineResult<PropagationResult> {
        let subject = SubjectRef::new(subject_type, subject_key);
        let diffs: Vec<ResourceAssignmentDiff> = diffs
            .into_iter()
            .filter(|d| !excluded.contains(&d.resource))
            .collect();
        self.validate(&diffs)?;
        self.check_subjects(ctx, &subject, &diffs).await?;

        let mut snapshots = HashMap::new();
        for diff in &diffs {
            if !snapshots.contains_key(&diff.subject) {
                if let Some(snapshot) = self.directory.snapshot(ctx, &diff.subject).await? {
                    snapshots.insert(diff.subject.clone(), snapshot);
                }
            }
        }

        info!(subject = %subject, "Propagating identity changes");
        self.run(ctx, &diffs, &snapshots, policy).await
    }

    /// Remove a deleted subject from every resource it reaches.
    ///
    /// Deleting a group also removes its members from resources they only
    /// reached through it.
    #[instrument(skip(self, ctx, excluded), fields(correlation_id = %ctx.correlation_id))]
    pub async fn propagate_delete(
        &self,
        ctx: &PropagationContext,
        subject_type: SubjectType,
        subject_key: &str,
        excluded: &[String],
    ) -> EngineResult<PropagationResult> {
        let subject = SubjectRef::new(subject_type, subject_key);
        let snapshot = self
            .directory
            .snapshot(ctx, &subject)
            .await?
            .ok_or_else(|| EngineError::SubjectNotFound {
                subject: subject.clone(),
            })?;

        let dependents = if subject_type == SubjectType::Group {
            self.directory.dependents(ctx, &subject).await?
        } else {
            Vec::new()
        };

        let diffs = self.diff.diff_delete(&snapshot, &dependents, excluded)?;
        self.validate(&diffs)?;

        let mut snapshots = HashMap::new();
        for dependent in &dependents {
            if let Some(member) = self.directory.snapshot(ctx, &dependent.subject).await? {
                snapshots.insert(dependent.subject.clone(), member);
            }
        }
        snapshots.insert(subject.clone(), snapshot);

        info!(
            subject = %subject,
            dependents = dependents.len(),
            "Propagating identity deletion"
        );
        self.run(ctx, &diffs, &snapshots, None).await
    }

    /// Diff two states of an identity and propagate the result.
    #[instrument(skip(self, ctx, old, new, excluded), fields(subject = %new.subject))]
    pub async fn propagate_change(
        &self,
        ctx: &PropagationContext,
        old: &IdentitySnapshot,
        new: &IdentitySnapshot,
        excluded: &[String],
        policy: Option<AsyncPolicy>,
    ) -> EngineResult<PropagationResult> {
        let diffs = self.diff.diff(old, new, excluded)?;
        self.validate(&diffs)?;

        let snapshots = HashMap::from([(new.subject.clone(), new.clone())]);
        self.run(ctx, &diffs, &snapshots, policy).await
    }

    fn validate(&self, diffs: &[ResourceAssignmentDiff]) -> EngineResult<()> {
        let mut seen = HashSet::with_capacity(diffs.len());
        for diff in diffs {
            self.catalog.resource(&diff.resource)?;
            if self.writers.writer(&diff.resource).is_none() {
                return Err(EngineError::MissingWriter {
                    resource: diff.resource.clone(),
                });
            }
            // One outcome per (subject, resource, operation).
            if !seen.insert((&diff.subject, diff.resource.as_str(), diff.operation)) {
                return Err(EngineError::DuplicateDiff {
                    subject: diff.subject.clone(),
                    resource: diff.resource.clone(),
                    operation: diff.operation,
                });
            }
        }
        Ok(())
    }

    async fn check_subjects(
        &self,
        ctx: &PropagationContext,
        subject: &SubjectRef,
        diffs: &[ResourceAssignmentDiff],
    ) -> EngineResult<()> {
        if diffs.iter().all(|d| &d.subject == subject) {
            return Ok(());
        }

        let dependents: HashSet<SubjectRef> = if subject.subject_type == SubjectType::Group {
            self.directory
                .dependents(ctx, subject)
                .await?
                .into_iter()
                .map(|d| d.subject)
                .collect()
        } else {
            HashSet::new()
        };

        let unrelated = diffs
            .iter()
            .find(|d| &d.subject != subject && !dependents.contains(&d.subject));
        match unrelated {
            Some(diff) => Err(EngineError::UnrelatedSubject {
                subject: subject.clone(),
                found: diff.subject.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn run(
        &self,
        ctx: &PropagationContext,
        diffs: &[ResourceAssignmentDiff],
        snapshots: &HashMap<SubjectRef, IdentitySnapshot>,
        policy: Option<AsyncPolicy>,
    ) -> EngineResult<PropagationResult> {
        let tasks = self.generator.generate(ctx, diffs, snapshots).await?;
        let policy = policy.unwrap_or(self.config.async_policy);
        debug!(tasks = tasks.len(), policy = %policy, "Dispatching propagation tasks");
        Ok(self.executor.execute(ctx, tasks, policy).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;
    use xavyo_connector::error::ConnectorResult;
    use xavyo_connector::operation::{Uid, WriteRequest};
    use xavyo_connector::traits::ResourceWriter;
    use xavyo_connector::types::ConnectorType;

    use crate::error::CollaboratorError;
    use crate::resolver::StaticWriters;
    use crate::resource::ExternalResource;

    struct EmptyDirectory;

    #[derive(Default)]
    struct CountingWriter {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ResourceWriter for CountingWriter {
        fn connector_type(&self) -> ConnectorType {
            ConnectorType::Rest
        }

        fn display_name(&self) -> &str {
            "counting"
        }

        async fn write(&self, _request: &WriteRequest) -> ConnectorResult<Option<Uid>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[async_trait]
    impl SubjectDirectory for EmptyDirectory {
        async fn snapshot(
            &self,
            _ctx: &PropagationContext,
            _subject: &SubjectRef,
        ) -> Result<Option<IdentitySnapshot>, CollaboratorError> {
            Ok(None)
        }
    }

    fn engine() -> PropagationEngine {
        PropagationEngine::builder(
            ResourceCatalog::new().with(ExternalResource::new("ldap", ConnectorType::Ldap, "inetOrgPerson")),
            Arc::new(StaticWriters::new()),
            Arc::new(EmptyDirectory),
        )
        .build()
    }

    fn ctx() -> PropagationContext {
        PropagationContext::new(Uuid::new_v4(), "admin")
    }

    #[tokio::test]
    async fn test_missing_writer_is_configuration_error() {
        let engine = engine();
        let old = IdentitySnapshot::new(SubjectRef::user("u1"));
        let new = old.clone().with_resource("ldap");

        let err = engine
            .propagate_change(&ctx(), &old, &new, &[], None)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, EngineError::MissingWriter { .. }));
    }

    #[tokio::test]
    async fn test_unknown_resource_is_configuration_error() {
        let engine = engine();
        let diffs = vec![ResourceAssignmentDiff::remove(SubjectRef::user("u1"), "crm")];

        let err = engine
            .propagate(&ctx(), SubjectType::User, "u1", diffs, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownResource { ref resource } if resource == "crm"));
    }

    #[tokio::test]
    async fn test_duplicate_diffs_rejected_before_write() {
        let writer = Arc::new(CountingWriter::default());
        let engine = PropagationEngine::builder(
            ResourceCatalog::new().with(ExternalResource::new("crm", ConnectorType::Rest, "contact")),
            Arc::new(StaticWriters::new().with("crm", writer.clone())),
            Arc::new(EmptyDirectory),
        )
        .build();
        let diffs = vec![
            ResourceAssignmentDiff::remove(SubjectRef::user("u1"), "crm"),
            ResourceAssignmentDiff::remove(SubjectRef::user("u1"), "crm"),
        ];

        let err = engine
            .propagate(&ctx(), SubjectType::User, "u1", diffs, &[], Some(AsyncPolicy::ForceSync))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, EngineError::DuplicateDiff { ref resource, .. } if resource == "crm"));
        assert_eq!(writer.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_diff_for_unrelated_subject_rejected() {
        let writer = Arc::new(CountingWriter::default());
        let engine = PropagationEngine::builder(
            ResourceCatalog::new().with(ExternalResource::new("crm", ConnectorType::Rest, "contact")),
            Arc::new(StaticWriters::new().with("crm", writer.clone())),
            Arc::new(EmptyDirectory),
        )
        .build();
        let diffs = vec![ResourceAssignmentDiff::remove(SubjectRef::user("u2"), "crm")];

        let err = engine
            .propagate(&ctx(), SubjectType::User, "u1", diffs, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnrelatedSubject { ref found, .. } if found.key == "u2"));
        assert_eq!(writer.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_of_unknown_subject() {
        let err = engine()
            .propagate_delete(&ctx(), SubjectType::Group, "g1", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SubjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_excluded_diffs_are_dropped() {
        let engine = engine();
        let diffs = vec![ResourceAssignmentDiff::remove(SubjectRef::user("u1"), "ldap")];

        let result = engine
            .propagate(&ctx(), SubjectType::User, "u1", diffs, &["ldap".to_string()], None)
            .await
            .unwrap();
        assert!(result.outcomes().is_empty());
        assert!(result.is_complete());
    }
}
