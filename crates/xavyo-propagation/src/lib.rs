//! # Propagation Engine
//!
//! Pushes identity changes (users, groups, any objects) to the external
//! resources they are assigned to, and keeps an auditable, retryable record
//! of every write.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ Diff Engine  │────►│    Task      │────►│     Task      │────►│   Outcome    │
//! │ (old vs new) │     │  Generator   │     │   Executor    │     │   Reporter   │
//! └──────────────┘     └──────────────┘     └───────┬───────┘     └──────────────┘
//!                                                   │
//!                                    ┌──────────────┼───────────────┐
//!                                    ▼              ▼               ▼
//!                             ┌────────────┐ ┌─────────────┐ ┌─────────────┐
//!                             │  Resource  │ │  Execution  │ │    Audit    │
//!                             │  Writers   │ │    Store    │ │    Sink     │
//!                             └────────────┘ └──────┬──────┘ └─────────────┘
//!                                                   │
//!                                            ┌──────▼──────┐
//!                                            │    Retry    │◄── Retry Worker
//!                                            │ Coordinator │
//!                                            └─────────────┘
//! ```
//!
//! ## Features
//!
//! - **Priority resources**: written first, one at a time; the first failure
//!   stops the call and the rest are reported as not attempted
//! - **Async policies**: `Auto`, `ForceSync` and `ForceAsync`
//! - **Execution records**: one per attempt, finished exactly once
//! - **Retries**: in-call backoff per resource, plus retry passes bounded by
//!   `max_retries`
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_propagation::prelude::*;
//!
//! let engine = PropagationEngine::builder(catalog, writers, directory)
//!     .config(PropagationConfig::from_env()?)
//!     .build();
//!
//! let ctx = PropagationContext::new(tenant_id, "admin");
//! let result = engine.propagate_change(&ctx, &old, &new, &[], None).await?;
//! let outcomes = result.wait_for_all().await;
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod diff;
pub mod engine;
pub mod error;
pub mod execution;
pub mod executor;
pub mod generator;
pub mod model;
pub mod outcome;
pub mod resolver;
pub mod resource;
pub mod retry;
pub mod store;
pub mod task;
pub mod worker;

// Re-exports for convenience
pub use audit::{AuditCategory, AuditEntry, AuditOutcome, AuditSink, CollectingAuditSink, TracingAuditSink};
pub use config::{ConfigError, ConfigResult, PropagationConfig};
pub use context::PropagationContext;
pub use diff::{
    AttributeDelta, DependentIdentity, DiffEngine, DiffOperation, IdentitySnapshot,
    ResourceAssignmentDiff,
};
pub use engine::{PropagationEngine, PropagationEngineBuilder};
pub use error::{CollaboratorError, EngineError, EngineResult, PropagationError};
pub use execution::{ExecStatus, ExecutionRecord, RetryState, StoredTask, TaskKind, TaskRef};
pub use executor::{ExecutorConfig, PropagationResult, TaskExecutor};
pub use generator::TaskGenerator;
pub use model::{AsyncPolicy, SubjectRef, SubjectType, TraceLevel};
pub use outcome::{Outcome, OutcomeKey, OutcomeSet, OutcomeStatus, PropagationReporter};
pub use resolver::{AttributeResolver, NoDerivedAttributes, StaticWriters, SubjectDirectory, WriterProvider};
pub use resource::{ExternalResource, MappedAttribute, PropagationPolicy, ResourceCatalog, TraceLevels};
pub use retry::{RetryCoordinator, RetryPassReport};
pub use store::{ExecutionStore, InMemoryExecutionStore, PgExecutionStore, StoreError, StoreResult};
pub use task::{PropagationTask, PropagationTaskBuilder};
pub use worker::{RetryWorker, RetryWorkerConfig};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        AsyncPolicy, AuditSink, EngineError, ExternalResource, IdentitySnapshot, OutcomeSet,
        OutcomeStatus, PropagationConfig, PropagationContext, PropagationEngine,
        PropagationResult, ResourceAssignmentDiff, ResourceCatalog, StaticWriters,
        SubjectDirectory, SubjectRef, SubjectType, TraceLevel,
    };
    pub use xavyo_connector::prelude::*;
}
