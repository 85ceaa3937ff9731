//! Audit entries for propagation and retry decisions.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::PropagationContext;
use crate::execution::TaskRef;
use crate::model::SubjectRef;

/// Area an audit entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Propagation,
    Retry,
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    WillRetry,
    GivingUp,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::WillRetry => "will_retry",
            AuditOutcome::GivingUp => "giving_up",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One structured audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub tenant_id: Uuid,
    pub actor: String,
    pub correlation_id: Uuid,
    pub category: AuditCategory,
    /// Operation or decision, e.g. `update` or `retry`.
    pub event: String,
    pub outcome: AuditOutcome,
    pub subject: Option<SubjectRef>,
    pub resource: Option<String>,
    pub task: Option<TaskRef>,
    pub message: Option<String>,
}

impl AuditEntry {
    pub fn new(
        ctx: &PropagationContext,
        category: AuditCategory,
        event: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            at: Utc::now(),
            tenant_id: ctx.tenant_id,
            actor: ctx.actor.clone(),
            correlation_id: ctx.correlation_id,
            category,
            event: event.into(),
            outcome,
            subject: None,
            resource: None,
            task: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: SubjectRef) -> Self {
        self.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: TaskRef) -> Self {
        self.task = Some(task);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receiver of audit entries. Delivery problems are the sink's own business.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Writes audit entries as `tracing` events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        let subject = entry.subject.as_ref().map(ToString::to_string);
        let task = entry.task.as_ref().map(ToString::to_string);
        match entry.outcome {
            AuditOutcome::Success | AuditOutcome::WillRetry => info!(
                target: "audit",
                tenant_id = %entry.tenant_id,
                actor = %entry.actor,
                correlation_id = %entry.correlation_id,
                category = ?entry.category,
                event = %entry.event,
                outcome = %entry.outcome,
                subject = ?subject,
                resource = ?entry.resource,
                task = ?task,
                message = ?entry.message,
                "audit"
            ),
            AuditOutcome::Failure | AuditOutcome::GivingUp => warn!(
                target: "audit",
                tenant_id = %entry.tenant_id,
                actor = %entry.actor,
                correlation_id = %entry.correlation_id,
                category = ?entry.category,
                event = %entry.event,
                outcome = %entry.outcome,
                subject = ?subject,
                resource = ?entry.resource,
                task = ?task,
                message = ?entry.message,
                "audit"
            ),
        }
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct CollectingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl CollectingAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn with_outcome(&self, outcome: AuditOutcome) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.outcome == outcome)
            .collect()
    }
}

#[async_trait]
impl AuditSink for CollectingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collecting_sink() {
        let ctx = PropagationContext::new(Uuid::new_v4(), "admin");
        let sink = CollectingAuditSink::new();

        sink.record(
            AuditEntry::new(&ctx, AuditCategory::Propagation, "create", AuditOutcome::Success)
                .with_subject(SubjectRef::user("u1"))
                .with_resource("ldap"),
        )
        .await;
        sink.record(
            AuditEntry::new(&ctx, AuditCategory::Retry, "retry", AuditOutcome::GivingUp)
                .with_message("giving up"),
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].actor, "admin");
        assert_eq!(entries[0].resource.as_deref(), Some("ldap"));
        assert_eq!(sink.with_outcome(AuditOutcome::GivingUp).len(), 1);
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_entries() {
        let ctx = PropagationContext::system(Uuid::new_v4());
        TracingAuditSink
            .record(AuditEntry::new(
                &ctx,
                AuditCategory::Retry,
                "retry",
                AuditOutcome::WillRetry,
            ))
            .await;
    }
}
