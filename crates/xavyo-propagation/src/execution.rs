//! Execution records and stored tasks.
//!
//! An [`ExecutionRecord`] is written when a task is dispatched and finished
//! exactly once. A retry creates a new record. [`StoredTask`] carries the
//! retry bookkeeping of a task whose history has to be kept.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xavyo_connector::types::ParseEnumError;

use crate::model::TraceLevel;
use crate::task::PropagationTask;

/// What kind of task an execution belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Propagation,
    Notification,
}

impl TaskKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Propagation => "propagation",
            TaskKind::Notification => "notification",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagation" => Ok(TaskKind::Propagation),
            "notification" => Ok(TaskKind::Notification),
            _ => Err(ParseEnumError::new("task kind", s, "propagation, notification")),
        }
    }
}

/// Identity of a task across executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub kind: TaskKind,
    pub id: Uuid,
}

impl TaskRef {
    #[must_use]
    pub fn propagation(id: Uuid) -> Self {
        Self {
            kind: TaskKind::Propagation,
            id,
        }
    }

    #[must_use]
    pub fn notification(id: Uuid) -> Self {
        Self {
            kind: TaskKind::Notification,
            id,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    /// Dispatched, not finished yet.
    Created,
    Success,
    Failure,
}

impl ExecStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecStatus::Created => "created",
            ExecStatus::Success => "success",
            ExecStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ExecStatus::Created),
            "success" => Ok(ExecStatus::Success),
            "failure" => Ok(ExecStatus::Failure),
            _ => Err(ParseEnumError::new("execution status", s, "created, success, failure")),
        }
    }
}

/// One attempt to execute a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub task: TaskRef,
    pub tenant_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Set once, when the execution finishes.
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecStatus,
    /// Node or component that ran the execution.
    pub executor: String,
    pub message: Option<String>,
}

impl ExecutionRecord {
    /// A record for an execution starting now.
    pub fn start(task: TaskRef, tenant_id: Uuid, executor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            tenant_id,
            started_at: Utc::now(),
            ended_at: None,
            status: ExecStatus::Created,
            executor: executor.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Retry state of a stored task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    /// Last execution succeeded.
    Succeeded,
    /// Last execution failed; the retry coordinator has not decided yet.
    AwaitingDecision,
    /// Scheduled for re-execution on the next pass.
    PendingRetry,
    /// Retry budget exhausted; no further attempts.
    Abandoned,
}

impl RetryState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryState::Succeeded => "succeeded",
            RetryState::AwaitingDecision => "awaiting_decision",
            RetryState::PendingRetry => "pending_retry",
            RetryState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RetryState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(RetryState::Succeeded),
            "awaiting_decision" => Ok(RetryState::AwaitingDecision),
            "pending_retry" => Ok(RetryState::PendingRetry),
            "abandoned" => Ok(RetryState::Abandoned),
            _ => Err(ParseEnumError::new(
                "retry state",
                s,
                "succeeded, awaiting_decision, pending_retry, abandoned",
            )),
        }
    }
}

/// A task kept for retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTask {
    pub task: TaskRef,
    pub tenant_id: Uuid,
    pub trace_level: TraceLevel,
    pub retry_state: RetryState,
    /// Serialized [`PropagationTask`] or the notification payload.
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl StoredTask {
    /// Store a propagation task.
    pub fn propagation(
        task: &PropagationTask,
        tenant_id: Uuid,
        trace_level: TraceLevel,
        retry_state: RetryState,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            task: TaskRef::propagation(task.id()),
            tenant_id,
            trace_level,
            retry_state,
            payload: serde_json::to_value(task)?,
            updated_at: Utc::now(),
        })
    }

    /// Store a notification task with an opaque payload.
    #[must_use]
    pub fn notification(
        id: Uuid,
        tenant_id: Uuid,
        trace_level: TraceLevel,
        retry_state: RetryState,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task: TaskRef::notification(id),
            tenant_id,
            trace_level,
            retry_state,
            payload,
            updated_at: Utc::now(),
        }
    }

    /// Decode the payload of a propagation task.
    pub fn propagation_task(&self) -> Result<PropagationTask, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.trace_level.is_retryable()
    }
}
