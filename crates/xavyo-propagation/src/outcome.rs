//! Outcomes and the outcome reporter.
//!
//! Every submitted task ends with exactly one [`Outcome`]. The reporter is the
//! only structure written concurrently by the worker pool: appends are keyed by
//! subject, resource and operation, and the first outcome for a key wins.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;
use xavyo_connector::operation::ConnectorObject;
use xavyo_connector::types::ResourceOperation;

use crate::model::SubjectRef;
use crate::task::PropagationTask;

/// Result of attempting (or skipping) one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    NotAttempted,
}

impl OutcomeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::NotAttempted => "not_attempted",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of an outcome within one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutcomeKey {
    pub subject: SubjectRef,
    pub resource: String,
    pub operation: ResourceOperation,
}

impl OutcomeKey {
    #[must_use]
    pub fn of(task: &PropagationTask) -> Self {
        Self {
            subject: task.subject().clone(),
            resource: task.resource().to_string(),
            operation: task.operation(),
        }
    }
}

/// Recorded result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub task_id: Uuid,
    pub subject: SubjectRef,
    pub resource: String,
    pub operation: ResourceOperation,
    pub status: OutcomeStatus,
    /// Failure reason, or why the task was skipped.
    pub message: Option<String>,
    pub before: Option<ConnectorObject>,
    pub after: Option<ConnectorObject>,
}

impl Outcome {
    fn for_task(task: &PropagationTask, status: OutcomeStatus, message: Option<String>) -> Self {
        Self {
            task_id: task.id(),
            subject: task.subject().clone(),
            resource: task.resource().to_string(),
            operation: task.operation(),
            status,
            message,
            before: None,
            after: None,
        }
    }

    pub fn success(task: &PropagationTask) -> Self {
        Self::for_task(task, OutcomeStatus::Success, None)
    }

    pub fn failure(task: &PropagationTask, message: impl Into<String>) -> Self {
        Self::for_task(task, OutcomeStatus::Failure, Some(message.into()))
    }

    pub fn not_attempted(task: &PropagationTask, reason: impl Into<String>) -> Self {
        Self::for_task(task, OutcomeStatus::NotAttempted, Some(reason.into()))
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_snapshots(
        mut self,
        before: Option<ConnectorObject>,
        after: Option<ConnectorObject>,
    ) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    #[must_use]
    pub fn key(&self) -> OutcomeKey {
        OutcomeKey {
            subject: self.subject.clone(),
            resource: self.resource.clone(),
            operation: self.operation,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == OutcomeStatus::Failure
    }
}

/// Ordered outcomes of one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSet {
    outcomes: Vec<Outcome>,
}

impl OutcomeSet {
    #[must_use]
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter()
    }

    /// Outcome for a resource and operation, any subject.
    #[must_use]
    pub fn get(&self, resource: &str, operation: ResourceOperation) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.resource == resource && o.operation == operation)
    }

    /// Status of the first outcome for `resource`.
    #[must_use]
    pub fn status_of(&self, resource: &str) -> Option<OutcomeStatus> {
        self.outcomes
            .iter()
            .find(|o| o.resource == resource)
            .map(|o| o.status)
    }

    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == OutcomeStatus::Success)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Outcome> {
        self.outcomes
    }
}

impl IntoIterator for OutcomeSet {
    type Item = Outcome;
    type IntoIter = std::vec::IntoIter<Outcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

#[derive(Debug, Default)]
struct ReporterState {
    /// Slot per key, in dispatch order.
    slots: Vec<Option<Outcome>>,
    index: HashMap<OutcomeKey, usize>,
    recorded: usize,
}

/// Thread-safe accumulator of the outcomes of one call.
///
/// Tasks are registered up front in dispatch order, so [`statuses`](Self::statuses)
/// is independent of worker scheduling.
#[derive(Debug, Default)]
pub struct PropagationReporter {
    state: Mutex<ReporterState>,
    completed: Notify,
}

impl PropagationReporter {
    /// Reporter expecting one outcome per task.
    pub fn new(tasks: &[Arc<PropagationTask>]) -> Self {
        let mut state = ReporterState::default();
        for task in tasks {
            let key = OutcomeKey::of(task);
            if !state.index.contains_key(&key) {
                state.index.insert(key, state.slots.len());
                state.slots.push(None);
            }
        }
        Self {
            state: Mutex::new(state),
            completed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        // A panic while holding the lock cannot leave the slots half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an outcome. Returns `false` when the key already has one.
    pub fn record(&self, outcome: Outcome) -> bool {
        let complete = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let key = outcome.key();
            let slot = match state.index.get(&key).copied() {
                Some(slot) => slot,
                None => {
                    let slot = state.slots.len();
                    state.index.insert(key, slot);
                    state.slots.push(None);
                    slot
                }
            };
            if state.slots[slot].is_some() {
                return false;
            }
            state.slots[slot] = Some(outcome);
            state.recorded += 1;
            state.recorded == state.slots.len()
        };
        if complete {
            self.completed.notify_waiters();
        }
        true
    }

    /// Mark every task without an outcome as not attempted.
    pub fn on_priority_failure(&self, remaining: &[Arc<PropagationTask>], reason: &str) {
        for task in remaining {
            self.record(Outcome::not_attempted(task, reason));
        }
    }

    /// Outcomes recorded so far, in dispatch order.
    #[must_use]
    pub fn statuses(&self) -> OutcomeSet {
        let state = self.lock();
        OutcomeSet::new(state.slots.iter().flatten().cloned().collect())
    }

    /// Whether every registered task has an outcome.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let state = self.lock();
        state.recorded == state.slots.len()
    }

    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.slots.len() - state.recorded
    }

    /// Wait until every registered task has an outcome.
    pub async fn wait_complete(&self) {
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }
}
