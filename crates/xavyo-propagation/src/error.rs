//! Engine error types.

use thiserror::Error;

use crate::diff::DiffOperation;
use crate::model::SubjectRef;
use crate::outcome::OutcomeSet;
use crate::store::StoreError;

/// A priority resource failed; the batch was cut short.
///
/// Carries every outcome of the call, including the synthesized
/// `NotAttempted` ones, so partial success stays inspectable.
#[derive(Debug, Clone, Error)]
#[error("priority resource {resource} failed: {message}")]
pub struct PropagationError {
    pub resource: String,
    pub message: String,
    pub outcomes: OutcomeSet,
}

/// Failure reported by an injected collaborator (directory, resolver).
#[derive(Debug, Clone, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// Errors returned by the engine entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Resource not present in the catalog.
    #[error("unknown resource: {resource}")]
    UnknownResource { resource: String },

    /// No writer is wired for a known resource.
    #[error("no writer configured for resource {resource}")]
    MissingWriter { resource: String },

    /// Two diffs would produce the same subject, resource and operation.
    #[error("duplicate {operation} of {subject} on resource {resource}")]
    DuplicateDiff {
        subject: SubjectRef,
        resource: String,
        operation: DiffOperation,
    },

    /// Diff for an identity that is neither the propagated subject nor one
    /// of its dependents.
    #[error("diff for {found} does not belong to {subject}")]
    UnrelatedSubject { subject: SubjectRef, found: SubjectRef },

    /// Identity not found in the subject directory.
    #[error("subject not found: {subject}")]
    SubjectNotFound { subject: SubjectRef },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

impl EngineError {
    /// Configuration errors are raised before any write is attempted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownResource { .. }
                | EngineError::MissingWriter { .. }
                | EngineError::DuplicateDiff { .. }
                | EngineError::UnrelatedSubject { .. }
        )
    }

    /// Outcomes carried by a priority failure.
    pub fn outcomes(&self) -> Option<&OutcomeSet> {
        match self {
            EngineError::Propagation(e) => Some(&e.outcomes),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
