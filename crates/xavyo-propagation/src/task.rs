//! Propagation tasks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xavyo_connector::operation::{AttributeSet, WriteRequest};
use xavyo_connector::types::ResourceOperation;

use crate::model::{SubjectRef, SubjectType};

/// One write of one identity to one resource.
///
/// Built by the task generator and never mutated afterwards; the executor
/// shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationTask {
    id: Uuid,
    subject: SubjectRef,
    resource: String,
    operation: ResourceOperation,
    object_class: String,
    attributes: AttributeSet,
    old_account_id: Option<String>,
    priority: bool,
    connector_object_key_hint: Option<String>,
    missing_mandatory: Vec<String>,
}

impl PropagationTask {
    /// Start building a task with an empty payload.
    pub fn builder(
        subject: SubjectRef,
        resource: impl Into<String>,
        operation: ResourceOperation,
    ) -> PropagationTaskBuilder {
        PropagationTaskBuilder {
            task: PropagationTask {
                id: Uuid::new_v4(),
                subject,
                resource: resource.into(),
                operation,
                object_class: String::new(),
                attributes: AttributeSet::new(),
                old_account_id: None,
                priority: false,
                connector_object_key_hint: None,
                missing_mandatory: Vec::new(),
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &SubjectRef {
        &self.subject
    }

    pub fn subject_type(&self) -> SubjectType {
        self.subject.subject_type
    }

    pub fn subject_key(&self) -> &str {
        &self.subject.key
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn operation(&self) -> ResourceOperation {
        self.operation
    }

    pub fn object_class(&self) -> &str {
        &self.object_class
    }

    /// Full attribute payload; empty for deletes.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Account id before a rename.
    pub fn old_account_id(&self) -> Option<&str> {
        self.old_account_id.as_deref()
    }

    pub fn is_priority(&self) -> bool {
        self.priority
    }

    pub fn connector_object_key_hint(&self) -> Option<&str> {
        self.connector_object_key_hint.as_deref()
    }

    /// Mandatory mapped attributes that have no value.
    pub fn missing_mandatory(&self) -> &[String] {
        &self.missing_mandatory
    }

    /// Key used to look the object up on the resource.
    pub fn lookup_key(&self) -> Option<&str> {
        self.old_account_id().or(self.connector_object_key_hint())
    }

    /// The write handed to the resource writer.
    pub fn write_request(&self) -> WriteRequest {
        let attributes = if self.operation.carries_attributes() {
            self.attributes.clone()
        } else {
            AttributeSet::new()
        };
        WriteRequest::new(self.object_class.clone(), self.operation, attributes)
            .with_key(self.connector_object_key_hint.clone())
            .with_old_key(self.old_account_id.clone())
    }
}

/// Builder for [`PropagationTask`].
#[derive(Debug)]
pub struct PropagationTaskBuilder {
    task: PropagationTask,
}

impl PropagationTaskBuilder {
    #[must_use]
    pub fn object_class(mut self, object_class: impl Into<String>) -> Self {
        self.task.object_class = object_class.into();
        self
    }

    #[must_use]
    pub fn attributes(mut self, attributes: AttributeSet) -> Self {
        self.task.attributes = attributes;
        self
    }

    #[must_use]
    pub fn old_account_id(mut self, old_account_id: Option<String>) -> Self {
        self.task.old_account_id = old_account_id;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: bool) -> Self {
        self.task.priority = priority;
        self
    }

    #[must_use]
    pub fn connector_object_key_hint(mut self, hint: Option<String>) -> Self {
        self.task.connector_object_key_hint = hint;
        self
    }

    #[must_use]
    pub fn missing_mandatory(mut self, names: Vec<String>) -> Self {
        self.task.missing_mandatory = names;
        self
    }

    #[must_use]
    pub fn build(self) -> PropagationTask {
        self.task
    }
}
