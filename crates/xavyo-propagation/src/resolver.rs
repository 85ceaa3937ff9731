//! Capabilities the engine consumes from the rest of the platform.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use xavyo_connector::operation::AttributeSet;
use xavyo_connector::traits::ResourceWriter;

use crate::context::PropagationContext;
use crate::diff::{DependentIdentity, IdentitySnapshot};
use crate::error::CollaboratorError;
use crate::model::SubjectRef;
use crate::resource::ExternalResource;

/// Computes virtual/derived attribute values.
#[async_trait]
pub trait AttributeResolver: Send + Sync {
    /// Resolve `names` for `subject` on `resource`. Unresolvable names are
    /// left out of the result.
    async fn resolve(
        &self,
        ctx: &PropagationContext,
        subject: &SubjectRef,
        resource: &ExternalResource,
        names: &[String],
    ) -> Result<AttributeSet, CollaboratorError>;
}

/// Resolver for deployments without derived attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDerivedAttributes;

#[async_trait]
impl AttributeResolver for NoDerivedAttributes {
    async fn resolve(
        &self,
        _ctx: &PropagationContext,
        _subject: &SubjectRef,
        _resource: &ExternalResource,
        _names: &[String],
    ) -> Result<AttributeSet, CollaboratorError> {
        Ok(AttributeSet::new())
    }
}

/// Read access to the current identity state.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn snapshot(
        &self,
        ctx: &PropagationContext,
        subject: &SubjectRef,
    ) -> Result<Option<IdentitySnapshot>, CollaboratorError>;

    /// Members of a group, with the resources they keep without it.
    async fn dependents(
        &self,
        ctx: &PropagationContext,
        group: &SubjectRef,
    ) -> Result<Vec<DependentIdentity>, CollaboratorError> {
        let _ = (ctx, group);
        Ok(Vec::new())
    }
}

/// Maps a resource name to the writer injected for it.
pub trait WriterProvider: Send + Sync {
    fn writer(&self, resource: &str) -> Option<Arc<dyn ResourceWriter>>;
}

/// Writers registered up front, by resource name.
#[derive(Default, Clone)]
pub struct StaticWriters {
    writers: HashMap<String, Arc<dyn ResourceWriter>>,
}

impl StaticWriters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: impl Into<String>, writer: Arc<dyn ResourceWriter>) {
        self.writers.insert(resource.into(), writer);
    }

    #[must_use]
    pub fn with(mut self, resource: impl Into<String>, writer: Arc<dyn ResourceWriter>) -> Self {
        self.register(resource, writer);
        self
    }
}

impl std::fmt::Debug for StaticWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticWriters")
            .field("resources", &self.writers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WriterProvider for StaticWriters {
    fn writer(&self, resource: &str) -> Option<Arc<dyn ResourceWriter>> {
        self.writers.get(resource).cloned()
    }
}
