//! Task generator: resource diffs to ordered propagation tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};
use xavyo_connector::types::ResourceOperation;

use crate::context::PropagationContext;
use crate::diff::{IdentitySnapshot, ResourceAssignmentDiff};
use crate::error::{EngineError, EngineResult};
use crate::model::SubjectRef;
use crate::resolver::AttributeResolver;
use crate::resource::{ExternalResource, ResourceCatalog};
use crate::task::PropagationTask;

/// Builds propagation tasks from diffs.
///
/// Create and update tasks carry the full current value of every mapped
/// attribute, not only the delta.
pub struct TaskGenerator {
    catalog: Arc<ResourceCatalog>,
    resolver: Arc<dyn AttributeResolver>,
}

impl TaskGenerator {
    pub fn new(catalog: Arc<ResourceCatalog>, resolver: Arc<dyn AttributeResolver>) -> Self {
        Self { catalog, resolver }
    }

    /// Generate tasks in execution order: priority resources by configured
    /// order (ties keep diff order), then the others in diff order.
    ///
    /// `snapshots` holds the current state of every subject with a create or
    /// update diff. Deletes take their account key from the diff and fall
    /// back to the snapshot.
    #[instrument(skip(self, ctx, diffs, snapshots), fields(diffs = diffs.len()))]
    pub async fn generate(
        &self,
        ctx: &PropagationContext,
        diffs: &[ResourceAssignmentDiff],
        snapshots: &HashMap<SubjectRef, IdentitySnapshot>,
    ) -> EngineResult<Vec<PropagationTask>> {
        let mut ordered = Vec::with_capacity(diffs.len());
        for diff in diffs {
            let resource = self.catalog.resource(&diff.resource)?;
            let task = self
                .build_task(ctx, diff, resource, snapshots.get(&diff.subject))
                .await?;
            ordered.push((resource.priority, task));
        }

        // Stable: equal keys keep diff order.
        ordered.sort_by_key(|(priority, _)| (priority.is_none(), priority.unwrap_or(0)));

        let tasks: Vec<PropagationTask> = ordered.into_iter().map(|(_, task)| task).collect();
        debug!(tasks = tasks.len(), "Generated propagation tasks");
        Ok(tasks)
    }

    async fn build_task(
        &self,
        ctx: &PropagationContext,
        diff: &ResourceAssignmentDiff,
        resource: &ExternalResource,
        snapshot: Option<&IdentitySnapshot>,
    ) -> EngineResult<PropagationTask> {
        let operation = diff.operation.resource_operation();
        let current_key = snapshot.and_then(|s| s.account_id(resource));
        // A delete addresses the account as the resource still knows it.
        let key_hint = match operation {
            ResourceOperation::Delete => diff
                .previous_account_id(resource)
                .map(str::to_string)
                .or(current_key),
            _ => current_key,
        };
        let builder = PropagationTask::builder(diff.subject.clone(), &resource.name, operation)
            .object_class(&resource.object_class)
            .priority(resource.is_priority())
            .connector_object_key_hint(key_hint);

        if operation == ResourceOperation::Delete {
            return Ok(builder.build());
        }

        let snapshot = snapshot.ok_or_else(|| EngineError::SubjectNotFound {
            subject: diff.subject.clone(),
        })?;

        let mut attributes = snapshot
            .effective_attributes()
            .project(|name| resource.maps(name));
        let derived = resource.derived_attributes();
        if !derived.is_empty() {
            let resolved = self
                .resolver
                .resolve(ctx, &diff.subject, resource, &derived)
                .await?;
            attributes.merge(resolved);
        }

        let missing: Vec<String> = resource
            .mandatory_attributes()
            .filter(|name| !attributes.has_value(name))
            .map(str::to_string)
            .collect();

        let old_account_id = match (&resource.account_id_attribute, operation) {
            (Some(attr), ResourceOperation::Update) if diff.delta.changed.has(attr) => {
                diff.delta.previous_string(attr).map(str::to_string)
            }
            _ => None,
        };

        Ok(builder
            .attributes(attributes)
            .missing_mandatory(missing)
            .old_account_id(old_account_id)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;
    use xavyo_connector::operation::{AttributeSet, ENABLE_ATTRIBUTE};
    use xavyo_connector::types::ConnectorType;

    use crate::diff::DiffEngine;
    use crate::error::CollaboratorError;
    use crate::resolver::NoDerivedAttributes;

    struct DisplayNameResolver;

    #[async_trait]
    impl AttributeResolver for DisplayNameResolver {
        async fn resolve(
            &self,
            _ctx: &PropagationContext,
            subject: &SubjectRef,
            _resource: &ExternalResource,
            names: &[String],
        ) -> Result<AttributeSet, CollaboratorError> {
            Ok(names
                .iter()
                .map(|n| (n.clone(), vec![format!("derived-{}", subject.key).into()]))
                .collect())
        }
    }

    fn catalog() -> Arc<ResourceCatalog> {
        Arc::new(
            ResourceCatalog::new()
                .with(ExternalResource::new("crm", ConnectorType::Rest, "contact").map("email"))
                .with(
                    ExternalResource::new("ldap", ConnectorType::Ldap, "inetOrgPerson")
                        .with_priority(2)
                        .map("email")
                        .map_mandatory("cn")
                        .map_derived("displayName")
                        .with_account_id("username")
                        .with_enable_propagation(true),
                )
                .with(
                    ExternalResource::new("hr", ConnectorType::Database, "employee")
                        .with_priority(1)
                        .map("email"),
                ),
        )
    }

    fn ctx() -> PropagationContext {
        PropagationContext::new(Uuid::new_v4(), "admin")
    }

    fn user(username: &str) -> IdentitySnapshot {
        IdentitySnapshot::new(SubjectRef::user("u1"))
            .with_attribute("username", username)
            .with_attribute("email", "jdoe@example.com")
            .with_attribute("cn", "John Doe")
    }

    #[tokio::test]
    async fn test_priority_first_then_assignment_order() {
        let generator = TaskGenerator::new(catalog(), Arc::new(NoDerivedAttributes));
        let old = IdentitySnapshot::new(SubjectRef::user("u1"));
        let new = user("jdoe")
            .with_resource("crm")
            .with_resource("ldap")
            .with_resource("hr");

        let diffs = DiffEngine::new(catalog()).diff(&old, &new, &[]).unwrap();
        let snapshots = HashMap::from([(new.subject.clone(), new.clone())]);
        let tasks = generator.generate(&ctx(), &diffs, &snapshots).await.unwrap();

        let order: Vec<_> = tasks.iter().map(|t| t.resource()).collect();
        assert_eq!(order, vec!["hr", "ldap", "crm"]);
        assert!(tasks[0].is_priority());
        assert!(!tasks[2].is_priority());
    }

    #[tokio::test]
    async fn test_full_attribute_snapshot_and_derived() {
        let generator = TaskGenerator::new(catalog(), Arc::new(DisplayNameResolver));
        let old = user("jdoe").with_resource("ldap");
        let new = user("jdoe")
            .with_attribute("email", "john@example.com")
            .with_resource("ldap");

        let diffs = DiffEngine::new(catalog()).diff(&old, &new, &[]).unwrap();
        let snapshots = HashMap::from([(new.subject.clone(), new.clone())]);
        let tasks = generator.generate(&ctx(), &diffs, &snapshots).await.unwrap();

        assert_eq!(tasks.len(), 1);
        let attrs = tasks[0].attributes();
        assert_eq!(attrs.get_string("email"), Some("john@example.com"));
        assert_eq!(attrs.get_string("cn"), Some("John Doe"));
        assert_eq!(attrs.get_string("displayName"), Some("derived-u1"));
        assert!(attrs.has(ENABLE_ATTRIBUTE));
        assert_eq!(tasks[0].old_account_id(), None);
        assert_eq!(tasks[0].connector_object_key_hint(), Some("jdoe"));
    }

    #[tokio::test]
    async fn test_rename_sets_old_account_id() {
        let generator = TaskGenerator::new(catalog(), Arc::new(NoDerivedAttributes));
        let old = user("jdoe").with_resource("ldap");
        let new = user("jsmith").with_resource("ldap");

        let diffs = DiffEngine::new(catalog()).diff(&old, &new, &[]).unwrap();
        let snapshots = HashMap::from([(new.subject.clone(), new.clone())]);
        let tasks = generator.generate(&ctx(), &diffs, &snapshots).await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].operation(), ResourceOperation::Update);
        assert_eq!(tasks[0].old_account_id(), Some("jdoe"));
        assert_eq!(tasks[0].connector_object_key_hint(), Some("jsmith"));
    }

    #[tokio::test]
    async fn test_delete_after_rename_uses_previous_account_id() {
        let generator = TaskGenerator::new(catalog(), Arc::new(NoDerivedAttributes));
        let old = user("jdoe").with_resource("ldap").with_resource("crm");
        let new = user("john.doe").with_resource("crm");

        let diffs = DiffEngine::new(catalog()).diff(&old, &new, &[]).unwrap();
        let snapshots = HashMap::from([(new.subject.clone(), new.clone())]);
        let tasks = generator.generate(&ctx(), &diffs, &snapshots).await.unwrap();

        let delete = tasks
            .iter()
            .find(|t| t.operation() == ResourceOperation::Delete)
            .unwrap();
        assert_eq!(delete.resource(), "ldap");
        assert_eq!(delete.connector_object_key_hint(), Some("jdoe"));
        assert_eq!(delete.write_request().key.as_deref(), Some("jdoe"));
    }

    #[tokio::test]
    async fn test_missing_mandatory_listed() {
        let generator = TaskGenerator::new(catalog(), Arc::new(NoDerivedAttributes));
        let old = IdentitySnapshot::new(SubjectRef::user("u1"));
        let mut new = user("jdoe").with_resource("ldap");
        new.attributes.remove("cn");

        let diffs = DiffEngine::new(catalog()).diff(&old, &new, &[]).unwrap();
        let snapshots = HashMap::from([(new.subject.clone(), new.clone())]);
        let tasks = generator.generate(&ctx(), &diffs, &snapshots).await.unwrap();

        assert_eq!(tasks[0].missing_mandatory(), ["cn".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_resource_rejected() {
        let generator = TaskGenerator::new(catalog(), Arc::new(NoDerivedAttributes));
        let diffs = vec![ResourceAssignmentDiff::remove(SubjectRef::user("u1"), "erp")];
        let err = generator
            .generate(&ctx(), &diffs, &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_create_without_snapshot() {
        let generator = TaskGenerator::new(catalog(), Arc::new(NoDerivedAttributes));
        let diffs = vec![ResourceAssignmentDiff::new(
            SubjectRef::user("ghost"),
            "crm",
            crate::diff::DiffOperation::Add,
            Default::default(),
        )];
        let err = generator
            .generate(&ctx(), &diffs, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SubjectNotFound { .. }));
    }
}
