//! Resource diff engine.
//!
//! Compares an identity's previous and desired state and decides, per
//! external resource, whether it has to be created, updated or removed.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use xavyo_connector::operation::{AttributeSet, AttributeValue, ENABLE_ATTRIBUTE};
use xavyo_connector::types::ResourceOperation;

use crate::error::EngineResult;
use crate::model::{SubjectRef, SubjectType};
use crate::resource::{ExternalResource, ResourceCatalog};

/// State of an identity at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub subject: SubjectRef,
    /// Assigned resources, in assignment order.
    pub resources: Vec<String>,
    pub attributes: AttributeSet,
    pub enabled: bool,
}

impl IdentitySnapshot {
    pub fn new(subject: SubjectRef) -> Self {
        Self {
            subject,
            resources: Vec::new(),
            attributes: AttributeSet::new(),
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        if !self.resources.contains(&resource) {
            self.resources.push(resource);
        }
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.set_single(name, value);
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn has_resource(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource)
    }

    /// Attributes plus the enabled flag as `__ENABLE__`.
    #[must_use]
    pub fn effective_attributes(&self) -> AttributeSet {
        self.attributes.clone().with(ENABLE_ATTRIBUTE, self.enabled)
    }

    /// Account id of this identity on `resource`, if the resource has one.
    #[must_use]
    pub fn account_id(&self, resource: &ExternalResource) -> Option<String> {
        resource
            .account_id_attribute
            .as_deref()
            .and_then(|name| self.attributes.get_string(name))
            .map(str::to_string)
    }
}

/// Identity reachable through a group, with its other sources of resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentIdentity {
    pub subject: SubjectRef,
    /// Resources assigned to the identity itself.
    pub direct_resources: Vec<String>,
    /// Resources it gets through groups other than the one being deleted.
    pub other_group_resources: Vec<String>,
}

impl DependentIdentity {
    pub fn new(subject: SubjectRef) -> Self {
        Self {
            subject,
            direct_resources: Vec::new(),
            other_group_resources: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_direct(mut self, resource: impl Into<String>) -> Self {
        self.direct_resources.push(resource.into());
        self
    }

    #[must_use]
    pub fn with_other_group(mut self, resource: impl Into<String>) -> Self {
        self.other_group_resources.push(resource.into());
        self
    }

    /// Whether `resource` stays assigned without the deleted group.
    #[must_use]
    pub fn reaches_elsewhere(&self, resource: &str) -> bool {
        self.direct_resources.iter().any(|r| r == resource)
            || self.other_group_resources.iter().any(|r| r == resource)
    }
}

/// Added, changed and removed attributes between two states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeDelta {
    pub added: AttributeSet,
    /// New values of changed attributes.
    pub changed: AttributeSet,
    /// Last values of removed attributes.
    pub removed: AttributeSet,
    /// Values of changed attributes before the change.
    pub previous: AttributeSet,
}

impl AttributeDelta {
    #[must_use]
    pub fn compute(old: &AttributeSet, new: &AttributeSet) -> Self {
        let mut delta = Self::default();
        for (name, values) in new.iter() {
            match old.get(name) {
                None => delta.added.set(name.clone(), values.clone()),
                Some(before) if before != values.as_slice() => {
                    delta.changed.set(name.clone(), values.clone());
                    delta.previous.set(name.clone(), before.to_vec());
                }
                Some(_) => {}
            }
        }
        for (name, values) in old.iter() {
            if !new.has(name) {
                delta.removed.set(name.clone(), values.clone());
            }
        }
        delta
    }

    /// Delta for a newly assigned resource: everything is added.
    #[must_use]
    pub fn all_added(attributes: AttributeSet) -> Self {
        Self {
            added: attributes,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn project<F>(&self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        Self {
            added: self.added.project(&keep),
            changed: self.changed.project(&keep),
            removed: self.removed.project(&keep),
            previous: self.previous.project(&keep),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Whether `name` was added, changed or removed.
    pub fn touches(&self, name: &str) -> bool {
        self.added.has(name) || self.changed.has(name) || self.removed.has(name)
    }

    /// Value of `name` before the change, if it changed.
    pub fn previous_string(&self, name: &str) -> Option<&str> {
        self.previous.get_string(name)
    }
}

/// Operation required on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOperation {
    Add,
    Update,
    Remove,
}

impl DiffOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffOperation::Add => "add",
            DiffOperation::Update => "update",
            DiffOperation::Remove => "remove",
        }
    }

    #[must_use]
    pub fn resource_operation(&self) -> ResourceOperation {
        match self {
            DiffOperation::Add => ResourceOperation::Create,
            DiffOperation::Update => ResourceOperation::Update,
            DiffOperation::Remove => ResourceOperation::Delete,
        }
    }
}

impl std::fmt::Display for DiffOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What has to happen on one resource for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAssignmentDiff {
    pub subject: SubjectRef,
    pub resource: String,
    pub operation: DiffOperation,
    pub delta: AttributeDelta,
}

impl ResourceAssignmentDiff {
    pub fn new(
        subject: SubjectRef,
        resource: impl Into<String>,
        operation: DiffOperation,
        delta: AttributeDelta,
    ) -> Self {
        Self {
            subject,
            resource: resource.into(),
            operation,
            delta,
        }
    }

    pub fn remove(subject: SubjectRef, resource: impl Into<String>) -> Self {
        Self::new(subject, resource, DiffOperation::Remove, AttributeDelta::default())
    }

    /// Remove addressed by the account id the identity had before the change.
    pub fn remove_account(
        subject: SubjectRef,
        resource: &ExternalResource,
        previous: &IdentitySnapshot,
    ) -> Self {
        let mut diff = Self::remove(subject, &resource.name);
        if let (Some(attr), Some(account_id)) = (
            resource.account_id_attribute.as_deref(),
            previous.account_id(resource),
        ) {
            diff.delta.previous.set_single(attr, account_id);
        }
        diff
    }

    /// Account id the resource knows this identity by, when the diff
    /// carries it.
    pub fn previous_account_id(&self, resource: &ExternalResource) -> Option<&str> {
        resource
            .account_id_attribute
            .as_deref()
            .and_then(|attr| self.delta.previous_string(attr))
    }
}

/// Computes resource assignment diffs against the catalog.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    catalog: Arc<ResourceCatalog>,
}

impl DiffEngine {
    pub fn new(catalog: Arc<ResourceCatalog>) -> Self {
        Self { catalog }
    }

    /// Diff two states of the same identity.
    ///
    /// Adds and updates follow the new assignment order, removes the old one.
    /// Excluded resources are neither created, updated nor removed.
    pub fn diff(
        &self,
        old: &IdentitySnapshot,
        new: &IdentitySnapshot,
        excluded: &[String],
    ) -> EngineResult<Vec<ResourceAssignmentDiff>> {
        let excluded: HashSet<&str> = excluded.iter().map(String::as_str).collect();
        let delta = AttributeDelta::compute(&old.effective_attributes(), &new.effective_attributes());
        let new_attributes = new.effective_attributes();
        let mut diffs = Vec::new();

        for name in &new.resources {
            if excluded.contains(name.as_str()) {
                continue;
            }
            let resource = self.catalog.resource(name)?;
            if old.has_resource(name) {
                let projected = delta.project(|attr| resource.maps(attr));
                if !projected.is_empty() {
                    diffs.push(ResourceAssignmentDiff::new(
                        new.subject.clone(),
                        name.clone(),
                        DiffOperation::Update,
                        projected,
                    ));
                }
            } else {
                diffs.push(ResourceAssignmentDiff::new(
                    new.subject.clone(),
                    name.clone(),
                    DiffOperation::Add,
                    AttributeDelta::all_added(new_attributes.project(|attr| resource.maps(attr))),
                ));
            }
        }

        for name in &old.resources {
            if excluded.contains(name.as_str()) || new.has_resource(name) {
                continue;
            }
            let resource = self.catalog.resource(name)?;
            diffs.push(ResourceAssignmentDiff::remove_account(
                old.subject.clone(),
                resource,
                old,
            ));
        }

        Ok(diffs)
    }

    /// Diffs for deleting an identity.
    ///
    /// For a group, members that reach one of its resources only through it
    /// lose that resource too.
    pub fn diff_delete(
        &self,
        snapshot: &IdentitySnapshot,
        dependents: &[DependentIdentity],
        excluded: &[String],
    ) -> EngineResult<Vec<ResourceAssignmentDiff>> {
        let excluded: HashSet<&str> = excluded.iter().map(String::as_str).collect();
        let mut removed = Vec::new();
        for name in &snapshot.resources {
            if excluded.contains(name.as_str()) {
                continue;
            }
            self.catalog.resource(name)?;
            removed.push(name);
        }

        let mut diffs: Vec<ResourceAssignmentDiff> = removed
            .iter()
            .map(|name| ResourceAssignmentDiff::remove(snapshot.subject.clone(), name.as_str()))
            .collect();

        if snapshot.subject.subject_type == SubjectType::Group {
            for dependent in dependents {
                for name in &removed {
                    if !dependent.reaches_elsewhere(name) {
                        diffs.push(ResourceAssignmentDiff::remove(
                            dependent.subject.clone(),
                            name.as_str(),
                        ));
                    }
                }
            }
        }

        Ok(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use xavyo_connector::types::ConnectorType;

    fn engine() -> DiffEngine {
        let catalog = ResourceCatalog::new()
            .with(
                ExternalResource::new("A", ConnectorType::Ldap, "inetOrgPerson")
                    .with_priority(1)
                    .map("email")
                    .with_account_id("username"),
            )
            .with(ExternalResource::new("B", ConnectorType::Rest, "account").map("phone"))
            .with(
                ExternalResource::new("C", ConnectorType::Scim, "User")
                    .map("email")
                    .with_enable_propagation(true),
            );
        DiffEngine::new(Arc::new(catalog))
    }

    fn user() -> IdentitySnapshot {
        IdentitySnapshot::new(SubjectRef::user("u1"))
            .with_attribute("username", "jdoe")
            .with_attribute("email", "jdoe@example.com")
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let old = user().with_resource("A").with_resource("B");
        let diffs = engine().diff(&old, &old, &[]).unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_diff_add_update_remove() {
        let old = user().with_resource("A").with_resource("B");
        let new = user()
            .with_attribute("email", "john@example.com")
            .with_resource("A")
            .with_resource("C");

        let diffs = engine().diff(&old, &new, &[]).unwrap();
        let ops: Vec<_> = diffs.iter().map(|d| (d.resource.as_str(), d.operation)).collect();
        assert_eq!(
            ops,
            vec![
                ("A", DiffOperation::Update),
                ("C", DiffOperation::Add),
                ("B", DiffOperation::Remove),
            ]
        );
        assert!(diffs[0].delta.changed.has("email"));
        assert_eq!(diffs[0].delta.previous_string("email"), Some("jdoe@example.com"));
        assert!(diffs[1].delta.added.has(ENABLE_ATTRIBUTE));
    }

    #[test]
    fn test_remove_keeps_pre_rename_account_id() {
        let old = user().with_resource("A").with_resource("C");
        let new = user().with_attribute("username", "john.doe").with_resource("C");

        let diffs = engine().diff(&old, &new, &[]).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].operation, DiffOperation::Remove);

        let catalog = engine().catalog;
        let resource = catalog.resource("A").unwrap();
        assert_eq!(diffs[0].previous_account_id(resource), Some("jdoe"));
    }

    #[test]
    fn test_diff_ignores_unmapped_changes() {
        let old = user().with_resource("B");
        let new = user().with_attribute("email", "other@example.com").with_resource("B");
        assert!(engine().diff(&old, &new, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_diff_enable_change() {
        let old = user().with_resource("A").with_resource("C");
        let new = user().with_enabled(false).with_resource("A").with_resource("C");

        let diffs = engine().diff(&old, &new, &[]).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].resource, "C");
        assert!(diffs[0].delta.changed.has(ENABLE_ATTRIBUTE));
    }

    #[test]
    fn test_diff_excluded_resources() {
        let old = user().with_resource("A").with_resource("B");
        let new = user().with_resource("C");

        let diffs = engine()
            .diff(&old, &new, &["B".to_string(), "C".to_string()])
            .unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].resource, "A");
        assert_eq!(diffs[0].operation, DiffOperation::Remove);
    }

    #[test]
    fn test_diff_unknown_resource() {
        let old = user();
        let new = user().with_resource("Z");
        let err = engine().diff(&old, &new, &[]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownResource { .. }));
    }

    #[test]
    fn test_diff_delete_cascades_to_dependents() {
        let group = IdentitySnapshot::new(SubjectRef::group("staff"))
            .with_resource("A")
            .with_resource("B");
        let dependents = vec![
            DependentIdentity::new(SubjectRef::user("only-via-group")),
            DependentIdentity::new(SubjectRef::user("direct-a")).with_direct("A"),
            DependentIdentity::new(SubjectRef::user("other-group-b")).with_other_group("B"),
        ];

        let diffs = engine().diff_delete(&group, &dependents, &[]).unwrap();
        let pairs: Vec<_> = diffs
            .iter()
            .map(|d| (d.subject.key.as_str(), d.resource.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("staff", "A"),
                ("staff", "B"),
                ("only-via-group", "A"),
                ("only-via-group", "B"),
                ("direct-a", "B"),
                ("other-group-b", "A"),
            ]
        );
        assert!(diffs.iter().all(|d| d.operation == DiffOperation::Remove));
    }

    #[test]
    fn test_diff_delete_excluded() {
        let snapshot = user().with_resource("A").with_resource("B");
        let diffs = engine().diff_delete(&snapshot, &[], &["A".to_string()]).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].resource, "B");
    }
}
