//! Static configuration of external resources.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use xavyo_connector::operation::ENABLE_ATTRIBUTE;
use xavyo_connector::resilience::{BackoffStrategy, RetryConfig, RetryExecutor};
use xavyo_connector::types::{ConnectorType, ResourceOperation};

use crate::error::{EngineError, EngineResult};
use crate::model::TraceLevel;

/// Attribute mapped onto a resource.
///
/// Names are the same on both sides; transformation rules are applied by the
/// writer, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedAttribute {
    pub name: String,
    /// A write without a value for this attribute is refused.
    #[serde(default)]
    pub mandatory: bool,
    /// Value is computed by the attribute resolver at generation time.
    #[serde(default)]
    pub derived: bool,
}

impl MappedAttribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mandatory: false,
            derived: false,
        }
    }
}

/// Trace level per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceLevels {
    pub create: TraceLevel,
    pub update: TraceLevel,
    pub delete: TraceLevel,
}

impl TraceLevels {
    /// Same level for every operation.
    #[must_use]
    pub fn uniform(level: TraceLevel) -> Self {
        Self {
            create: level,
            update: level,
            delete: level,
        }
    }

    #[must_use]
    pub fn for_operation(&self, operation: ResourceOperation) -> TraceLevel {
        match operation {
            ResourceOperation::Create => self.create,
            ResourceOperation::Update => self.update,
            ResourceOperation::Delete => self.delete,
        }
    }
}

/// In-call retry policy of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationPolicy {
    /// Total write attempts per task execution.
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    /// `initial;max;multiplier`, delays in milliseconds.
    #[serde(default)]
    pub backoff_params: String,
}

impl PropagationPolicy {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy, backoff_params: impl Into<String>) -> Self {
        Self {
            max_attempts,
            strategy,
            backoff_params: backoff_params.into(),
        }
    }

    #[must_use]
    pub fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(RetryConfig::from_backoff_params(
            self.max_attempts,
            self.strategy,
            &self.backoff_params,
        ))
    }
}

/// An external system identities are propagated to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalResource {
    /// Unique resource identifier.
    pub name: String,
    pub connector_type: ConnectorType,
    /// Object class written on the target system.
    pub object_class: String,
    /// `Some(order)` marks a priority resource; lower orders run first.
    pub priority: Option<u32>,
    pub mapping: Vec<MappedAttribute>,
    /// Identity attribute used as the account identifier on this resource.
    pub account_id_attribute: Option<String>,
    pub trace_levels: TraceLevels,
    /// Whether the enabled flag is propagated as `__ENABLE__`.
    pub enable_propagation: bool,
    pub propagation_policy: Option<PropagationPolicy>,
    /// Read the remote object before and after each write.
    pub fetch_around_provisioning: bool,
}

impl ExternalResource {
    pub fn new(
        name: impl Into<String>,
        connector_type: ConnectorType,
        object_class: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            connector_type,
            object_class: object_class.into(),
            priority: None,
            mapping: Vec::new(),
            account_id_attribute: None,
            trace_levels: TraceLevels::default(),
            enable_propagation: false,
            propagation_policy: None,
            fetch_around_provisioning: false,
        }
    }

    /// Mark as a priority resource with the given relative order.
    #[must_use]
    pub fn with_priority(mut self, order: u32) -> Self {
        self.priority = Some(order);
        self
    }

    #[must_use]
    pub fn map(mut self, name: impl Into<String>) -> Self {
        self.mapping.push(MappedAttribute::new(name));
        self
    }

    #[must_use]
    pub fn map_mandatory(mut self, name: impl Into<String>) -> Self {
        let mut attr = MappedAttribute::new(name);
        attr.mandatory = true;
        self.mapping.push(attr);
        self
    }

    #[must_use]
    pub fn map_derived(mut self, name: impl Into<String>) -> Self {
        let mut attr = MappedAttribute::new(name);
        attr.derived = true;
        self.mapping.push(attr);
        self
    }

    #[must_use]
    pub fn with_account_id(mut self, attribute: impl Into<String>) -> Self {
        self.account_id_attribute = Some(attribute.into());
        self
    }

    #[must_use]
    pub fn with_trace(mut self, level: TraceLevel) -> Self {
        self.trace_levels = TraceLevels::uniform(level);
        self
    }

    #[must_use]
    pub fn with_trace_levels(mut self, levels: TraceLevels) -> Self {
        self.trace_levels = levels;
        self
    }

    #[must_use]
    pub fn with_enable_propagation(mut self, enabled: bool) -> Self {
        self.enable_propagation = enabled;
        self
    }

    #[must_use]
    pub fn with_propagation_policy(mut self, policy: PropagationPolicy) -> Self {
        self.propagation_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_fetch_around_provisioning(mut self, fetch: bool) -> Self {
        self.fetch_around_provisioning = fetch;
        self
    }

    #[must_use]
    pub fn is_priority(&self) -> bool {
        self.priority.is_some()
    }

    /// Whether a change of `attribute` is relevant to this resource.
    #[must_use]
    pub fn maps(&self, attribute: &str) -> bool {
        if attribute == ENABLE_ATTRIBUTE {
            return self.enable_propagation;
        }
        self.mapping.iter().any(|m| m.name == attribute)
            || self.account_id_attribute.as_deref() == Some(attribute)
    }

    /// Mapped attributes read directly from the identity.
    pub fn direct_attributes(&self) -> impl Iterator<Item = &MappedAttribute> {
        self.mapping.iter().filter(|m| !m.derived)
    }

    /// Names of the attributes the resolver has to compute.
    #[must_use]
    pub fn derived_attributes(&self) -> Vec<String> {
        self.mapping
            .iter()
            .filter(|m| m.derived)
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn mandatory_attributes(&self) -> impl Iterator<Item = &str> {
        self.mapping
            .iter()
            .filter(|m| m.mandatory)
            .map(|m| m.name.as_str())
    }

    #[must_use]
    pub fn trace_level(&self, operation: ResourceOperation) -> TraceLevel {
        self.trace_levels.for_operation(operation)
    }
}

/// All resources known to the engine, by name.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    resources: HashMap<String, ExternalResource>,
}

impl ResourceCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a resource.
    pub fn register(&mut self, resource: ExternalResource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    #[must_use]
    pub fn with(mut self, resource: ExternalResource) -> Self {
        self.register(resource);
        self
    }

    /// Look up a resource; unknown names are a configuration error.
    pub fn resource(&self, name: &str) -> EngineResult<&ExternalResource> {
        self.resources
            .get(name)
            .ok_or_else(|| EngineError::UnknownResource {
                resource: name.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExternalResource> {
        self.resources.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
