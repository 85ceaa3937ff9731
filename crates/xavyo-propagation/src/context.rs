//! Call context threaded through every engine entry point.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor recorded for work the engine starts on its own (retry passes).
pub const SYSTEM_ACTOR: &str = "system";

/// Tenant, actor and correlation id of one propagation call.
///
/// Passed explicitly to the engine, executor, stores and audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationContext {
    /// Tenant the identities and resources belong to.
    pub tenant_id: Uuid,
    /// Who triggered the change.
    pub actor: String,
    /// Correlates log lines and audit entries of one call.
    pub correlation_id: Uuid,
}

impl PropagationContext {
    /// Create a context with a fresh correlation id.
    pub fn new(tenant_id: Uuid, actor: impl Into<String>) -> Self {
        Self {
            tenant_id,
            actor: actor.into(),
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Context for engine-initiated work on behalf of a tenant.
    #[must_use]
    pub fn system(tenant_id: Uuid) -> Self {
        Self::new(tenant_id, SYSTEM_ACTOR)
    }

    /// Use an existing correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_context() {
        let tenant = Uuid::new_v4();
        let ctx = PropagationContext::system(tenant);
        assert_eq!(ctx.tenant_id, tenant);
        assert_eq!(ctx.actor, SYSTEM_ACTOR);
    }

    #[test]
    fn test_with_correlation_id() {
        let id = Uuid::new_v4();
        let ctx = PropagationContext::new(Uuid::new_v4(), "admin").with_correlation_id(id);
        assert_eq!(ctx.correlation_id, id);
        assert_eq!(ctx.actor, "admin");
    }
}
