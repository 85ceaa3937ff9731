//! Writer capability trait
//!
//! The write capability the propagation engine is handed for every external
//! resource. Protocol drivers (LDAP, SCIM, SQL, REST) implement it; the engine
//! only sees the trait object.

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::operation::{ConnectorObject, Uid, WriteRequest};
use crate::types::ConnectorType;

/// Capability for writing an identity's state to one external resource.
#[async_trait]
pub trait ResourceWriter: Send + Sync {
    /// Protocol family of this writer.
    fn connector_type(&self) -> ConnectorType;

    /// Display name used in logs.
    fn display_name(&self) -> &str;

    /// Perform the write.
    ///
    /// Returns the identifier of the written object when the target system
    /// reports one. Timeouts are owned by the implementation and surface as
    /// [`ConnectorError::ConnectionTimeout`](crate::error::ConnectorError::ConnectionTimeout).
    async fn write(&self, request: &WriteRequest) -> ConnectorResult<Option<Uid>>;

    /// Whether [`fetch`](Self::fetch) reads the target system.
    ///
    /// Writers that cannot read return `false` and the engine skips
    /// before/after snapshots.
    fn supports_fetch(&self) -> bool {
        false
    }

    /// Read the current object identified by `key`.
    async fn fetch(&self, object_class: &str, key: &str) -> ConnectorResult<Option<ConnectorObject>> {
        let _ = (object_class, key);
        Ok(None)
    }
}
