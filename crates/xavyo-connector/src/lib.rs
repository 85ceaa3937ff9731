//! # xavyo connector
//!
//! The write capability the xavyo propagation engine pushes identity state
//! through.
//!
//! Protocol drivers (LDAP, SCIM, SQL, REST) live outside this crate. What is
//! defined here is the contract between them and the engine:
//!
//! - [`ResourceWriter`](traits::ResourceWriter) - write (and optionally read)
//!   one object on an external resource
//! - [`WriteRequest`](operation::WriteRequest) and
//!   [`AttributeSet`](operation::AttributeSet) - the payload of a write
//! - [`ConnectorError`](error::ConnectorError) - failures with
//!   transient/permanent classification
//! - [`RetryExecutor`](resilience::RetryExecutor) - in-call retry with backoff
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_connector::prelude::*;
//!
//! let request = WriteRequest::new(
//!     "user",
//!     ResourceOperation::Update,
//!     AttributeSet::new().with("mail", "jdoe@example.com"),
//! )
//! .with_key(Some("jdoe".to_string()));
//!
//! let uid = writer.write(&request).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`types`] - Enums shared with the engine
//! - [`error`] - Error types with transient/permanent classification
//! - [`traits`] - The writer capability trait
//! - [`operation`] - Uid, attribute values and sets, write requests
//! - [`resilience`] - Backoff strategies and retry executor

pub mod error;
pub mod operation;
pub mod resilience;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use xavyo_connector::prelude::*;
/// ```
pub mod prelude {
    // Types and enums
    pub use crate::types::{ConnectorType, ParseEnumError, ResourceOperation};

    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult, ErrorClass};

    // Traits
    pub use crate::traits::ResourceWriter;

    // Operations
    pub use crate::operation::{
        AttributeSet, AttributeValue, ConnectorObject, Uid, WriteRequest, ENABLE_ATTRIBUTE,
    };

    // Resilience
    pub use crate::resilience::{BackoffStrategy, RetryConfig, RetryExecutor};
}

// Re-export async_trait for writer implementors
pub use async_trait::async_trait;
