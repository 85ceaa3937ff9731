//! Write error taxonomy
//!
//! Every error a [`ResourceWriter`](crate::traits::ResourceWriter) returns is
//! either transient (worth another attempt within the same call) or permanent
//! (recorded as a failure right away).

use thiserror::Error;

use crate::types::ResourceOperation;

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Whether retrying a failed write can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Error raised while writing to (or reading from) a resource.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The resource could not be reached.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout { timeout_secs: u64 },

    /// The resource answered but is not serving writes right now.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// Credentials rejected or the account lacks the needed rights.
    #[error("access denied: {message}")]
    AccessDenied { message: String },

    #[error("{operation} is not supported by {writer}")]
    UnsupportedOperation {
        writer: String,
        operation: ResourceOperation,
    },

    /// The resource refused the write.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// An attribute value was refused by the resource schema.
    #[error("invalid value for {attribute}: {message}")]
    SchemaViolation { attribute: String, message: String },
}

impl ConnectorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConnectorError::ConnectionFailed { .. }
            | ConnectorError::ConnectionTimeout { .. }
            | ConnectorError::TargetUnavailable { .. }
            | ConnectorError::NetworkError { .. } => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }

    /// Another attempt within the same call may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }

    /// Stable code for logs and audit entries.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::NetworkError { .. } => "NETWORK_ERROR",
            ConnectorError::AccessDenied { .. } => "ACCESS_DENIED",
            ConnectorError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
        }
    }

    /// Message recorded on a failed outcome: the error, then the first line
    /// of its root cause when there is one.
    pub fn failure_reason(&self) -> String {
        let mut reason = self.to_string();
        let mut root = None;
        let mut next = std::error::Error::source(self);
        while let Some(cause) = next {
            root = Some(cause);
            next = cause.source();
        }

        let cause = root.map(ToString::to_string).unwrap_or_default();
        if let Some(line) = cause.lines().next().filter(|l| !l.is_empty()) {
            reason.push_str("\n\n Cause: ");
            reason.push_str(line);
        }
        reason
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for writer operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
