//! String-backed enums shared by writers and the propagation engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol family of a resource writer.
///
/// The engine never branches on this; it is carried for logging, audit and
/// for picking the right writer implementation when resources are wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    Ldap,
    /// SQL table holding accounts.
    Database,
    Rest,
    Scim,
}

impl ConnectorType {
    pub const ALL: [ConnectorType; 4] = [
        ConnectorType::Ldap,
        ConnectorType::Database,
        ConnectorType::Rest,
        ConnectorType::Scim,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Ldap => "ldap",
            ConnectorType::Database => "database",
            ConnectorType::Rest => "rest",
            ConnectorType::Scim => "scim",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ct| ct.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError::new("connector type", s, "ldap, database, rest, scim"))
    }
}

/// Write operation requested on an external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceOperation {
    Create,
    Update,
    /// Removes the account; sends no attributes.
    Delete,
}

impl ResourceOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceOperation::Create => "create",
            ResourceOperation::Update => "update",
            ResourceOperation::Delete => "delete",
        }
    }

    /// Whether the operation sends an attribute payload.
    #[must_use]
    pub fn carries_attributes(&self) -> bool {
        !matches!(self, ResourceOperation::Delete)
    }
}

impl fmt::Display for ResourceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceOperation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(ResourceOperation::Create),
            "update" => Ok(ResourceOperation::Update),
            "delete" => Ok(ResourceOperation::Delete),
            _ => Err(ParseEnumError::new("resource operation", s, "create, update, delete")),
        }
    }
}

/// Error parsing one of the string-backed enums of this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl ParseEnumError {
    /// Build a parse error for `kind` with the offending `value`.
    #[must_use]
    pub fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}', expected one of: {}",
            self.kind, self.value, self.expected
        )
    }
}

impl std::error::Error for ParseEnumError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_type_round_trip_strings() {
        for ct in ConnectorType::ALL {
            assert_eq!(ct.as_str().parse::<ConnectorType>().unwrap(), ct);
        }
        assert_eq!("LDAP".parse::<ConnectorType>().unwrap(), ConnectorType::Ldap);
    }

    #[test]
    fn test_connector_type_invalid() {
        let err = "soap".parse::<ConnectorType>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid connector type 'soap', expected one of: ldap, database, rest, scim"
        );
    }

    #[test]
    fn test_resource_operation_from_str() {
        assert_eq!(
            "create".parse::<ResourceOperation>().unwrap(),
            ResourceOperation::Create
        );
        assert_eq!(
            "Update".parse::<ResourceOperation>().unwrap(),
            ResourceOperation::Update
        );
        assert_eq!(
            "delete".parse::<ResourceOperation>().unwrap(),
            ResourceOperation::Delete
        );
        assert!("rename".parse::<ResourceOperation>().is_err());
    }

    #[test]
    fn test_resource_operation_serde() {
        let json = serde_json::to_string(&ResourceOperation::Update).unwrap();
        assert_eq!(json, "\"update\"");
        assert!(!ResourceOperation::Delete.carries_attributes());
        assert!(ResourceOperation::Create.carries_attributes());
    }
}
