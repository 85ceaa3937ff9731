//! Subject, policy and trace enums shared across the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xavyo_connector::types::ParseEnumError;

/// Kind of identity being propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    User,
    Group,
    AnyObject,
}

impl SubjectType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::Group => "group",
            SubjectType::AnyObject => "any_object",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SubjectType::User),
            "group" => Ok(SubjectType::Group),
            "any_object" | "anyobject" => Ok(SubjectType::AnyObject),
            _ => Err(ParseEnumError::new("subject type", s, "user, group, any_object")),
        }
    }
}

/// Identity reference: subject type plus opaque key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: SubjectType,
    pub key: String,
}

impl SubjectRef {
    pub fn new(subject_type: SubjectType, key: impl Into<String>) -> Self {
        Self {
            subject_type,
            key: key.into(),
        }
    }

    pub fn user(key: impl Into<String>) -> Self {
        Self::new(SubjectType::User, key)
    }

    pub fn group(key: impl Into<String>) -> Self {
        Self::new(SubjectType::Group, key)
    }

    pub fn any_object(key: impl Into<String>) -> Self {
        Self::new(SubjectType::AnyObject, key)
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type, self.key)
    }
}

/// How the executor waits for non-priority (and priority) tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncPolicy {
    /// Priority tasks are awaited, the others run in the background.
    #[default]
    Auto,
    /// Nothing is awaited; the caller accepts eventual consistency.
    ForceAsync,
    /// Every task is awaited before returning.
    ForceSync,
}

impl AsyncPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AsyncPolicy::Auto => "auto",
            AsyncPolicy::ForceAsync => "force_async",
            AsyncPolicy::ForceSync => "force_sync",
        }
    }
}

impl fmt::Display for AsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AsyncPolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(AsyncPolicy::Auto),
            "force_async" => Ok(AsyncPolicy::ForceAsync),
            "force_sync" => Ok(AsyncPolicy::ForceSync),
            _ => Err(ParseEnumError::new("async policy", s, "auto, force_async, force_sync")),
        }
    }
}

/// How much of a resource's propagation history is kept.
///
/// Ordered: `None < Failures < Summary < All`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    None,
    #[default]
    Failures,
    Summary,
    All,
}

impl TraceLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::None => "none",
            TraceLevel::Failures => "failures",
            TraceLevel::Summary => "summary",
            TraceLevel::All => "all",
        }
    }

    /// Failed tasks at this level may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        *self >= TraceLevel::Failures
    }

    /// Whether an execution with the given result is kept for retry bookkeeping.
    #[must_use]
    pub fn registers(&self, failed: bool) -> bool {
        (failed && self.is_retryable()) || *self == TraceLevel::All
    }

    /// Whether an execution with the given result is audited.
    #[must_use]
    pub fn audits(&self, failed: bool) -> bool {
        (failed && self.is_retryable()) || *self >= TraceLevel::Summary
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TraceLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(TraceLevel::None),
            "failures" => Ok(TraceLevel::Failures),
            "summary" => Ok(TraceLevel::Summary),
            "all" => Ok(TraceLevel::All),
            _ => Err(ParseEnumError::new("trace level", s, "none, failures, summary, all")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_level_ordering() {
        assert!(TraceLevel::None < TraceLevel::Failures);
        assert!(TraceLevel::Failures < TraceLevel::Summary);
        assert!(TraceLevel::Summary < TraceLevel::All);
    }

    #[test]
    fn test_trace_level_registration() {
        assert!(!TraceLevel::None.registers(true));
        assert!(TraceLevel::Failures.registers(true));
        assert!(!TraceLevel::Failures.registers(false));
        assert!(!TraceLevel::Summary.registers(false));
        assert!(TraceLevel::All.registers(false));
    }

    #[test]
    fn test_trace_level_audit() {
        assert!(!TraceLevel::None.audits(true));
        assert!(!TraceLevel::Failures.audits(false));
        assert!(TraceLevel::Summary.audits(false));
    }

    #[test]
    fn test_async_policy_parse() {
        assert_eq!("auto".parse::<AsyncPolicy>().unwrap(), AsyncPolicy::Auto);
        assert_eq!(
            "FORCE-ASYNC".parse::<AsyncPolicy>().unwrap(),
            AsyncPolicy::ForceAsync
        );
        assert_eq!(
            "force_sync".parse::<AsyncPolicy>().unwrap(),
            AsyncPolicy::ForceSync
        );
        assert!("eventually".parse::<AsyncPolicy>().is_err());
    }

    #[test]
    fn test_subject_ref_display() {
        assert_eq!(SubjectRef::user("jdoe").to_string(), "user:jdoe");
        assert_eq!(SubjectRef::any_object("printer-1").to_string(), "any_object:printer-1");
    }

    #[test]
    fn test_subject_type_parse() {
        assert_eq!("GROUP".parse::<SubjectType>().unwrap(), SubjectType::Group);
        assert!("role".parse::<SubjectType>().is_err());
    }
}
