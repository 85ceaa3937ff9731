//! Write payloads
//!
//! Types for resource writes: UIDs, attribute sets, remote object snapshots
//! and the write request handed to a [`ResourceWriter`](crate::traits::ResourceWriter).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::ResourceOperation;

/// Reserved attribute carrying the enabled/disabled flag of an account.
pub const ENABLE_ATTRIBUTE: &str = "__ENABLE__";

/// Identifier a resource returns for the record it wrote.
///
/// `name` is the identifying attribute on the resource side (`dn`, `id`,
/// `uid`), `value` its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    name: String,
    value: String,
}

impl Uid {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Uid keyed by the conventional `uid` attribute.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self::new("uid", value)
    }

    pub fn attribute_name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// One value of a propagated attribute.
///
/// Multi-valued attributes are an ordered list of these in [`AttributeSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
}

impl AttributeValue {
    pub fn as_string(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Null, whitespace-only text and empty binaries count as "no value" for
    /// the mandatory attribute check.
    pub fn is_blank(&self) -> bool {
        match self {
            AttributeValue::Null => true,
            AttributeValue::String(s) => s.trim().is_empty(),
            AttributeValue::Binary(b) => b.is_empty(),
            AttributeValue::Boolean(_) | AttributeValue::Integer(_) | AttributeValue::Float(_) => {
                false
            }
        }
    }
}

macro_rules! attribute_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(v: $ty) -> Self {
                    AttributeValue::$variant(v.into())
                }
            }
        )*
    };
}

attribute_value_from! {
    String => String,
    &str => String,
    bool => Boolean,
    i64 => Integer,
    i32 => Integer,
    f64 => Float,
    Vec<u8> => Binary,
}

/// Attribute name to ordered values.
///
/// Backed by a `BTreeMap` so iteration (and therefore serialized payloads and
/// audit messages) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: BTreeMap<String, Vec<AttributeValue>>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values of an attribute.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<AttributeValue>) {
        self.attributes.insert(name.into(), values);
    }

    /// Set a single-valued attribute.
    pub fn set_single(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), vec![value.into()]);
    }

    /// Set a single-valued attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set_single(name, value);
        self
    }

    /// Set a multi-valued attribute using builder pattern.
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        self.set(name, values);
        self
    }

    /// Get the values of an attribute.
    pub fn get(&self, name: &str) -> Option<&[AttributeValue]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Get the first value of an attribute as a string.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .and_then(AttributeValue::as_string)
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Whether an attribute is present with at least one non-blank value.
    pub fn has_value(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|values| values.iter().any(|v| !v.is_blank()))
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<Vec<AttributeValue>> {
        self.attributes.remove(name)
    }

    /// Get all attribute names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<AttributeValue>)> {
        self.attributes.iter()
    }

    /// Copy of this set restricted to the attributes accepted by `keep`.
    pub fn project<F>(&self, keep: F) -> AttributeSet
    where
        F: Fn(&str) -> bool,
    {
        self.attributes
            .iter()
            .filter(|(name, _)| keep(name))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    }

    /// Merge `other` into this set; attributes in `other` win.
    pub fn merge(&mut self, other: AttributeSet) {
        self.attributes.extend(other.attributes);
    }

}

impl FromIterator<(String, Vec<AttributeValue>)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, Vec<AttributeValue>)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// Snapshot of an object as read from the target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorObject {
    /// Object class on the target system.
    pub object_class: String,
    /// Identifier of the object.
    pub uid: Uid,
    /// Attributes read back.
    pub attributes: AttributeSet,
}

impl ConnectorObject {
    /// Create a snapshot.
    pub fn new(object_class: impl Into<String>, uid: Uid, attributes: AttributeSet) -> Self {
        Self {
            object_class: object_class.into(),
            uid,
            attributes,
        }
    }
}

/// A single write handed to a resource writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Object class on the target system (e.g., "inetOrgPerson", "user").
    pub object_class: String,
    /// Operation to perform.
    pub operation: ResourceOperation,
    /// Key used by the target system to locate the existing record.
    pub key: Option<String>,
    /// Previous key, present when the account was renamed; the writer must
    /// locate the record by this value and move it to `key`.
    pub old_key: Option<String>,
    /// Full attribute payload (empty for deletes).
    pub attributes: AttributeSet,
}

impl WriteRequest {
    /// Create a write request without keys.
    pub fn new(
        object_class: impl Into<String>,
        operation: ResourceOperation,
        attributes: AttributeSet,
    ) -> Self {
        Self {
            object_class: object_class.into(),
            operation,
            key: None,
            old_key: None,
            attributes,
        }
    }

    /// Set the key used to locate the record.
    #[must_use]
    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    /// Set the pre-rename key.
    #[must_use]
    pub fn with_old_key(mut self, old_key: Option<String>) -> Self {
        self.old_key = old_key;
        self
    }

    /// The key the target system should use to find the existing record.
    ///
    /// A rename is addressed by the old key.
    pub fn lookup_key(&self) -> Option<&str> {
        self.old_key.as_deref().or(self.key.as_deref())
    }

    /// Whether this write renames the record.
    pub fn is_rename(&self) -> bool {
        matches!((&self.old_key, &self.key), (Some(old), Some(new)) if old != new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_display() {
        let uid = Uid::new("dn", "cn=john,dc=example,dc=com");
        assert_eq!(uid.to_string(), "dn=cn=john,dc=example,dc=com");
        assert_eq!(Uid::from_value("42").attribute_name(), "uid");
    }

    #[test]
    fn test_attribute_set_is_sorted_and_multi_valued() {
        let attrs = AttributeSet::new()
            .with("sn", "Doe")
            .with_values(
                "mail",
                vec!["john@example.com".into(), "jd@example.com".into()],
            )
            .with("cn", "John Doe");

        let names: Vec<&str> = attrs.names().collect();
        assert_eq!(names, vec!["cn", "mail", "sn"]);
        assert_eq!(attrs.get("mail").unwrap().len(), 2);
        assert_eq!(attrs.get_string("mail"), Some("john@example.com"));
    }

    #[test]
    fn test_has_value_ignores_blank() {
        let attrs = AttributeSet::new()
            .with("mail", "")
            .with_values("phone", vec![])
            .with("cn", "John");

        assert!(!attrs.has_value("mail"));
        assert!(!attrs.has_value("phone"));
        assert!(attrs.has_value("cn"));
        assert!(!attrs.has_value("missing"));
    }

    #[test]
    fn test_project_keeps_selected() {
        let attrs = AttributeSet::new()
            .with("cn", "John")
            .with("mail", "john@example.com")
            .with("password", "secret");

        let projected = attrs.project(|name| name != "password");
        assert_eq!(projected.len(), 2);
        assert!(!projected.has("password"));
    }

    #[test]
    fn test_attribute_set_serializes_flat() {
        let attrs = AttributeSet::new().with("cn", "John").with("age", 42);
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, serde_json::json!({"age": [42], "cn": ["John"]}));

        let back: AttributeSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_write_request_rename_lookup() {
        let req = WriteRequest::new("user", ResourceOperation::Update, AttributeSet::new())
            .with_key(Some("jdoe2".to_string()))
            .with_old_key(Some("jdoe".to_string()));

        assert!(req.is_rename());
        assert_eq!(req.lookup_key(), Some("jdoe"));

        let plain = WriteRequest::new("user", ResourceOperation::Update, AttributeSet::new())
            .with_key(Some("jdoe".to_string()));
        assert!(!plain.is_rename());
        assert_eq!(plain.lookup_key(), Some("jdoe"));
    }
}
