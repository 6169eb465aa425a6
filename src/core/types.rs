//! Core type definitions used throughout rulescan.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of one metadata entry on a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl MetaValue {
    /// Get the string value, if this is a string entry.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer value, if this is an integer entry.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the boolean value, if this is a boolean entry.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Integer(i) => write!(f, "{}", i),
            MetaValue::Boolean(b) => write!(f, "{}", b),
            MetaValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// A rule that satisfied its condition during one scan.
///
/// Built fresh for every match event. The scan callback only borrows it, so
/// clone the record to keep it past the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier, unique within its namespace
    pub identifier: String,
    /// Namespace the rule was compiled under
    pub namespace: String,
    /// Tags in declaration order
    pub tags: Vec<String>,
    /// Metadata in declaration order, keys unique
    pub metadata: Vec<(String, MetaValue)>,
}

impl Rule {
    /// Create an empty record for `identifier` in `namespace`.
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            namespace: namespace.into(),
            tags: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Look up a metadata value by key.
    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert a metadata entry. A repeated key replaces the earlier value in
    /// place, keeping the original position.
    pub fn insert_meta(&mut self, key: impl Into<String>, value: MetaValue) {
        let key = key.into();
        match self.metadata.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.metadata.push((key, value)),
        }
    }

    /// Check if the rule carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// `namespace:identifier`, unique across a rule set.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.identifier)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())?;
        if !self.tags.is_empty() {
            write!(f, " [{}]", self.tags.join(","))?;
        }
        Ok(())
    }
}
