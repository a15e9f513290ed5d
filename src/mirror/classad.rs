//! Attribute-value records
//!
//! A ClassAd stores attribute values as the raw expression text found in
//! the log. Values are never evaluated; they are only classified so a sink
//! can route numbers and strings to different columns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attributes that carry credentials and are never mirrored
const PRIVATE_ATTRIBUTES: [&str; 7] = [
    "Capability",
    "ChildClaimIds",
    "ClaimId",
    "ClaimIdList",
    "ClaimIds",
    "PairedClaimId",
    "TransferKey",
];

/// Returns true if `name` is a credential-bearing attribute
pub fn is_private_attribute(name: &str) -> bool {
    PRIVATE_ATTRIBUTES
        .iter()
        .any(|private| private.eq_ignore_ascii_case(name))
}

/// Storage class of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Parses completely as a floating point number
    Number,
    /// Anything else: quoted strings, expressions, booleans
    Text,
}

impl ValueKind {
    /// Classifies raw expression text
    pub fn classify(value: &str) -> Self {
        let trimmed = value.trim();
        if !trimmed.is_empty() && trimmed.parse::<f64>().is_ok() {
            ValueKind::Number
        } else {
            ValueKind::Text
        }
    }
}

/// A mutable attribute-value record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAd {
    my_type: String,
    target_type: String,
    attributes: BTreeMap<String, String>,
}

impl ClassAd {
    /// Creates an empty record of the given types
    pub fn new(my_type: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            my_type: my_type.into(),
            target_type: target_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Type of this record (e.g. `Job`)
    pub fn my_type(&self) -> &str {
        &self.my_type
    }

    /// Type this record matches against (e.g. `Machine`)
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    /// Sets an attribute, returning the previous value
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(name.into(), value.into())
    }

    /// Removes an attribute; returns false if it was not set
    pub fn delete(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// Raw value of an attribute
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Attributes in name order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True if no attribute is set
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Layers this record over `parent`.
    ///
    /// The result keeps this record's types; parent attributes appear only
    /// where this record does not set the same name.
    pub fn compose_over(&self, parent: &ClassAd) -> ClassAd {
        let mut attributes = parent.attributes.clone();
        for (name, value) in &self.attributes {
            attributes.insert(name.clone(), value.clone());
        }
        ClassAd {
            my_type: self.my_type.clone(),
            target_type: self.target_type.clone(),
            attributes,
        }
    }
}
