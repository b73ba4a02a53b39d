/*!
 * Service Attributes
 * Key/value metadata frozen into the static descriptor at creation
 */

use crate::core::limits::MAX_ATTRIBUTES;
use serde::{Deserialize, Serialize};

/// One key/value pair; keys may repeat within a set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    key: String,
    value: String,
}

impl Attribute {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// The ordered attribute list of a service, read-only once created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet(Vec<Attribute>);

impl AttributeSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.0.iter()
    }

    /// All values stored under `key`, in definition order
    pub fn key_values(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|a| a.key() == key)
            .map(|a| a.value())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|a| a.key() == key)
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|a| a.key() == key && a.value() == value)
    }

    pub(crate) fn push(&mut self, attribute: Attribute) -> bool {
        if self.0.len() >= MAX_ATTRIBUTES {
            return false;
        }
        self.0.push(attribute);
        true
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Defines the attributes a service is created with
#[derive(Debug, Clone, Default)]
pub struct AttributeSpecifier(AttributeSet);

impl AttributeSpecifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key/value definition; silently capped at
    /// [`MAX_ATTRIBUTES`] entries
    pub fn define(mut self, key: &str, value: &str) -> Self {
        self.0.push(Attribute::new(key, value));
        self
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.0
    }
}

/// Requirements an opener imposes on the attributes of an existing service
#[derive(Debug, Clone, Default)]
pub struct AttributeVerifier {
    required_values: Vec<Attribute>,
    required_keys: Vec<String>,
}

impl AttributeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The exact pair (key, value) must be present
    pub fn require(mut self, key: &str, value: &str) -> Self {
        self.required_values.push(Attribute::new(key, value));
        self
    }

    /// At least one value must be present under `key`
    pub fn require_key(mut self, key: &str) -> Self {
        self.required_keys.push(key.to_string());
        self
    }

    pub fn required_values(&self) -> &[Attribute] {
        &self.required_values
    }

    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }

    /// Check `attributes` against the requirements; returns the first
    /// unsatisfied requirement rendered for diagnostics
    pub fn verify_requirements(&self, attributes: &AttributeSet) -> Result<(), String> {
        for required in &self.required_values {
            if !attributes.contains(required.key(), required.value()) {
                return Err(format!(
                    "attribute ({}, {}) is missing",
                    required.key(),
                    required.value()
                ));
            }
        }
        for key in &self.required_keys {
            if !attributes.contains_key(key) {
                return Err(format!("attribute key {key} is missing"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specifier_preserves_definition_order() {
        let spec = AttributeSpecifier::new()
            .define("k1", "v1")
            .define("k2", "v2")
            .define("k1", "v3");
        let pairs: Vec<_> = spec
            .attributes()
            .iter()
            .map(|a| (a.key().to_string(), a.value().to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("k1".to_string(), "v1".to_string()),
                ("k2".to_string(), "v2".to_string()),
                ("k1".to_string(), "v3".to_string()),
            ]
        );
        assert_eq!(spec.attributes().key_values("k1"), vec!["v1", "v3"]);
    }

    #[test]
    fn verifier_accepts_satisfied_requirements() {
        let attributes = AttributeSpecifier::new()
            .define("owner", "fuu")
            .define("stage", "prod")
            .attributes()
            .clone();
        let verifier = AttributeVerifier::new()
            .require("owner", "fuu")
            .require_key("stage");
        assert!(verifier.verify_requirements(&attributes).is_ok());
    }

    #[test]
    fn verifier_reports_missing_key_and_value() {
        let attributes = AttributeSpecifier::new().define("k1", "v1").attributes().clone();

        let missing_key = AttributeVerifier::new().require_key("k2");
        assert!(missing_key.verify_requirements(&attributes).is_err());

        let wrong_value = AttributeVerifier::new().require("k1", "other");
        assert!(wrong_value.verify_requirements(&attributes).is_err());
    }
}
