/*!
 * Service Name
 * Bounded UTF-8 identifier of a service
 */

use crate::core::limits::MAX_SERVICE_NAME_LENGTH;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Violations of the service name contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceNameError {
    #[error("service names must not be empty")]
    Empty,

    #[error("service name exceeds the maximum length of {MAX_SERVICE_NAME_LENGTH} bytes")]
    TooLong,

    #[error("service names must not contain path separators")]
    ContainsPathSeparator,
}

/// The name under which processes rendezvous on a service.
///
/// At most [`MAX_SERVICE_NAME_LENGTH`] bytes, non-empty, free of path
/// separators so it can participate in filesystem-safe identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ServiceName {
    value: String,
}

impl ServiceName {
    pub fn new(value: &str) -> Result<Self, ServiceNameError> {
        if value.is_empty() {
            return Err(ServiceNameError::Empty);
        }
        if value.len() > MAX_SERVICE_NAME_LENGTH {
            return Err(ServiceNameError::TooLong);
        }
        if value.contains('/') || value.contains('\\') {
            return Err(ServiceNameError::ContainsPathSeparator);
        }
        Ok(Self {
            value: value.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = ServiceNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for ServiceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::new(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_names() {
        assert!(ServiceName::new("My/Funk/Service").is_err());
        assert!(ServiceName::new("my-funk-service").is_ok());
        assert_eq!(ServiceName::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn rejects_out_of_contract_names() {
        assert_eq!(ServiceName::new("").unwrap_err(), ServiceNameError::Empty);
        let long = "x".repeat(MAX_SERVICE_NAME_LENGTH + 1);
        assert_eq!(ServiceName::new(&long).unwrap_err(), ServiceNameError::TooLong);
        assert_eq!(
            ServiceName::new("a\\b").unwrap_err(),
            ServiceNameError::ContainsPathSeparator
        );
    }

    #[test]
    fn deserialization_enforces_the_contract() {
        let ok: Result<ServiceName, _> = bincode::deserialize(&bincode::serialize("fine").unwrap());
        assert!(ok.is_ok());
        let bad: Result<ServiceName, _> = bincode::deserialize(&bincode::serialize("a/b").unwrap());
        assert!(bad.is_err());
    }
}
