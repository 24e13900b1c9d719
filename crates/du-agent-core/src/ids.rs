//! Update identifiers.
//!
//! An update is identified by a `provider/name/version` triple, and each piece
//! of update content declares an update type of the form `vendor/name:version`
//! which selects the handler that processes it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    /// The update type has no `:` version separator.
    #[error("update type '{0}' has no version")]
    MissingVersion(String),

    /// The update type version is not a non-negative integer.
    #[error("update type '{0}' has an invalid version")]
    InvalidVersion(String),

    /// The update type name part is empty.
    #[error("update type '{0}' has an empty name")]
    EmptyName(String),
}

/// The identity of an update as declared in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct UpdateId {
    /// Update provider, e.g. `contoso`.
    pub provider: String,
    /// Update name.
    pub name: String,
    /// Update version.
    pub version: String,
}

impl UpdateId {
    /// Create a new update id.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.provider, self.name, self.version)
    }
}

/// A handler selector of the form `vendor/name:version`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UpdateType {
    name: String,
    version: u32,
}

impl UpdateType {
    /// The `vendor/name` part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The contract version part.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }
}

impl FromStr for UpdateType {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .rsplit_once(':')
            .ok_or_else(|| IdError::MissingVersion(s.to_string()))?;
        if name.is_empty() {
            return Err(IdError::EmptyName(s.to_string()));
        }
        let version = version
            .parse::<u32>()
            .map_err(|_| IdError::InvalidVersion(s.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            version,
        })
    }
}

impl fmt::Debug for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateType({self})")
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl TryFrom<String> for UpdateType {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UpdateType> for String {
    fn from(update_type: UpdateType) -> Self {
        update_type.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_update_type() {
        let t: UpdateType = "microsoft/swupdate:2".parse().unwrap();
        assert_eq!(t.name(), "microsoft/swupdate");
        assert_eq!(t.version(), 2);
        assert_eq!(t.to_string(), "microsoft/swupdate:2");
    }

    #[test]
    fn parse_update_type_errors() {
        assert_eq!(
            "microsoft/apt".parse::<UpdateType>(),
            Err(IdError::MissingVersion("microsoft/apt".to_string()))
        );
        assert!(matches!(
            "microsoft/apt:x".parse::<UpdateType>(),
            Err(IdError::InvalidVersion(_))
        ));
        assert!(matches!(
            ":1".parse::<UpdateType>(),
            Err(IdError::EmptyName(_))
        ));
    }

    #[test]
    fn update_type_serde_as_string() {
        let t: UpdateType = serde_json::from_str("\"microsoft/steps:1\"").unwrap();
        assert_eq!(t.version(), 1);
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"microsoft/steps:1\"");
    }

    #[test]
    fn update_id_display() {
        let id = UpdateId::new("contoso", "virtual-vacuum", "1.0");
        assert_eq!(id.to_string(), "contoso/virtual-vacuum:1.0");
    }
}
