//! Session identifiers

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque key identifying one user-initiated build-and-deploy request.
///
/// All per-pipeline state (subscribers, cursors, checkpoints) is partitioned
/// by this key. Identifiers are never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

/// Returned when a session identifier is empty or blank
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session identifier must not be empty")]
pub struct InvalidSessionId;

impl SessionId {
    /// Parses a session identifier, rejecting blank values
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(InvalidSessionId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidSessionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_blank() {
        assert_eq!(SessionId::parse(""), Err(InvalidSessionId));
        assert_eq!(SessionId::parse("   "), Err(InvalidSessionId));
        assert_eq!(SessionId::parse("s1").unwrap().as_str(), "s1");
    }

    #[test]
    fn test_serde_validates() {
        let id: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.to_string(), "abc");
        assert!(serde_json::from_str::<SessionId>("\"\"").is_err());
    }
}
