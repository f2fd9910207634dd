//! Connection IDs.
//!
//! IDs are UUID v7, so they sort in accept order. They render as
//! `conn_<32 hex digits>` in logs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREFIX: &str = "conn_";

/// Identifies one accepted connection and the session built on it. The
/// outbound side of a relay reuses the inbound connection's ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn uuid(self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0.simple())
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    /// Accepts the rendered form, with or without the `conn_` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Uuid::try_parse(raw).map(Self)
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ConnectionId {
    type Error = uuid::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn rendered_with_prefix() {
        let id = ConnectionId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("conn_"));
        assert_eq!(shown.len(), "conn_".len() + 32);
    }

    #[test]
    fn parses_rendered_and_bare_forms() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string().parse::<ConnectionId>().unwrap(), id);
        assert_eq!(id.uuid().to_string().parse::<ConnectionId>().unwrap(), id);
        assert!("conn_nope".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn serializes_as_rendered_string() {
        let id: ConnectionId = "conn_0190b3c2a7e47c1a9c3f2d4e5f607182".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""conn_0190b3c2a7e47c1a9c3f2d4e5f607182""#);
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ConnectionId>(r#""garbage""#).is_err());
    }
}
