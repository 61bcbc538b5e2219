//! Pull cursor.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque marker of how far the last successful pull reached.
///
/// Remotes usually hand out millisecond timestamps, but any non-empty token
/// is accepted. The cursor is persisted as a string in the local key-value
/// store and echoed back on the next pull.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncCursor(String);

impl SyncCursor {
    /// Creates a cursor from an opaque token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Creates a cursor from a numeric timestamp.
    pub fn timestamp(millis: i64) -> Self {
        Self(millis.to_string())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interprets the cursor as a numeric timestamp, if it is one.
    pub fn as_timestamp(&self) -> Option<i64> {
        self.0.parse().ok()
    }

    /// Checks that the cursor can be persisted and sent back to the remote.
    ///
    /// Empty tokens are rejected, as are numeric timestamps that are not
    /// strictly positive.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.0.trim().is_empty() {
            return Err(ProtocolError::invalid_cursor(
                &self.0,
                "cursor must be a non-empty token",
            ));
        }
        if let Some(ts) = self.as_timestamp() {
            if ts <= 0 {
                return Err(ProtocolError::invalid_cursor(
                    &self.0,
                    "timestamp must be a non-zero positive number",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for SyncCursor {
    fn from(millis: i64) -> Self {
        Self::timestamp(millis)
    }
}

impl From<&str> for SyncCursor {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for SyncCursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl Serialize for SyncCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_timestamp() {
            Some(ts) => serializer.serialize_i64(ts),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for SyncCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(i64),
            Text(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Number(ts) => Self::timestamp(ts),
            Wire::Text(token) => Self(token),
        })
    }
}
