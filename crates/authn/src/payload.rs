//! The logical payload a client signs.
//!
//! A payload is an opaque JSON object. Two top-level fields carry protocol
//! meaning:
//!
//! - `token`: the credential presented with the request
//! - `timestamp`: Unix seconds at which the client built the request
//!
//! Nested fields with the same names are ordinary business data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};

/// Field holding the credential.
pub const TOKEN_FIELD: &str = "token";

/// Field holding the freshness timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A JSON object signed by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalPayload(Map<String, Value>);

impl LogicalPayload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, returning the payload.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets the `token` field.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.with(TOKEN_FIELD, token.into())
    }

    /// Sets the `timestamp` field.
    #[must_use]
    pub fn with_timestamp(self, timestamp: u64) -> Self {
        self.with(TIMESTAMP_FIELD, timestamp)
    }

    /// Inserts `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The credential string, if the payload carries one.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.0.get(TOKEN_FIELD).and_then(Value::as_str)
    }

    /// The freshness timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] if `timestamp` is present but
    /// is not a non-negative integer.
    pub fn timestamp(&self) -> Result<Option<u64>> {
        match self.0.get(TIMESTAMP_FIELD) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| AuthError::malformed_request("timestamp must be unix seconds")),
        }
    }

    /// Borrows the underlying object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the payload, returning the underlying object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for LogicalPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for LogicalPayload {
    type Error = AuthError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(AuthError::malformed_request("payload must be a JSON object")),
        }
    }
}
