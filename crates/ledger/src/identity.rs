//! Identity records held by the Ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::IdentityId;

/// Signature scheme tag recorded alongside a registered public key.
///
/// Verifiers select the scheme from this tag and never from the shape of
/// the key material.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum KeyType {
    /// Ed25519 (RFC 8032), 32-byte public keys, 64-byte signatures.
    #[default]
    Ed25519,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// An end user known to the Ledger.
///
/// Only `last_login` and the registered key (`public_key`, `key_type`)
/// change after creation.
///
/// # Example
///
/// ```
/// use zerotrust_ledger::{Identity, KeyType};
///
/// let alice = Identity::builder()
///     .id(1)
///     .username("alice")
///     .public_key("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a")
///     .build();
///
/// assert_eq!(alice.key_type, KeyType::Ed25519);
/// assert!(alice.last_login.is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct Identity {
    /// Ledger-assigned identifier.
    #[builder(into)]
    pub id: IdentityId,

    /// Unique login name.
    #[builder(into)]
    pub username: String,

    /// Current public verification key, hex-encoded.
    #[builder(into)]
    pub public_key: String,

    /// Scheme the public key belongs to.
    #[builder(default)]
    #[serde(default)]
    pub key_type: KeyType,

    /// When the identity was registered.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    /// Most recent successful login, if any.
    pub last_login: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_wire_name() {
        assert_eq!(serde_json::to_string(&KeyType::Ed25519).unwrap(), "\"ed25519\"");
        assert_eq!(KeyType::Ed25519.to_string(), "ed25519");
    }

    #[test]
    fn test_identity_rejects_unknown_fields() {
        let json = r#"{
            "id": 1,
            "username": "alice",
            "public_key": "00",
            "created_at": "2024-01-01T00:00:00Z",
            "last_login": null,
            "balance": 10
        }"#;
        assert!(serde_json::from_str::<Identity>(json).is_err());
    }

    #[test]
    fn test_identity_key_type_defaults_when_absent() {
        let json = r#"{
            "id": 1,
            "username": "alice",
            "public_key": "00",
            "created_at": "2024-01-01T00:00:00Z",
            "last_login": null
        }"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.key_type, KeyType::Ed25519);
        assert_eq!(identity.id, IdentityId(1));
    }
}
