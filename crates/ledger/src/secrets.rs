//! The Secret Provider collaborator.
//!
//! Services read their symmetric secrets (gateway HMAC key, credential
//! signing key) by name through [`SecretProvider::get`]. Storage, rotation
//! persistence and encryption at rest belong to the provider.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::error::{LedgerError, LedgerResult};

/// Read access to named secrets.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Returns the current value of `name`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))` if the secret exists and has not expired
    /// - `Ok(None)` if it is unknown or expired
    /// - `Err(...)` if the provider is unreachable
    async fn get(&self, name: &str) -> LedgerResult<Option<Zeroizing<String>>>;
}

#[derive(Debug)]
struct SecretEntry {
    value: Zeroizing<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    rotations: u32,
}

impl SecretEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// In-memory [`SecretProvider`] with optional per-secret expiry.
///
/// Clones share the same underlying map.
///
/// # Examples
///
/// ```
/// use zerotrust_ledger::{MemorySecretProvider, SecretProvider};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let secrets = MemorySecretProvider::new();
///     secrets.set("gateway_hmac_secret", "S");
///
///     let value = secrets.get("gateway_hmac_secret").await?;
///     assert_eq!(value.as_deref().map(String::as_str), Some("S"));
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemorySecretProvider {
    secrets: Arc<RwLock<HashMap<String, SecretEntry>>>,
}

impl MemorySecretProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a secret that never expires, replacing any previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.insert(name.into(), value.into(), None);
    }

    /// Stores a secret that expires `ttl` from now.
    pub fn set_with_ttl(&self, name: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let expires_at = chrono::Duration::from_std(ttl).ok().map(|ttl| Utc::now() + ttl);
        self.insert(name.into(), value.into(), expires_at);
    }

    /// Stores a secret with an absolute expiry instant.
    pub fn set_expiring_at(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        self.insert(name.into(), value.into(), Some(expires_at));
    }

    /// Replaces the value of an existing secret, keeping its expiry policy.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if `name` was never set.
    pub fn rotate(&self, name: &str, value: impl Into<String>) -> LedgerResult<u32> {
        let mut secrets = self.secrets.write();
        let entry = secrets.get_mut(name).ok_or_else(|| LedgerError::not_found(name))?;

        let lifetime = entry.expires_at.map(|expires_at| expires_at - entry.created_at);
        let now = Utc::now();
        entry.value = Zeroizing::new(value.into());
        entry.created_at = now;
        entry.expires_at = lifetime.map(|lifetime| now + lifetime);
        entry.rotations += 1;

        tracing::info!(
            audit.action = "rotate_secret",
            audit.resource = %name,
            audit.result = "success",
            rotations = entry.rotations,
            "Secret rotated"
        );
        Ok(entry.rotations)
    }

    /// Number of times `name` has been rotated, if it exists.
    #[must_use]
    pub fn rotation_count(&self, name: &str) -> Option<u32> {
        self.secrets.read().get(name).map(|entry| entry.rotations)
    }

    fn insert(&self, name: String, value: String, expires_at: Option<DateTime<Utc>>) {
        let entry = SecretEntry {
            value: Zeroizing::new(value),
            created_at: Utc::now(),
            expires_at,
            rotations: 0,
        };
        self.secrets.write().insert(name, entry);
    }
}

#[async_trait]
impl SecretProvider for MemorySecretProvider {
    #[tracing::instrument(skip(self))]
    async fn get(&self, name: &str) -> LedgerResult<Option<Zeroizing<String>>> {
        let secrets = self.secrets.read();
        let Some(entry) = secrets.get(name) else {
            tracing::warn!(secret = %name, "Secret not found");
            return Ok(None);
        };

        if entry.is_expired(Utc::now()) {
            tracing::warn!(secret = %name, "Secret expired");
            return Ok(None);
        }

        Ok(Some(entry.value.clone()))
    }
}
