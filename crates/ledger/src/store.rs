//! The Ledger collaborator consumed by the authentication core.
//!
//! The core reads identities (and their current public keys) through
//! [`IdentityLedger::lookup_identity`] and hands verified transfers to
//! [`IdentityLedger::apply_transfer`]. Account bookkeeping beyond that lives
//! behind the trait and is not modelled here.
//!
//! # Usage
//!
//! ```no_run
//! use zerotrust_ledger::{IdentityLedger, LedgerError, LedgerResult};
//!
//! async fn current_key<L: IdentityLedger>(ledger: &L, username: &str) -> LedgerResult<String> {
//!     ledger
//!         .lookup_identity(username)
//!         .await?
//!         .map(|identity| identity.public_key)
//!         .ok_or_else(|| LedgerError::not_found(username))
//! }
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{LedgerError, LedgerResult},
    identity::{Identity, KeyType},
    types::IdentityId,
};

/// A completed balance movement between two identities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Debited identity.
    pub from: IdentityId,
    /// Credited identity.
    pub to: IdentityId,
    /// Amount moved, in the smallest currency unit.
    pub amount: u64,
    /// When the transfer was applied.
    pub applied_at: DateTime<Utc>,
}

/// Read and transfer operations the authentication core needs from the Ledger.
///
/// Implementations must be safe to share across request tasks.
#[async_trait]
pub trait IdentityLedger: Send + Sync {
    /// Looks up an identity by username.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(identity))` if the username is registered
    /// - `Ok(None)` if it is not
    /// - `Err(...)` on backend failures
    async fn lookup_identity(&self, username: &str) -> LedgerResult<Option<Identity>>;

    /// Returns whether `id` currently holds at least `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the account does not exist.
    async fn is_sufficient_balance(&self, id: IdentityId, amount: u64) -> LedgerResult<bool>;

    /// Moves `amount` from `from` to `to` as a single atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientBalance`] if `from` cannot cover the
    /// amount, or [`LedgerError::NotFound`] if either account is missing.
    async fn apply_transfer(
        &self,
        from: IdentityId,
        to: IdentityId,
        amount: u64,
    ) -> LedgerResult<Transfer>;

    /// Records a successful login.
    ///
    /// The default implementation does nothing, for ledgers that do not
    /// track login times.
    async fn record_login(&self, id: IdentityId, at: DateTime<Utc>) -> LedgerResult<()> {
        let _ = (id, at);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    next_id: i64,
    identities: HashMap<String, Identity>,
    balances: HashMap<IdentityId, u64>,
    transfers: Vec<Transfer>,
}

/// In-memory implementation of [`IdentityLedger`] for tests and development.
///
/// Clones share the same underlying state. Nothing is persisted.
///
/// # Examples
///
/// ```
/// use zerotrust_ledger::{IdentityLedger, KeyType, MemoryLedger};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ledger = MemoryLedger::new();
///     let alice = ledger.register("alice", "aa".repeat(32), KeyType::Ed25519, 1_000)?;
///     let bob = ledger.register("bob", "bb".repeat(32), KeyType::Ed25519, 0)?;
///
///     ledger.apply_transfer(alice.id, bob.id, 500).await?;
///     assert_eq!(ledger.balance_of(bob.id), Some(500));
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl MemoryLedger {
    /// Creates a new empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new identity with an opening balance.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AlreadyExists`] if the username is taken.
    pub fn register(
        &self,
        username: impl Into<String>,
        public_key: impl Into<String>,
        key_type: KeyType,
        opening_balance: u64,
    ) -> LedgerResult<Identity> {
        let username = username.into();
        let mut state = self.state.write();

        if state.identities.contains_key(&username) {
            return Err(LedgerError::already_exists(username));
        }

        state.next_id += 1;
        let identity = Identity::builder()
            .id(state.next_id)
            .username(username.clone())
            .public_key(public_key)
            .key_type(key_type)
            .build();

        state.balances.insert(identity.id, opening_balance);
        state.identities.insert(username, identity.clone());
        Ok(identity)
    }

    /// Replaces the registered public key of `username`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the username is unknown.
    pub fn rotate_public_key(
        &self,
        username: &str,
        public_key: impl Into<String>,
    ) -> LedgerResult<()> {
        let mut state = self.state.write();
        let identity =
            state.identities.get_mut(username).ok_or_else(|| LedgerError::not_found(username))?;
        identity.public_key = public_key.into();
        Ok(())
    }

    /// Returns the balance held by `id`, if the account exists.
    #[must_use]
    pub fn balance_of(&self, id: IdentityId) -> Option<u64> {
        self.state.read().balances.get(&id).copied()
    }

    /// Returns every transfer touching `id`, oldest first.
    #[must_use]
    pub fn transfers_for(&self, id: IdentityId) -> Vec<Transfer> {
        self.state.read().transfers.iter().filter(|t| t.from == id || t.to == id).cloned().collect()
    }
}

#[async_trait]
impl IdentityLedger for MemoryLedger {
    #[tracing::instrument(skip(self))]
    async fn lookup_identity(&self, username: &str) -> LedgerResult<Option<Identity>> {
        Ok(self.state.read().identities.get(username).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn is_sufficient_balance(&self, id: IdentityId, amount: u64) -> LedgerResult<bool> {
        let state = self.state.read();
        let balance =
            state.balances.get(&id).ok_or_else(|| LedgerError::not_found(id.to_string()))?;
        Ok(*balance >= amount)
    }

    #[tracing::instrument(skip(self))]
    async fn apply_transfer(
        &self,
        from: IdentityId,
        to: IdentityId,
        amount: u64,
    ) -> LedgerResult<Transfer> {
        let mut state = self.state.write();

        let available =
            *state.balances.get(&from).ok_or_else(|| LedgerError::not_found(from.to_string()))?;
        if !state.balances.contains_key(&to) {
            return Err(LedgerError::not_found(to.to_string()));
        }
        if available < amount {
            return Err(LedgerError::insufficient_balance(available, amount));
        }

        // Both accounts exist, so neither lookup below can miss.
        if let Some(balance) = state.balances.get_mut(&from) {
            *balance -= amount;
        }
        if let Some(balance) = state.balances.get_mut(&to) {
            *balance = balance.saturating_add(amount);
        }

        let transfer = Transfer { from, to, amount, applied_at: Utc::now() };
        state.transfers.push(transfer.clone());
        tracing::debug!(%from, %to, amount, "Transfer applied");
        Ok(transfer)
    }

    #[tracing::instrument(skip(self))]
    async fn record_login(&self, id: IdentityId, at: DateTime<Utc>) -> LedgerResult<()> {
        let mut state = self.state.write();
        let identity = state
            .identities
            .values_mut()
            .find(|identity| identity.id == id)
            .ok_or_else(|| LedgerError::not_found(id.to_string()))?;
        identity.last_login = Some(at);
        Ok(())
    }
}
