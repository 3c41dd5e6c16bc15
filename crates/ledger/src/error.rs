//! Ledger error types and result alias.
//!
//! Every collaborator in this crate ([`IdentityLedger`](crate::IdentityLedger),
//! [`SecretProvider`](crate::SecretProvider)) maps its internal failures onto
//! [`LedgerError`] so that callers can classify them uniformly.
//!
//! # Example
//!
//! ```
//! use zerotrust_ledger::{LedgerError, LedgerResult};
//!
//! fn lookup(username: &str) -> LedgerResult<i64> {
//!     Err(LedgerError::not_found(username))
//! }
//!
//! assert!(lookup("mallory").is_err());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while talking to the Ledger or the Secret Provider.
///
/// Errors preserve their source chain via `#[source]`.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The requested record does not exist.
    #[error("Not found: {key}")]
    NotFound {
        /// The key (username, secret name, account) that was not found.
        key: String,
    },

    /// A record with the same key already exists.
    #[error("Already exists: {key}")]
    AlreadyExists {
        /// The conflicting key.
        key: String,
    },

    /// The source account cannot cover a transfer.
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance currently held by the account.
        available: u64,
        /// Amount the caller attempted to move.
        requested: u64,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl LedgerError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `AlreadyExists` error for the given key.
    #[must_use]
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }

    /// Creates a new `InsufficientBalance` error.
    #[must_use]
    pub fn insufficient_balance(available: u64, requested: u64) -> Self {
        Self::InsufficientBalance { available, requested }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` for failures that may succeed when retried.
    ///
    /// Only connection failures and timeouts qualify. A missing record or a
    /// business-rule rejection will not change on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}
