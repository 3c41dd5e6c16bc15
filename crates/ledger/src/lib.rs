//! Ledger-side collaborators for zerotrust services.
//!
//! The authentication core consumes, but does not design, three external
//! collaborators. This crate defines their interfaces and ships in-memory
//! implementations for tests and local development:
//!
//! | Trait | In-memory implementation | Used for |
//! |-------|--------------------------|----------|
//! | [`IdentityLedger`] | [`MemoryLedger`] | identity lookup, balance checks, transfers |
//! | [`SecretProvider`] | [`MemorySecretProvider`] | named symmetric secrets |
//! | [`AuditLogger`](audit::AuditLogger) | [`MemoryAuditLogger`](audit::MemoryAuditLogger) | audit trail |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with [`FlakyLedger`](testutil::FlakyLedger), a
//!   wrapper that injects failures and delays into identity lookups.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod identity;
pub mod secrets;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod types;

pub use error::{BoxError, LedgerError, LedgerResult};
pub use identity::{Identity, KeyType};
pub use secrets::{MemorySecretProvider, SecretProvider};
pub use store::{IdentityLedger, MemoryLedger, Transfer};
pub use types::IdentityId;
pub use zeroize::Zeroizing;
