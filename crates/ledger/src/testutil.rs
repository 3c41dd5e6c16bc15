//! Shared test helpers for code that consumes the Ledger.
//!
//! Feature-gated behind `testutil`. Enable it in `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! zerotrust-ledger = { path = "../ledger", features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    error::{LedgerError, LedgerResult},
    identity::Identity,
    store::{IdentityLedger, MemoryLedger, Transfer},
    types::IdentityId,
};

/// Failure injected into [`FlakyLedger::lookup_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Fail with [`LedgerError::Connection`].
    Connection,
    /// Fail with [`LedgerError::Timeout`].
    Timeout,
    /// Fail with [`LedgerError::Internal`].
    Internal,
}

impl InjectedFailure {
    fn to_error(self) -> LedgerError {
        match self {
            Self::Connection => LedgerError::connection("injected connection failure"),
            Self::Timeout => LedgerError::timeout(),
            Self::Internal => LedgerError::internal("injected internal failure"),
        }
    }
}

/// [`IdentityLedger`] wrapper that injects failures, delays and gates into
/// identity lookups.
///
/// All other operations delegate to the wrapped [`MemoryLedger`].
#[derive(Debug)]
pub struct FlakyLedger {
    inner: MemoryLedger,
    failure: Mutex<Option<InjectedFailure>>,
    /// Remaining lookups that fail; `u32::MAX` means "until cleared".
    failures_left: AtomicU32,
    delay: Mutex<Duration>,
    gate_enabled: AtomicBool,
    started: Arc<Notify>,
    gate: Arc<Notify>,
    lookups: AtomicU64,
}

impl FlakyLedger {
    /// Wraps `inner` with no failures configured.
    #[must_use]
    pub fn new(inner: MemoryLedger) -> Self {
        Self {
            inner,
            failure: Mutex::new(None),
            failures_left: AtomicU32::new(0),
            delay: Mutex::new(Duration::ZERO),
            gate_enabled: AtomicBool::new(false),
            started: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
            lookups: AtomicU64::new(0),
        }
    }

    /// The wrapped ledger.
    #[must_use]
    pub fn inner(&self) -> &MemoryLedger {
        &self.inner
    }

    /// Makes every lookup fail with `failure` until [`clear_failure`](Self::clear_failure).
    pub fn fail_always(&self, failure: InjectedFailure) {
        *self.failure.lock() = Some(failure);
        self.failures_left.store(u32::MAX, Ordering::SeqCst);
    }

    /// Makes the next `count` lookups fail with `failure`.
    pub fn fail_times(&self, failure: InjectedFailure, count: u32) {
        *self.failure.lock() = Some(failure);
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Stops injecting failures.
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
        self.failures_left.store(0, Ordering::SeqCst);
    }

    /// Delays every lookup by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Makes lookups signal [`started`](Self::started) and then wait on
    /// [`open_gate`](Self::open_gate) before reading.
    pub fn enable_gate(&self) {
        self.gate_enabled.store(true, Ordering::SeqCst);
    }

    /// Notified once per gated lookup that has started.
    #[must_use]
    pub fn started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }

    /// Releases one waiting gated lookup.
    pub fn open_gate(&self) {
        self.gate.notify_one();
    }

    /// Total lookups attempted, including failed ones.
    #[must_use]
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<LedgerError> {
        let failure = (*self.failure.lock())?;
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        if left != u32::MAX {
            self.failures_left.store(left - 1, Ordering::SeqCst);
        }
        Some(failure.to_error())
    }
}

#[async_trait]
impl IdentityLedger for FlakyLedger {
    async fn lookup_identity(&self, username: &str) -> LedgerResult<Option<Identity>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.gate_enabled.load(Ordering::SeqCst) {
            self.started.notify_one();
            self.gate.notified().await;
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        self.inner.lookup_identity(username).await
    }

    async fn is_sufficient_balance(&self, id: IdentityId, amount: u64) -> LedgerResult<bool> {
        self.inner.is_sufficient_balance(id, amount).await
    }

    async fn apply_transfer(
        &self,
        from: IdentityId,
        to: IdentityId,
        amount: u64,
    ) -> LedgerResult<Transfer> {
        self.inner.apply_transfer(from, to, amount).await
    }

    async fn record_login(&self, id: IdentityId, at: DateTime<Utc>) -> LedgerResult<()> {
        self.inner.record_login(id, at).await
    }
}
