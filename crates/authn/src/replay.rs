//! Duplicate-request rejection.
//!
//! The freshness window alone lets an attacker replay a captured request
//! until its timestamp ages out. When duplicate detection is enabled, the
//! pipeline remembers every user signature it has accepted until that
//! request would have gone stale anyway, and rejects a second presentation.
//!
//! Ed25519 signatures are deterministic, so the same payload signed by the
//! same key always yields the same signature. A client that needs to repeat
//! an operation must change the payload (a new timestamp is enough).
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use zerotrust_authn::replay::{DuplicateDetector, InMemoryDuplicateDetector};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build()?.block_on(async {
//! let detector = InMemoryDuplicateDetector::new(10_000);
//! assert!(detector.check_and_mark("ab12", Duration::from_secs(60)).await.is_ok());
//! assert!(detector.check_and_mark("ab12", Duration::from_secs(60)).await.is_err());
//! # });
//! # Ok::<(), std::io::Error>(())
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{future::Cache, policy::EvictionPolicy};

use crate::error::{AuthError, Result};

/// Tracks accepted request signatures and rejects repeats.
#[async_trait]
pub trait DuplicateDetector: Send + Sync {
    /// Records `signature`, failing if it was already recorded.
    ///
    /// `expires_in` is how long the request stays fresh; the entry may be
    /// forgotten after that.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ReplayDetected`] with
    /// [`ReplayReason::Duplicate`](crate::error::ReplayReason::Duplicate) if
    /// `signature` was seen within its lifetime.
    async fn check_and_mark(&self, signature: &str, expires_in: Duration) -> Result<()>;
}

/// Stores the absolute expiry instant as the value and expires on it.
struct SignatureExpiry;

impl moka::Expiry<String, Instant> for SignatureExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Instant,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.saturating_duration_since(created_at))
    }
}

/// [`DuplicateDetector`] backed by a [`moka::future::Cache`].
///
/// Entries expire individually at the end of their request's freshness
/// lifetime. LRU eviction bounds memory if the capacity is reached first.
pub struct InMemoryDuplicateDetector {
    seen: Cache<String, Instant>,
}

impl InMemoryDuplicateDetector {
    /// Creates a detector tracking at most `max_capacity` signatures.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        let seen = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(SignatureExpiry)
            .build();
        Self { seen }
    }

    /// Approximate number of tracked signatures.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.seen.entry_count()
    }

    /// Runs pending cache maintenance so counts and evictions are current.
    #[cfg(test)]
    pub async fn sync(&self) {
        self.seen.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for InMemoryDuplicateDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDuplicateDetector")
            .field("entries", &self.seen.entry_count())
            .finish()
    }
}

#[async_trait]
impl DuplicateDetector for InMemoryDuplicateDetector {
    async fn check_and_mark(&self, signature: &str, expires_in: Duration) -> Result<()> {
        let expiration = Instant::now() + expires_in;
        let entry = self.seen.entry(signature.to_owned()).or_insert(expiration).await;

        if entry.is_fresh() {
            Ok(())
        } else {
            tracing::warn!(
                signature_prefix = %signature.get(..16).unwrap_or(signature),
                "Duplicate request signature"
            );
            Err(AuthError::duplicate_request())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ReplayReason;

    #[tokio::test]
    async fn test_first_presentation_accepted() {
        let detector = InMemoryDuplicateDetector::new(100);
        assert!(detector.check_and_mark("sig-001", Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_presentation_rejected() {
        let detector = InMemoryDuplicateDetector::new(100);
        detector.check_and_mark("sig-002", Duration::from_secs(60)).await.unwrap();

        let result = detector.check_and_mark("sig-002", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AuthError::ReplayDetected(ReplayReason::Duplicate))));
    }

    #[tokio::test]
    async fn test_different_signatures_accepted() {
        let detector = InMemoryDuplicateDetector::new(100);
        detector.check_and_mark("sig-a", Duration::from_secs(60)).await.unwrap();
        assert!(detector.check_and_mark("sig-b", Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_entry_forgotten_after_lifetime() {
        let detector = InMemoryDuplicateDetector::new(100);
        detector.check_and_mark("sig-expire", Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        detector.sync().await;

        assert!(detector.check_and_mark("sig-expire", Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_capacity_bounds_memory() {
        let detector = InMemoryDuplicateDetector::new(2);

        for i in 0..10 {
            detector.check_and_mark(&format!("sig-{i}"), Duration::from_secs(300)).await.unwrap();
        }
        detector.sync().await;

        assert!(detector.entry_count() <= 2);
    }

    #[tokio::test]
    async fn test_concurrent_presentations_accept_exactly_one() {
        let detector = Arc::new(InMemoryDuplicateDetector::new(100));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let detector = Arc::clone(&detector);
                tokio::spawn(async move {
                    detector.check_and_mark("sig-race", Duration::from_secs(60)).await.is_ok()
                })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}
