//! Ledger-backed public-key resolver.
//!
//! [`PublicKeyResolver`] puts a TTL cache in front of the Ledger so that
//! verifying a request does not cost a Ledger round-trip.
//!
//! ```text
//! request → claimed username
//!         → check cache
//!         → miss? lookup_identity (bounded timeout, retry on transient errors)
//!         → cache { user_id, public_key, key_type }
//! ```
//!
//! # Staleness
//!
//! A key rotated in the Ledger is picked up when its cache entry expires
//! (default 300s) or is invalidated explicitly. Credentials bound to the old
//! key keep failing `KeyRotated` from that point on, which is why the cache
//! TTL must not exceed the credential TTL.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use fail::fail_point;
use moka::future::Cache;
use zerotrust_ledger::{
    IdentityId, IdentityLedger, KeyType, LedgerError,
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger, identity_resource},
};

use crate::{
    config::{
        DEFAULT_KEY_CACHE_CAPACITY, DEFAULT_KEY_CACHE_TTL, DEFAULT_LOOKUP_TIMEOUT, PipelineConfig,
        RetryConfig,
    },
    error::{AuthError, Result},
    retry::with_retry,
};

/// Actor recorded on audit events the resolver emits.
const AUDIT_ACTOR: &str = "public_key_resolver";

/// A resolved public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyCacheEntry {
    /// Ledger identifier of the key holder.
    pub user_id: IdentityId,
    /// Username the key was resolved for.
    pub username: String,
    /// Hex public key.
    pub public_key: String,
    /// Scheme the key belongs to.
    pub key_type: KeyType,
    /// When the entry was fetched from the Ledger.
    pub cached_at: DateTime<Utc>,
}

/// Resolves usernames to their current public key.
///
/// # Invalidation
///
/// [`invalidate`](Self::invalidate) and [`clear_all`](Self::clear_all) bump a
/// generation counter. A lookup that was already in flight compares the
/// counter before caching its result and drops the result if it changed, so
/// an invalidation is never undone by a slow read.
pub struct PublicKeyResolver {
    cache: Cache<String, Arc<PublicKeyCacheEntry>>,
    ledger: Arc<dyn IdentityLedger>,
    audit: Arc<dyn AuditLogger>,
    lookup_timeout: Duration,
    retry: RetryConfig,
    invalidation_gen: Arc<AtomicU64>,
}

impl std::fmt::Debug for PublicKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyResolver")
            .field("entries", &self.cache.entry_count())
            .field("lookup_timeout", &self.lookup_timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl PublicKeyResolver {
    /// Creates a resolver over `ledger`.
    ///
    /// # Optional Fields
    ///
    /// * `ttl` - Lifetime of a cached key (default: 300s).
    /// * `capacity` - Maximum cached keys (default: 10 000).
    /// * `lookup_timeout` - Bound on a cache-miss lookup, retries included (default: 2s).
    /// * `retry` - Retry policy for transient Ledger failures.
    /// * `audit` - Receives invalidation events (default: [`TracingAuditLogger`]).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    /// use zerotrust_authn::key_resolver::PublicKeyResolver;
    /// use zerotrust_ledger::{KeyType, MemoryLedger};
    ///
    /// # tokio::runtime::Builder::new_current_thread().enable_all().build()?.block_on(async {
    /// let ledger = MemoryLedger::new();
    /// ledger.register("alice", "ab".repeat(32), KeyType::Ed25519, 0)?;
    ///
    /// let resolver = PublicKeyResolver::builder()
    ///     .ledger(Arc::new(ledger))
    ///     .ttl(Duration::from_secs(60))
    ///     .build();
    ///
    /// let entry = resolver.resolve("alice").await?;
    /// assert_eq!(entry.public_key, "ab".repeat(32));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # })?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    #[builder]
    pub fn new(
        ledger: Arc<dyn IdentityLedger>,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] ttl: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_CAPACITY)] capacity: u64,
        #[builder(default = DEFAULT_LOOKUP_TIMEOUT)] lookup_timeout: Duration,
        #[builder(default)] retry: RetryConfig,
        audit: Option<Arc<dyn AuditLogger>>,
    ) -> Self {
        Self {
            cache: Cache::builder().time_to_live(ttl).max_capacity(capacity).build(),
            ledger,
            audit: audit.unwrap_or_else(|| Arc::new(TracingAuditLogger)),
            lookup_timeout,
            retry,
            invalidation_gen: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a resolver using the cache and lookup settings in `config`.
    #[must_use]
    pub fn from_config(
        ledger: Arc<dyn IdentityLedger>,
        audit: Arc<dyn AuditLogger>,
        config: &PipelineConfig,
    ) -> Self {
        Self::builder()
            .ledger(ledger)
            .ttl(config.key_cache_ttl())
            .capacity(config.key_cache_capacity())
            .lookup_timeout(config.lookup_timeout())
            .retry(config.retry().clone())
            .audit(audit)
            .build()
    }

    /// Returns the current public key of `username`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::IdentityNotFound`] if the Ledger has no such identity
    /// - [`AuthError::ResolverUnavailable`] if the lookup timed out or the
    ///   Ledger failed (after retrying transient failures)
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, username: &str) -> Result<Arc<PublicKeyCacheEntry>> {
        if let Some(entry) = self.cache.get(username).await {
            tracing::debug!(cache = "hit", "public key resolved");
            return Ok(entry);
        }
        tracing::debug!(cache = "miss", "public key resolved");

        let gen_before = self.invalidation_gen.load(Ordering::Acquire);

        fail_point!("resolver-before-ledger-lookup", |_| {
            Err(AuthError::resolver_unavailable(LedgerError::internal(
                "injected failure before ledger lookup",
            )))
        });

        let lookup = tokio::time::timeout(
            self.lookup_timeout,
            with_retry(&self.retry, "lookup_identity", || self.ledger.lookup_identity(username)),
        )
        .await;

        let identity = match lookup {
            Ok(Ok(Some(identity))) => identity,
            Ok(Ok(None)) => return Err(AuthError::identity_not_found(username)),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "identity lookup failed");
                return Err(AuthError::resolver_unavailable(err));
            },
            Err(_elapsed) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(self.lookup_timeout.as_millis()).unwrap_or(u64::MAX),
                    "identity lookup timed out"
                );
                return Err(AuthError::resolver_unavailable(LedgerError::timeout()));
            },
        };

        let entry = Arc::new(PublicKeyCacheEntry {
            user_id: identity.id,
            username: identity.username,
            public_key: identity.public_key,
            key_type: identity.key_type,
            cached_at: Utc::now(),
        });

        if self.invalidation_gen.load(Ordering::Acquire) != gen_before {
            tracing::debug!("discarding lookup result: invalidation occurred during lookup");
            return Ok(entry);
        }

        self.cache.insert(username.to_owned(), Arc::clone(&entry)).await;
        Ok(entry)
    }

    /// Drops the cached key of `username`.
    ///
    /// Call this when a key is known to have been rotated. The next
    /// [`resolve`](Self::resolve) reads the Ledger.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, username: &str) {
        self.invalidation_gen.fetch_add(1, Ordering::Release);
        self.cache.invalidate(username).await;

        let event = AuditEvent::builder()
            .actor(AUDIT_ACTOR)
            .action(AuditAction::InvalidateKeyCache)
            .resource(identity_resource(username))
            .result(AuditResult::Success)
            .build();
        self.audit.log(&event).await;
    }

    /// Drops every cached key.
    #[tracing::instrument(skip(self))]
    pub async fn clear_all(&self) {
        let evicted = self.cache.entry_count();
        self.invalidation_gen.fetch_add(1, Ordering::Release);
        self.cache.invalidate_all();

        let event = AuditEvent::builder()
            .actor(AUDIT_ACTOR)
            .action(AuditAction::ClearKeyCache)
            .resource("all_public_keys")
            .result(AuditResult::Success)
            .metadata(HashMap::from([("evicted".to_owned(), evicted.to_string())]))
            .build();
        self.audit.log(&event).await;
    }

    /// Number of cached keys.
    ///
    /// Eventually consistent. Tests should call `sync` first.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending cache maintenance so counts are current.
    #[cfg(test)]
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}
