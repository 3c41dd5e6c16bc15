//! Pipeline configuration.
//!
//! [`PipelineConfig`] can be built in code through its validating builder or
//! deserialized from any serde format. Durations use `humantime` notation
//! (`"60s"`, `"5m"`). Deserialized configs are validated when handed to
//! [`VerificationPipeline`](crate::VerificationPipeline).
//!
//! ```
//! use std::time::Duration;
//! use zerotrust_authn::config::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .replay_window(Duration::from_secs(30))
//!     .duplicate_detection_capacity(50_000)
//!     .build()?;
//!
//! assert_eq!(config.replay_window(), Duration::from_secs(30));
//! assert_eq!(config.key_cache_ttl(), Duration::from_secs(300));
//! # Ok::<(), zerotrust_authn::ConfigError>(())
//! ```

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;
use zerotrust_ledger::SecretProvider;

use crate::{
    credential::DEFAULT_CREDENTIAL_TTL,
    error::{AuthError, ConfigError, Result},
    freshness::{DEFAULT_LOGIN_REPLAY_WINDOW, DEFAULT_REPLAY_WINDOW},
    padding::DEFAULT_PADDING_TARGET,
};

/// Default lifetime of resolved public keys (5 minutes).
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached public keys.
pub const DEFAULT_KEY_CACHE_CAPACITY: u64 = 10_000;

/// Default bound on one identity lookup (2 seconds).
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default secret name for the edge-to-service HMAC key.
pub const DEFAULT_GATEWAY_SECRET_NAME: &str = "gateway_hmac_secret";

/// Default secret name for the credential signing key.
pub const DEFAULT_CREDENTIAL_SECRET_NAME: &str = "jwt_secret";

/// Smallest accepted backoff.
const MIN_BACKOFF: Duration = Duration::from_millis(1);

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(50)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(1)
}

/// Retry policy for identity lookups on a key-cache miss.
///
/// Only transient ledger failures (connection loss, timeout) are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` disables retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry; doubles on each further retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub initial_backoff: Duration,

    /// Upper bound on a single backoff, before jitter.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[bon::bon]
impl RetryConfig {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `initial_backoff` is below 1ms or exceeds
    /// `max_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = default_max_retries())] max_retries: u32,
        #[builder(default = default_initial_backoff())] initial_backoff: Duration,
        #[builder(default = default_max_backoff())] max_backoff: Duration,
    ) -> std::result::Result<Self, ConfigError> {
        let config = Self { max_retries, initial_backoff, max_backoff };
        config.validate()?;
        Ok(config)
    }

    /// Checks the policy's invariants.
    ///
    /// # Errors
    ///
    /// See [`RetryConfig::new`].
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.initial_backoff < MIN_BACKOFF {
            return Err(below_minimum("retry.initial_backoff", MIN_BACKOFF, self.initial_backoff));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::Inconsistent {
                field: "retry.initial_backoff",
                reason: format!(
                    "{:?} exceeds retry.max_backoff {:?}",
                    self.initial_backoff, self.max_backoff
                ),
            });
        }
        Ok(())
    }
}

/// Settings for a [`VerificationPipeline`](crate::VerificationPipeline) and
/// its login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(with = "humantime_serde", default = "default_replay_window")]
    replay_window: Duration,

    #[serde(with = "humantime_serde", default = "default_login_replay_window")]
    login_replay_window: Duration,

    #[serde(default = "default_require_timestamp")]
    require_timestamp: bool,

    #[serde(with = "humantime_serde", default = "default_credential_ttl")]
    credential_ttl: Duration,

    #[serde(with = "humantime_serde", default = "default_key_cache_ttl")]
    key_cache_ttl: Duration,

    #[serde(default = "default_key_cache_capacity")]
    key_cache_capacity: u64,

    #[serde(with = "humantime_serde", default = "default_lookup_timeout")]
    lookup_timeout: Duration,

    #[serde(default)]
    retry: RetryConfig,

    #[serde(default = "default_padding_target")]
    padding_target: usize,

    #[serde(default)]
    duplicate_detection_capacity: Option<u64>,

    #[serde(default = "default_gateway_secret_name")]
    gateway_secret_name: String,

    #[serde(default = "default_credential_secret_name")]
    credential_secret_name: String,
}

fn default_replay_window() -> Duration {
    DEFAULT_REPLAY_WINDOW
}

fn default_login_replay_window() -> Duration {
    DEFAULT_LOGIN_REPLAY_WINDOW
}

fn default_require_timestamp() -> bool {
    true
}

fn default_credential_ttl() -> Duration {
    DEFAULT_CREDENTIAL_TTL
}

fn default_key_cache_ttl() -> Duration {
    DEFAULT_KEY_CACHE_TTL
}

fn default_key_cache_capacity() -> u64 {
    DEFAULT_KEY_CACHE_CAPACITY
}

fn default_lookup_timeout() -> Duration {
    DEFAULT_LOOKUP_TIMEOUT
}

fn default_padding_target() -> usize {
    DEFAULT_PADDING_TARGET
}

fn default_gateway_secret_name() -> String {
    DEFAULT_GATEWAY_SECRET_NAME.to_owned()
}

fn default_credential_secret_name() -> String {
    DEFAULT_CREDENTIAL_SECRET_NAME.to_owned()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            replay_window: default_replay_window(),
            login_replay_window: default_login_replay_window(),
            require_timestamp: default_require_timestamp(),
            credential_ttl: default_credential_ttl(),
            key_cache_ttl: default_key_cache_ttl(),
            key_cache_capacity: default_key_cache_capacity(),
            lookup_timeout: default_lookup_timeout(),
            retry: RetryConfig::default(),
            padding_target: default_padding_target(),
            duplicate_detection_capacity: None,
            gateway_secret_name: default_gateway_secret_name(),
            credential_secret_name: default_credential_secret_name(),
        }
    }
}

#[bon::bon]
impl PipelineConfig {
    /// Creates a configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `replay_window` - Accepted clock skew for API requests (default: 60s).
    /// * `login_replay_window` - Accepted clock skew for login (default: 300s).
    /// * `require_timestamp` - Reject payloads without `timestamp` (default: true).
    /// * `credential_ttl` - Lifetime of issued credentials (default: 1h).
    /// * `key_cache_ttl` - Lifetime of resolved public keys (default: 5m).
    /// * `key_cache_capacity` - Maximum cached public keys (default: 10 000).
    /// * `lookup_timeout` - Bound on one identity lookup, retries included (default: 2s).
    /// * `retry` - Retry policy for identity lookups.
    /// * `padding_target` - Padded payload size, enforced at the edge (default: 4096).
    /// * `duplicate_detection_capacity` - Enables duplicate-signature rejection.
    /// * `gateway_secret_name` / `credential_secret_name` - Secret Provider names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - a window, TTL or timeout is zero
    /// - `key_cache_ttl` exceeds `credential_ttl`
    /// - a capacity or `padding_target` is zero
    /// - `retry` is invalid
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        #[builder(default = DEFAULT_REPLAY_WINDOW)] replay_window: Duration,
        #[builder(default = DEFAULT_LOGIN_REPLAY_WINDOW)] login_replay_window: Duration,
        #[builder(default = true)] require_timestamp: bool,
        #[builder(default = DEFAULT_CREDENTIAL_TTL)] credential_ttl: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] key_cache_ttl: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_CAPACITY)] key_cache_capacity: u64,
        #[builder(default = DEFAULT_LOOKUP_TIMEOUT)] lookup_timeout: Duration,
        #[builder(default)] retry: RetryConfig,
        #[builder(default = DEFAULT_PADDING_TARGET)] padding_target: usize,
        duplicate_detection_capacity: Option<u64>,
        #[builder(into, default = DEFAULT_GATEWAY_SECRET_NAME)] gateway_secret_name: String,
        #[builder(into, default = DEFAULT_CREDENTIAL_SECRET_NAME)] credential_secret_name: String,
    ) -> std::result::Result<Self, ConfigError> {
        let config = Self {
            replay_window,
            login_replay_window,
            require_timestamp,
            credential_ttl,
            key_cache_ttl,
            key_cache_capacity,
            lookup_timeout,
            retry,
            padding_target,
            duplicate_detection_capacity,
            gateway_secret_name,
            credential_secret_name,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration's invariants.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::new`].
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        const ONE_SECOND: Duration = Duration::from_secs(1);

        for (field, value) in [
            ("replay_window", self.replay_window),
            ("login_replay_window", self.login_replay_window),
            ("credential_ttl", self.credential_ttl),
            ("key_cache_ttl", self.key_cache_ttl),
        ] {
            if value < ONE_SECOND {
                return Err(below_minimum(field, ONE_SECOND, value));
            }
        }

        if self.lookup_timeout < MIN_BACKOFF {
            return Err(below_minimum("lookup_timeout", MIN_BACKOFF, self.lookup_timeout));
        }

        if self.key_cache_ttl > self.credential_ttl {
            return Err(ConfigError::Inconsistent {
                field: "key_cache_ttl",
                reason: format!(
                    "{:?} exceeds credential_ttl {:?}; a rotated key would outlive the credentials bound to it",
                    self.key_cache_ttl, self.credential_ttl
                ),
            });
        }

        if self.key_cache_capacity == 0 {
            return Err(below_minimum("key_cache_capacity", 1, 0));
        }
        if self.duplicate_detection_capacity == Some(0) {
            return Err(below_minimum("duplicate_detection_capacity", 1, 0));
        }
        if self.padding_target == 0 {
            return Err(below_minimum("padding_target", 1, 0));
        }

        self.retry.validate()
    }

    /// Accepted clock skew for API requests.
    #[must_use]
    pub fn replay_window(&self) -> Duration {
        self.replay_window
    }

    /// Accepted clock skew for login requests.
    #[must_use]
    pub fn login_replay_window(&self) -> Duration {
        self.login_replay_window
    }

    /// Whether payloads without `timestamp` are rejected.
    #[must_use]
    pub fn require_timestamp(&self) -> bool {
        self.require_timestamp
    }

    /// Lifetime of issued credentials.
    #[must_use]
    pub fn credential_ttl(&self) -> Duration {
        self.credential_ttl
    }

    /// Lifetime of resolved public keys.
    #[must_use]
    pub fn key_cache_ttl(&self) -> Duration {
        self.key_cache_ttl
    }

    /// Maximum cached public keys.
    #[must_use]
    pub fn key_cache_capacity(&self) -> u64 {
        self.key_cache_capacity
    }

    /// Bound on one identity lookup, retries included.
    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Retry policy for identity lookups.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Padded payload size clients pad to and the edge enforces.
    #[must_use]
    pub fn padding_target(&self) -> usize {
        self.padding_target
    }

    /// Duplicate-signature cache size, if detection is enabled.
    #[must_use]
    pub fn duplicate_detection_capacity(&self) -> Option<u64> {
        self.duplicate_detection_capacity
    }

    /// Secret Provider name of the edge-to-service HMAC key.
    #[must_use]
    pub fn gateway_secret_name(&self) -> &str {
        &self.gateway_secret_name
    }

    /// Secret Provider name of the credential signing key.
    #[must_use]
    pub fn credential_secret_name(&self) -> &str {
        &self.credential_secret_name
    }
}

pub(crate) fn below_minimum(
    field: &'static str,
    min: impl fmt::Debug,
    value: impl fmt::Debug,
) -> ConfigError {
    ConfigError::BelowMinimum { field, min: format!("{min:?}"), value: format!("{value:?}") }
}

/// The two symmetric secrets a service holds.
///
/// The edge HMAC key and the credential key are separate trust domains and
/// must not be the same value.
pub struct PipelineSecrets {
    gateway: Zeroizing<Vec<u8>>,
    credential: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for PipelineSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSecrets").finish_non_exhaustive()
    }
}

impl PipelineSecrets {
    /// Wraps secrets that were obtained elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Inconsistent`] if both secrets are equal.
    pub fn new(
        gateway: impl AsRef<[u8]>,
        credential: impl AsRef<[u8]>,
    ) -> std::result::Result<Self, ConfigError> {
        let (gateway, credential) = (gateway.as_ref(), credential.as_ref());
        if bool::from(gateway.ct_eq(credential)) {
            return Err(ConfigError::Inconsistent {
                field: "credential_secret",
                reason: "must differ from the gateway secret".to_owned(),
            });
        }

        Ok(Self {
            gateway: Zeroizing::new(gateway.to_vec()),
            credential: Zeroizing::new(credential.to_vec()),
        })
    }

    /// Fetches both secrets from `provider` under the names in `config`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::SecretUnavailable`] if a secret is missing, expired or empty
    /// - [`AuthError::Ledger`] if the provider itself fails
    /// - [`AuthError::Config`] if both secrets hold the same value
    #[tracing::instrument(skip(provider, config))]
    pub async fn load(provider: &dyn SecretProvider, config: &PipelineConfig) -> Result<Self> {
        let gateway = fetch(provider, config.gateway_secret_name()).await?;
        let credential = fetch(provider, config.credential_secret_name()).await?;
        Ok(Self::new(gateway.as_bytes(), credential.as_bytes())?)
    }

    /// Edge-to-service HMAC key.
    #[must_use]
    pub fn gateway(&self) -> &[u8] {
        &self.gateway
    }

    /// Credential signing key.
    #[must_use]
    pub fn credential(&self) -> &[u8] {
        &self.credential
    }
}

async fn fetch(provider: &dyn SecretProvider, name: &str) -> Result<Zeroizing<String>> {
    match provider.get(name).await.map_err(AuthError::Ledger)? {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthError::secret_unavailable(name)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use zerotrust_ledger::MemorySecretProvider;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.replay_window(), Duration::from_secs(60));
        assert_eq!(config.login_replay_window(), Duration::from_secs(300));
        assert!(config.require_timestamp());
        assert_eq!(config.credential_ttl(), Duration::from_secs(3600));
        assert_eq!(config.key_cache_capacity(), 10_000);
        assert_eq!(config.lookup_timeout(), Duration::from_secs(2));
        assert_eq!(config.padding_target(), 4096);
        assert_eq!(config.duplicate_detection_capacity(), None);
        assert_eq!(config.gateway_secret_name(), "gateway_hmac_secret");
        assert_eq!(config.credential_secret_name(), "jwt_secret");
    }

    #[test]
    fn test_zero_replay_window_rejected() {
        let err = PipelineConfig::builder().replay_window(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "replay_window", .. }));
    }

    #[test]
    fn test_zero_lookup_timeout_rejected() {
        let err = PipelineConfig::builder().lookup_timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "lookup_timeout", .. }));
    }

    #[test]
    fn test_key_cache_ttl_must_not_exceed_credential_ttl() {
        let err = PipelineConfig::builder()
            .credential_ttl(Duration::from_secs(120))
            .key_cache_ttl(Duration::from_secs(300))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent { field: "key_cache_ttl", .. }));

        assert!(
            PipelineConfig::builder()
                .credential_ttl(Duration::from_secs(300))
                .key_cache_ttl(Duration::from_secs(300))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_zero_capacities_rejected() {
        assert!(PipelineConfig::builder().key_cache_capacity(0).build().is_err());
        assert!(PipelineConfig::builder().duplicate_detection_capacity(0).build().is_err());
        assert!(PipelineConfig::builder().padding_target(0).build().is_err());
    }

    #[test]
    fn test_retry_backoff_order_enforced() {
        let err = RetryConfig::builder()
            .initial_backoff(Duration::from_secs(2))
            .max_backoff(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent { field: "retry.initial_backoff", .. }));

        let retry = RetryConfig {
            max_retries: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::from_secs(1),
        };
        assert!(PipelineConfig::builder().retry(retry).build().is_err());
    }

    #[test]
    fn test_deserialize_humantime_with_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"replay_window": "30s", "key_cache_ttl": "1m", "retry": {"max_retries": 5}}"#,
        )
        .unwrap();

        assert_eq!(config.replay_window(), Duration::from_secs(30));
        assert_eq!(config.key_cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.retry().max_retries, 5);
        assert_eq!(config.retry().initial_backoff, Duration::from_millis(50));
        assert_eq!(config.login_replay_window(), Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let result = serde_json::from_str::<PipelineConfig>(r#"{"replay_windw": "30s"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let config = PipelineConfig::builder().duplicate_detection_capacity(100).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test]
    async fn test_secrets_load() {
        let provider = MemorySecretProvider::new();
        provider.set("gateway_hmac_secret", "S");
        provider.set("jwt_secret", "J");

        let secrets = PipelineSecrets::load(&provider, &PipelineConfig::default()).await.unwrap();
        assert_eq!(secrets.gateway(), b"S");
        assert_eq!(secrets.credential(), b"J");
        assert!(!format!("{secrets:?}").contains('S'));
    }

    #[tokio::test]
    async fn test_secrets_missing_or_expired() {
        let provider = MemorySecretProvider::new();
        provider.set("gateway_hmac_secret", "S");
        provider.set_expiring_at("jwt_secret", "J", chrono::Utc::now() - chrono::Duration::seconds(1));

        let err = PipelineSecrets::load(&provider, &PipelineConfig::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::SecretUnavailable { ref name } if name == "jwt_secret"));
    }

    #[test]
    fn test_secrets_must_differ() {
        let result = PipelineSecrets::new("same", "same");
        assert!(matches!(result, Err(ConfigError::Inconsistent { field: "credential_secret", .. })));
        assert!(PipelineSecrets::new("same", "same-ish").is_ok());
    }

    #[tokio::test]
    async fn test_secrets_load_rejects_shared_value() {
        let provider = MemorySecretProvider::new();
        provider.set("gateway_hmac_secret", "shared");
        provider.set("jwt_secret", "shared");

        let err = PipelineSecrets::load(&provider, &PipelineConfig::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::Config(ConfigError::Inconsistent { .. })));
        assert_eq!(err.status_code(), 500);
    }
}
