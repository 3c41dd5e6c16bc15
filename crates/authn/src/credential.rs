//! Bearer credentials.
//!
//! A credential binds an identity to the public key it had when the
//! credential was issued. It is a compact JWS:
//! `base64url(header).base64url(claims).base64url(tag)`, where the tag is
//! HMAC-SHA256 under a service-held secret. That secret is a separate trust
//! domain from both the gateway secret and the user's key pair.
//!
//! # Example
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//! use zerotrust_authn::{clock::ManualClock, credential::CredentialAuthority};
//! use zerotrust_ledger::Identity;
//!
//! let clock = Arc::new(ManualClock::new(1_700_000_000));
//! let authority = CredentialAuthority::new(b"jwt-secret", Duration::from_secs(3600), clock.clone())?;
//!
//! let alice = Identity::builder().id(1).username("alice").public_key("ab".repeat(32)).build();
//! let credential = authority.issue(&alice)?;
//!
//! let claims = authority.verify(credential.as_str())?;
//! assert_eq!(claims.username, "alice");
//! assert_eq!(claims.exp, 1_700_003_600);
//!
//! clock.advance(3601);
//! assert!(authority.verify(credential.as_str()).is_err());
//!
//! // Nothing shorter than the key cache lifetime is issued.
//! assert!(authority.issue_with_ttl(&alice, Duration::from_secs(60)).is_err());
//! # Ok::<(), zerotrust_authn::AuthError>(())
//! ```

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;
use zerotrust_ledger::{Identity, IdentityId};

use crate::{
    clock::Clock,
    config::{DEFAULT_KEY_CACHE_TTL, PipelineConfig, below_minimum},
    error::{AuthError, ConfigError, Result},
    validation::validate_algorithm,
};

/// Default credential lifetime (1 hour).
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(3600);

/// Longest credential string accepted for decoding.
pub const MAX_CREDENTIAL_LENGTH: usize = 8 * 1024;

/// Claims carried by a credential.
///
/// ```json
/// {
///   "userId": 1,
///   "username": "alice",
///   "publicKeySnapshot": "d75a98...",
///   "iat": 1700000000,
///   "exp": 1700003600
/// }
/// ```
///
/// `publicKey` is accepted as an alias of `publicKeySnapshot` when decoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialClaims {
    /// Ledger identifier of the holder.
    pub user_id: IdentityId,
    /// Username of the holder.
    pub username: String,
    /// Hex public key registered for the holder at issuance time.
    #[serde(alias = "publicKey")]
    pub public_key_snapshot: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expires at (seconds since epoch).
    pub exp: u64,
}

/// Decoded credential header.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CredentialHeader {
    /// Algorithm name, as written by the issuer.
    pub alg: String,
    /// Token type, if present.
    #[serde(default)]
    pub typ: Option<String>,
}

/// An encoded credential.
///
/// `Debug` shows only a short prefix.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// The compact encoded form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the credential, returning the compact encoded form.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "Credential({prefix}...)")
    }
}

impl From<Credential> for String {
    fn from(credential: Credential) -> Self {
        credential.0
    }
}

/// Issues and verifies credentials under one symmetric secret.
///
/// Credentials are never issued for less than the key cache lifetime.
pub struct CredentialAuthority {
    secret: Zeroizing<Vec<u8>>,
    ttl: Duration,
    min_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CredentialAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialAuthority")
            .field("ttl", &self.ttl)
            .field("min_ttl", &self.min_ttl)
            .finish_non_exhaustive()
    }
}

impl CredentialAuthority {
    /// Creates an authority signing with `secret`, issuing credentials valid
    /// for `ttl`, against the default key cache lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `ttl` is shorter than
    /// [`DEFAULT_KEY_CACHE_TTL`].
    pub fn new(
        secret: impl AsRef<[u8]>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_floor(secret, ttl, DEFAULT_KEY_CACHE_TTL, clock)
    }

    /// Creates an authority from a validated [`PipelineConfig`]: credentials
    /// last `credential_ttl` and never less than `key_cache_ttl`.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] from [`PipelineConfig::validate`].
    pub fn from_config(
        secret: impl AsRef<[u8]>,
        config: &PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Self::with_floor(secret, config.credential_ttl(), config.key_cache_ttl(), clock)
    }

    fn with_floor(
        secret: impl AsRef<[u8]>,
        ttl: Duration,
        min_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        check_ttl(ttl, min_ttl)?;
        Ok(Self { secret: Zeroizing::new(secret.as_ref().to_vec()), ttl, min_ttl, clock })
    }

    /// Default lifetime of issued credentials.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Shortest lifetime this authority will issue.
    #[must_use]
    pub fn min_ttl(&self) -> Duration {
        self.min_ttl
    }

    /// Issues a credential for `identity` with the default lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if encoding fails.
    pub fn issue(&self, identity: &Identity) -> Result<Credential> {
        self.issue_with_ttl(identity, self.ttl)
    }

    /// Issues a credential for `identity` valid for `ttl`.
    ///
    /// `iat` is the current time and `exp = iat + ttl`. The identity's
    /// current public key is embedded as the snapshot.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Config`] if `ttl` is shorter than [`min_ttl`](Self::min_ttl)
    /// - [`AuthError::Internal`] if encoding fails
    #[tracing::instrument(skip(self, identity), fields(username = %identity.username))]
    pub fn issue_with_ttl(&self, identity: &Identity, ttl: Duration) -> Result<Credential> {
        check_ttl(ttl, self.min_ttl)?;

        let iat = self.clock.now_secs();
        let claims = CredentialClaims {
            user_id: identity.id,
            username: identity.username.clone(),
            public_key_snapshot: identity.public_key.clone(),
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| AuthError::internal(format!("failed to encode credential: {e}")))?;

        tracing::debug!(exp = claims.exp, "Credential issued");
        Ok(Credential(token))
    }

    /// Verifies `token` against this authority's secret and clock.
    ///
    /// # Errors
    ///
    /// See [`verify_credential`].
    pub fn verify(&self, token: &str) -> Result<CredentialClaims> {
        verify_credential(token, &self.secret, self.clock.now_secs())
    }
}

fn check_ttl(ttl: Duration, min_ttl: Duration) -> std::result::Result<(), ConfigError> {
    if ttl < min_ttl {
        return Err(below_minimum("credential_ttl", min_ttl, ttl));
    }
    Ok(())
}

/// Decodes the credential header without verifying anything.
///
/// # Errors
///
/// Returns [`AuthError::TokenMalformed`] if the header segment is not
/// base64url-encoded JSON with an `alg` field.
pub fn decode_credential_header(token: &str) -> Result<CredentialHeader> {
    let segment = segments(token)?[0];
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::token_malformed(format!("failed to decode header: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::token_malformed(format!("failed to parse header: {e}")))
}

/// Decodes credential claims without verifying the tag.
///
/// Only for diagnostics. Never trust the result.
///
/// # Errors
///
/// Returns [`AuthError::TokenMalformed`] if the claims segment cannot be
/// decoded.
pub fn decode_credential_claims(token: &str) -> Result<CredentialClaims> {
    let segment = segments(token)?[1];
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::token_malformed(format!("failed to decode claims: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::token_malformed(format!("failed to parse claims: {e}")))
}

/// Verifies a credential.
///
/// 1. The header algorithm must be `HS256` (see
///    [`validate_algorithm`]).
/// 2. The tag is recomputed over `header.claims` with `secret` and compared
///    in constant time.
/// 3. The credential is expired if `exp < now`.
///
/// # Errors
///
/// - [`AuthError::TokenMalformed`] for structural problems
/// - [`AuthError::UnsupportedAlgorithm`] for any algorithm other than `HS256`
/// - [`AuthError::InvalidSignature`] if the tag does not match
/// - [`AuthError::TokenExpired`] if `exp < now`
pub fn verify_credential(token: &str, secret: &[u8], now: u64) -> Result<CredentialClaims> {
    let header = decode_credential_header(token)?;
    validate_algorithm(&header.alg)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.required_spec_claims.clear();

    let claims =
        jsonwebtoken::decode::<CredentialClaims>(token, &DecodingKey::from_secret(secret), &validation)?
            .claims;

    if claims.exp < now {
        return Err(AuthError::token_expired());
    }

    Ok(claims)
}

fn segments(token: &str) -> Result<[&str; 3]> {
    if token.len() > MAX_CREDENTIAL_LENGTH {
        return Err(AuthError::token_malformed("credential too long"));
    }
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(claims), Some(tag), None) => Ok([header, claims, tag]),
        _ => Err(AuthError::token_malformed("credential must have 3 parts separated by dots")),
    }
}

/// Revocation hook consulted after a credential verifies.
///
/// Expiry is the only built-in deactivation path; services that need early
/// revocation plug an implementation into the pipeline.
#[async_trait]
pub trait RevocationCheck: Send + Sync {
    /// Returns `true` if the credential must be refused.
    async fn is_revoked(&self, claims: &CredentialClaims) -> Result<bool>;
}

/// In-memory revocation: refuses every credential for a username issued at
/// or before a cutoff.
#[derive(Debug, Default, Clone)]
pub struct MemoryRevocationList {
    cutoffs: Arc<RwLock<HashMap<String, u64>>>,
}

impl MemoryRevocationList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revokes all credentials for `username` issued at or before `issued_at_or_before`.
    pub fn revoke_issued_before(&self, username: impl Into<String>, issued_at_or_before: u64) {
        let mut cutoffs = self.cutoffs.write();
        let cutoff = cutoffs.entry(username.into()).or_insert(issued_at_or_before);
        *cutoff = (*cutoff).max(issued_at_or_before);
    }
}

#[async_trait]
impl RevocationCheck for MemoryRevocationList {
    async fn is_revoked(&self, claims: &CredentialClaims) -> Result<bool> {
        Ok(self.cutoffs.read().get(&claims.username).is_some_and(|cutoff| claims.iat <= *cutoff))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    const NOW: u64 = 1_700_000_000;
    const SECRET: &[u8] = b"credential-secret";

    fn alice() -> Identity {
        Identity::builder().id(7).username("alice").public_key("ab".repeat(32)).build()
    }

    fn authority() -> (CredentialAuthority, ManualClock) {
        let clock = ManualClock::new(NOW);
        let authority =
            CredentialAuthority::new(SECRET, DEFAULT_CREDENTIAL_TTL, Arc::new(clock.clone())).unwrap();
        (authority, clock)
    }

    fn craft(header: &serde_json::Value, claims: &serde_json::Value, tag: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap()),
            URL_SAFE_NO_PAD.encode(tag)
        )
    }

    #[test]
    fn test_issue_embeds_snapshot_and_times() {
        let (authority, _) = authority();
        let credential = authority.issue(&alice()).unwrap();
        let claims = authority.verify(credential.as_str()).unwrap();

        assert_eq!(claims.user_id, IdentityId(7));
        assert_eq!(claims.public_key_snapshot, "ab".repeat(32));
        assert_eq!(claims.iat, NOW);
        assert_eq!(claims.exp, NOW + 3600);
    }

    #[test]
    fn test_wire_format() {
        let (authority, _) = authority();
        let credential = authority.issue(&alice()).unwrap();

        let header = decode_credential_header(credential.as_str()).unwrap();
        assert_eq!(header.alg, "HS256");
        assert_eq!(header.typ.as_deref(), Some("JWT"));

        let claims_segment = credential.as_str().split('.').nth(1).unwrap();
        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_segment).unwrap()).unwrap();
        assert_eq!(claims["userId"], json!(7));
        assert_eq!(claims["publicKeySnapshot"], json!("ab".repeat(32)));
    }

    #[test]
    fn test_expiry_boundary() {
        let (authority, clock) = authority();
        let credential = authority.issue_with_ttl(&alice(), DEFAULT_KEY_CACHE_TTL).unwrap();

        clock.advance(DEFAULT_KEY_CACHE_TTL.as_secs());
        assert!(authority.verify(credential.as_str()).is_ok(), "exp == now is still valid");

        clock.advance(1);
        assert!(matches!(authority.verify(credential.as_str()), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_ttl_below_key_cache_ttl_not_issued() {
        let (authority, _) = authority();
        let result = authority.issue_with_ttl(&alice(), Duration::from_secs(10));
        assert!(matches!(
            result,
            Err(AuthError::Config(ConfigError::BelowMinimum { field: "credential_ttl", .. }))
        ));
    }

    #[test]
    fn test_new_rejects_ttl_below_key_cache_ttl() {
        let clock = Arc::new(ManualClock::new(NOW));
        let result = CredentialAuthority::new(SECRET, Duration::from_secs(60), clock);
        assert!(matches!(result, Err(ConfigError::BelowMinimum { field: "credential_ttl", .. })));
    }

    #[test]
    fn test_from_config_uses_configured_lifetimes() {
        let config = PipelineConfig::builder()
            .credential_ttl(Duration::from_secs(900))
            .key_cache_ttl(Duration::from_secs(120))
            .build()
            .unwrap();
        let authority =
            CredentialAuthority::from_config(SECRET, &config, Arc::new(ManualClock::new(NOW))).unwrap();

        assert_eq!(authority.ttl(), Duration::from_secs(900));
        assert_eq!(authority.min_ttl(), Duration::from_secs(120));
        assert!(authority.issue_with_ttl(&alice(), Duration::from_secs(120)).is_ok());
        assert!(authority.issue_with_ttl(&alice(), Duration::from_secs(119)).is_err());
    }

    #[test]
    fn test_from_config_rejects_cache_outliving_credentials() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"credential_ttl": "1m", "key_cache_ttl": "5m"}"#).unwrap();
        let result = CredentialAuthority::from_config(SECRET, &config, Arc::new(ManualClock::new(NOW)));
        assert!(matches!(result, Err(ConfigError::Inconsistent { field: "key_cache_ttl", .. })));
    }

    #[test]
    fn test_wrong_secret_is_invalid_signature() {
        let (authority, _) = authority();
        let credential = authority.issue(&alice()).unwrap();

        let result = verify_credential(credential.as_str(), b"other-secret", NOW);
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_claims_is_invalid_signature() {
        let (authority, _) = authority();
        let credential = authority.issue(&alice()).unwrap();
        let parts: Vec<&str> = credential.as_str().split('.').collect();

        let forged_claims = json!({
            "userId": 1,
            "username": "admin",
            "publicKeySnapshot": "ab".repeat(32),
            "iat": NOW,
            "exp": NOW + 3600,
        });
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap()),
            parts[2]
        );

        assert!(matches!(verify_credential(&forged, SECRET, NOW), Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_alg_none_rejected() {
        let token = craft(
            &json!({"alg": "none", "typ": "JWT"}),
            &json!({"userId": 1, "username": "a", "publicKeySnapshot": "00", "iat": NOW, "exp": NOW + 60}),
            b"",
        );
        assert!(matches!(
            verify_credential(&token, SECRET, NOW),
            Err(AuthError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_legacy_public_key_alias_accepted() {
        let claims = json!({
            "userId": 1,
            "username": "alice",
            "publicKey": "cd".repeat(32),
            "iat": NOW,
            "exp": NOW + 60,
        });
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        let verified = verify_credential(&token, SECRET, NOW).unwrap();
        assert_eq!(verified.public_key_snapshot, "cd".repeat(32));
    }

    #[test]
    fn test_missing_claim_is_malformed() {
        let claims = json!({"username": "alice", "iat": NOW, "exp": NOW + 60});
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert!(matches!(verify_credential(&token, SECRET, NOW), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_oversized_credential_rejected() {
        let token = "a".repeat(MAX_CREDENTIAL_LENGTH + 1);
        assert!(matches!(verify_credential(&token, SECRET, NOW), Err(AuthError::TokenMalformed(_))));
    }

    #[test]
    fn test_debug_does_not_print_full_token() {
        let (authority, _) = authority();
        let credential = authority.issue(&alice()).unwrap();
        let debug = format!("{credential:?}");
        assert!(debug.len() < credential.as_str().len());
    }

    #[tokio::test]
    async fn test_revocation_list_cutoff() {
        let list = MemoryRevocationList::new();
        let (authority, clock) = authority();
        let old = authority.verify(authority.issue(&alice()).unwrap().as_str()).unwrap();

        list.revoke_issued_before("alice", NOW);
        clock.advance(1);
        let fresh = authority.verify(authority.issue(&alice()).unwrap().as_str()).unwrap();

        assert!(list.is_revoked(&old).await.unwrap());
        assert!(!list.is_revoked(&fresh).await.unwrap());
    }

    /// Known-bad credential strings must never panic.
    mod fuzz_regressions {
        use super::*;

        fn exercise(token: &str) {
            let _ = decode_credential_header(token);
            let _ = decode_credential_claims(token);
            let _ = verify_credential(token, SECRET, NOW);
        }

        #[test]
        fn empty_input_no_panic() {
            exercise("");
            assert!(decode_credential_header("").is_err());
        }

        #[test]
        fn dots_only_no_panic() {
            exercise("..");
            exercise("...");
        }

        #[test]
        fn invalid_base64_no_panic() {
            exercise("!!!.@@@.###");
        }

        #[test]
        fn non_json_segments_no_panic() {
            let garbage = URL_SAFE_NO_PAD.encode(b"\xff\xfe\x00");
            exercise(&format!("{garbage}.{garbage}.{garbage}"));
        }

        #[test]
        fn huge_numbers_no_panic() {
            exercise(&craft(
                &json!({"alg": "HS256"}),
                &json!({"userId": 1, "username": "a", "publicKeySnapshot": "", "iat": u64::MAX, "exp": u64::MAX}),
                &[0u8; 32],
            ));
        }

        #[test]
        fn null_bytes_no_panic() {
            exercise("\0.\0.\0");
        }
    }
}
