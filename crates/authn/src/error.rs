//! Authentication error types.
//!
//! [`AuthError`] is the detailed, internal reason a request or credential was
//! rejected. [`VerificationFailure`] pairs it with the pipeline
//! [`VerificationLayer`] that rejected it, and [`ErrorResponse`] is the coarse
//! form that is safe to return to callers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zerotrust_ledger::LedgerError;

/// Authentication and verification errors.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// A required field is missing or has the wrong shape.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The gateway envelope tag did not verify.
    #[error("Gateway authentication failed")]
    GatewayAuthFailed,

    /// Credential `exp` is in the past.
    #[error("Token expired")]
    TokenExpired,

    /// Credential cannot be decoded.
    #[error("Malformed token: {0}")]
    TokenMalformed(String),

    /// Credential integrity tag did not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Credential was revoked before its expiry.
    #[error("Credential revoked")]
    CredentialRevoked,

    /// Credential header names an algorithm that is not accepted.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Request timestamp is outside the replay window, or the request was
    /// already accepted once.
    #[error("Replay detected: {0}")]
    ReplayDetected(ReplayReason),

    /// The identity's registered key no longer matches the credential's
    /// key snapshot.
    #[error("Public key rotated for identity: {username}")]
    KeyRotated {
        /// Identity whose key changed.
        username: String,
    },

    /// The holder-of-key signature did not verify.
    #[error("Invalid user signature")]
    InvalidUserSignature,

    /// The Ledger has no identity with this username.
    #[error("Identity not found: {username}")]
    IdentityNotFound {
        /// Username that was looked up.
        username: String,
    },

    /// The public-key lookup timed out or the Ledger was unreachable.
    ///
    /// This is the only retryable verification outcome.
    #[error("Public key resolver unavailable: {0}")]
    ResolverUnavailable(
        /// The underlying ledger failure.
        #[source]
        LedgerError,
    ),

    /// Public key material could not be decoded.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Private key material could not be decoded.
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// A named secret is missing or expired in the Secret Provider.
    #[error("Secret unavailable: {name}")]
    SecretUnavailable {
        /// Name the secret was requested under.
        name: String,
    },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration was rejected.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A Ledger or Secret Provider call failed outside the resolver path.
    #[error("Ledger error: {0}")]
    Ledger(
        /// The underlying ledger failure.
        #[source]
        LedgerError,
    ),

    /// Unexpected internal fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a request was classified as a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplayReason {
    /// Timestamp differs from the verifier's clock by more than the window.
    Stale {
        /// Absolute distance between the timestamp and now, in seconds.
        skew_secs: u64,
        /// Configured window, in seconds.
        window_secs: u64,
    },
    /// The exact signed request was already accepted inside its window.
    Duplicate,
}

impl fmt::Display for ReplayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale { skew_secs, window_secs } => {
                write!(f, "timestamp skew {skew_secs}s exceeds window {window_secs}s")
            },
            Self::Duplicate => write!(f, "request already accepted"),
        }
    }
}

impl AuthError {
    /// Creates a new `MalformedRequest` error.
    #[must_use]
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    /// Creates a new `TokenMalformed` error.
    #[must_use]
    pub fn token_malformed(message: impl Into<String>) -> Self {
        Self::TokenMalformed(message.into())
    }

    /// Creates a new `TokenExpired` error.
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a `ReplayDetected` error for a timestamp outside the window.
    #[must_use]
    pub fn stale_timestamp(skew_secs: u64, window_secs: u64) -> Self {
        Self::ReplayDetected(ReplayReason::Stale { skew_secs, window_secs })
    }

    /// Creates a `ReplayDetected` error for a request seen before.
    #[must_use]
    pub fn duplicate_request() -> Self {
        Self::ReplayDetected(ReplayReason::Duplicate)
    }

    /// Creates a new `KeyRotated` error.
    #[must_use]
    pub fn key_rotated(username: impl Into<String>) -> Self {
        Self::KeyRotated { username: username.into() }
    }

    /// Creates a new `IdentityNotFound` error.
    #[must_use]
    pub fn identity_not_found(username: impl Into<String>) -> Self {
        Self::IdentityNotFound { username: username.into() }
    }

    /// Creates a new `ResolverUnavailable` error.
    #[must_use]
    pub fn resolver_unavailable(source: LedgerError) -> Self {
        Self::ResolverUnavailable(source)
    }

    /// Creates a new `SecretUnavailable` error.
    #[must_use]
    pub fn secret_unavailable(name: impl Into<String>) -> Self {
        Self::SecretUnavailable { name: name.into() }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` only for outcomes a caller may retry with backoff.
    ///
    /// Cryptographic rejections never change on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResolverUnavailable(_))
    }

    /// HTTP status code for this error.
    ///
    /// Malformed input maps to 400, resolver unavailability to 503, local
    /// faults to 500, and every verification rejection to 401.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest(_) => 400,
            Self::ResolverUnavailable(_) => 503,
            Self::InvalidPrivateKey(_)
            | Self::SecretUnavailable { .. }
            | Self::Serialization(_)
            | Self::Config(_)
            | Self::Ledger(_)
            | Self::Internal(_) => 500,
            _ => 401,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::token_malformed("invalid credential structure"),
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::UnsupportedAlgorithm("algorithm not supported".into())
            },
            ErrorKind::Base64(_) => AuthError::token_malformed("invalid base64url segment"),
            ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::token_malformed("invalid credential JSON")
            },
            _ => AuthError::token_malformed(format!("credential error: {err}")),
        }
    }
}

impl From<LedgerError> for AuthError {
    fn from(err: LedgerError) -> Self {
        AuthError::Ledger(err)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Minimum accepted value.
        min: String,
        /// Value supplied.
        value: String,
    },

    /// Two fields are inconsistent with each other.
    #[error("{field} is invalid: {reason}")]
    Inconsistent {
        /// Field name.
        field: &'static str,
        /// What constraint was violated.
        reason: String,
    },
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Pipeline stage at which a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationLayer {
    /// Edge envelope HMAC.
    #[serde(rename = "gateway_verification")]
    Gateway,
    /// Bearer credential and freshness.
    #[serde(rename = "token_verification")]
    Token,
    /// Holder-of-key signature and key rotation.
    #[serde(rename = "user_signature_verification")]
    UserSignature,
}

impl VerificationLayer {
    /// Wire name used in the `layer` field of [`ErrorResponse`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gateway => "gateway_verification",
            Self::Token => "token_verification",
            Self::UserSignature => "user_signature_verification",
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            Self::Gateway => "Gateway verification failed",
            Self::Token => "Token verification failed",
            Self::UserSignature => "User signature verification failed",
        }
    }
}

impl fmt::Display for VerificationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline rejection: the detailed error and the layer that raised it.
///
/// The detailed error is for logs only. Use
/// [`to_response`](Self::to_response) for anything sent back to a caller.
#[derive(Debug, Error)]
#[error("{layer}: {error}")]
pub struct VerificationFailure {
    /// Layer that rejected the request.
    pub layer: VerificationLayer,
    /// Detailed reason.
    #[source]
    pub error: AuthError,
}

impl VerificationFailure {
    /// Creates a new failure.
    #[must_use]
    pub fn new(layer: VerificationLayer, error: AuthError) -> Self {
        Self { layer, error }
    }

    /// HTTP status code for the response.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }

    /// See [`AuthError::is_retryable`].
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }

    /// Coarse, caller-safe response body.
    ///
    /// Only the layer name and a generic message are exposed; the specific
    /// byte, field or secret at fault is never revealed.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        let error = match self.status_code() {
            400 => "Malformed request",
            503 => "Service temporarily unavailable",
            500 => "Internal error",
            _ => self.layer.public_message(),
        };
        ErrorResponse { success: false, error: error.to_owned(), layer: self.layer }
    }
}

/// JSON body returned to callers when a request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Generic, layer-level message.
    pub error: String,
    /// Layer that rejected the request.
    pub layer: VerificationLayer,
}
