//! # Zerotrust Authentication
//!
//! Layered request authentication for services behind an edge gateway.
//!
//! Every request must pass three independent checks, in order:
//!
//! - **Gateway envelope**: an HMAC-SHA256 tag proving the request came through the edge, computed
//!   over the edge's wrapper as received
//! - **Bearer credential**: a short-lived HS256 token carried inside the payload, plus a timestamp
//!   freshness check
//! - **Holder-of-key signature**: an Ed25519 signature over the unpadded payload, checked against
//!   the identity's current key, which must match the key captured in the credential
//!
//! A stolen credential is useless without the private key, and a request
//! signed before a key rotation is refused even when its credential has not
//! expired.
//!
//! ## Features
//!
//! - Fixed-size payload padding so request sizes leak nothing about content
//! - Public-key cache with TTL, bounded retries and admin invalidation
//! - Optional duplicate-request rejection and credential revocation hooks
//! - Coarse, layer-level error responses; detailed reasons stay in logs
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zerotrust_authn::{
//!     PipelineConfig, PipelineSecrets, PublicKeyResolver, VerificationPipeline,
//! };
//! use zerotrust_ledger::{MemoryLedger, MemorySecretProvider, audit::TracingAuditLogger};
//!
//! # async fn example(body: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let secrets = MemorySecretProvider::new();
//! secrets.set("gateway_hmac_secret", "S");
//! secrets.set("jwt_secret", "J");
//!
//! let resolver = PublicKeyResolver::from_config(
//!     Arc::new(MemoryLedger::new()),
//!     Arc::new(TracingAuditLogger),
//!     &config,
//! );
//! let pipeline = VerificationPipeline::builder()
//!     .secrets(PipelineSecrets::load(&secrets, &config).await?)
//!     .resolver(Arc::new(resolver))
//!     .config(config)
//!     .build()?;
//!
//! match pipeline.verify(body).await {
//!     Ok(verified) => println!("request from {}", verified.identity.username),
//!     Err(failure) => println!("{}", serde_json::to_string(&failure.to_response())?),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a wired-up pipeline fixture and
//!   credential forging helpers.
//! - **`failpoints`**: Compiles in `fail_point!` injection sites for failure testing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Canonical JSON encoding.
pub mod canonical;
/// Client-side request construction.
pub mod client;
/// Time sources.
pub mod clock;
/// Pipeline configuration and secrets.
pub mod config;
/// HS256 bearer credentials.
pub mod credential;
/// Gateway envelopes.
pub mod envelope;
/// Authentication error types.
pub mod error;
/// Timestamp freshness checks.
pub mod freshness;
/// Cached public-key resolution.
pub mod key_resolver;
/// Signed login and credential issuance.
pub mod login;
/// Fixed-size payload padding.
pub mod padding;
/// Logical request payloads.
pub mod payload;
/// The three-layer verification pipeline.
pub mod pipeline;
/// Duplicate-request detection.
pub mod replay;
mod retry;
/// User signatures.
pub mod signer;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Credential algorithm validation.
pub mod validation;

pub use client::{seal_request, sign_login};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PipelineConfig, PipelineSecrets, RetryConfig};
pub use credential::{Credential, CredentialAuthority, CredentialClaims, verify_credential};
pub use envelope::{ClientRequest, EdgeAuthenticator, GatewayMetadata, GatewayRequest};
pub use error::{
    AuthError, ConfigError, ErrorResponse, ReplayReason, Result, VerificationFailure,
    VerificationLayer,
};
pub use key_resolver::PublicKeyResolver;
pub use login::{LoginRequest, LoginResponse, LoginService};
pub use payload::LogicalPayload;
pub use pipeline::{VerificationPipeline, VerifiedIdentity, VerifiedRequest};
pub use signer::UserKeyPair;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
