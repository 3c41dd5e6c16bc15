//! Shared test utilities for authentication testing.
//!
//! Provides a [`Fixture`] wiring a full verification pipeline to in-memory
//! collaborators and a manual clock, helpers for forging raw credentials
//! (for attack testing), and assertion macros. Feature-gated behind
//! `testutil` to keep it out of production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! zerotrust-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use zerotrust_authn::testutil::Fixture;
//!
//! # async fn example() {
//! let fx = Fixture::new();
//! let alice = fx.register("alice", 1_000);
//! let payload = fx.payload_for(&alice).with("receiver", "bob").with("amount", 500);
//! assert!(fx.pipeline.verify(&fx.wire(&alice, &payload)).await.is_ok());
//! # }
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use zerotrust_ledger::{
    Identity, IdentityLedger, KeyType, MemoryLedger, audit::MemoryAuditLogger,
    testutil::FlakyLedger,
};

use crate::{
    client::seal_request,
    clock::{Clock, ManualClock},
    config::{PipelineConfig, PipelineSecrets},
    credential::{Credential, CredentialAuthority, RevocationCheck},
    envelope::{DEFAULT_GATEWAY_ID, EdgeAuthenticator},
    key_resolver::PublicKeyResolver,
    login::LoginService,
    payload::LogicalPayload,
    pipeline::VerificationPipeline,
    signer::UserKeyPair,
};

/// Fixed start time of every [`Fixture`] clock.
pub const NOW: u64 = 1_700_000_000;

/// Gateway HMAC secret used by [`Fixture`].
pub const GATEWAY_SECRET: &[u8] = b"S";

/// Credential signing secret used by [`Fixture`].
pub const CREDENTIAL_SECRET: &[u8] = b"J";

/// A registered identity together with its private key.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    /// Private key held by the client.
    pub key_pair: UserKeyPair,
    /// Ledger record.
    pub identity: Identity,
}

impl TestIdentity {
    /// Username shortcut.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.identity.username
    }
}

/// A pipeline wired to in-memory collaborators.
///
/// Every component shares one [`ManualClock`] starting at [`NOW`]; advance it
/// to age requests and credentials.
pub struct Fixture {
    /// Ledger wrapper for injecting lookup failures.
    pub ledger: Arc<FlakyLedger>,
    /// Shared clock.
    pub clock: Arc<ManualClock>,
    /// Issues credentials signed with [`CREDENTIAL_SECRET`].
    pub authority: Arc<CredentialAuthority>,
    /// Edge holding [`GATEWAY_SECRET`].
    pub edge: EdgeAuthenticator,
    /// Login flow over the same ledger and authority.
    pub login: LoginService,
    /// The pipeline under test.
    pub pipeline: VerificationPipeline,
    /// Audit events from login and key-cache administration.
    pub audit: Arc<MemoryAuditLogger>,
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture").field("now", &self.clock.now_secs()).finish_non_exhaustive()
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Default configuration, no revocation, no duplicate detection.
    #[must_use]
    pub fn new() -> Self {
        Self::assemble(PipelineConfig::default(), None)
    }

    /// Uses `config` for every component the fixture wires.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self::assemble(config, None)
    }

    /// Default configuration with a revocation check.
    #[must_use]
    pub fn with_revocation(revocation: Arc<dyn RevocationCheck>) -> Self {
        Self::assemble(PipelineConfig::default(), Some(revocation))
    }

    fn assemble(config: PipelineConfig, revocation: Option<Arc<dyn RevocationCheck>>) -> Self {
        let ledger = Arc::new(FlakyLedger::new(MemoryLedger::new()));
        let clock = Arc::new(ManualClock::new(NOW));
        let audit = Arc::new(MemoryAuditLogger::new());
        let authority = Arc::new(
            CredentialAuthority::from_config(CREDENTIAL_SECRET, &config, clock.clone())
                .expect("fixture config is valid"),
        );

        let resolver = Arc::new(PublicKeyResolver::from_config(
            ledger.clone() as Arc<dyn IdentityLedger>,
            audit.clone(),
            &config,
        ));

        let login = LoginService::from_config(
            Arc::clone(&authority),
            ledger.clone(),
            audit.clone(),
            clock.clone(),
            &config,
        )
        .expect("fixture config is valid");

        let edge = EdgeAuthenticator::from_config(GATEWAY_SECRET, DEFAULT_GATEWAY_ID, &config)
            .expect("fixture config is valid");

        let secrets =
            PipelineSecrets::new(GATEWAY_SECRET, CREDENTIAL_SECRET).expect("distinct secrets");
        let pipeline = VerificationPipeline::builder()
            .config(config)
            .secrets(secrets)
            .resolver(resolver)
            .clock(clock.clone())
            .maybe_revocation(revocation)
            .build()
            .expect("fixture config is valid");

        Self { ledger, clock, authority, edge, login, pipeline, audit }
    }

    /// Registers `username` with a fresh Ed25519 key.
    ///
    /// # Panics
    ///
    /// Panics if the username is already registered.
    pub fn register(&self, username: &str, balance: u64) -> TestIdentity {
        let key_pair = UserKeyPair::generate(KeyType::Ed25519).expect("keygen");
        let identity = self
            .ledger
            .inner()
            .register(username, key_pair.public_key_hex(), KeyType::Ed25519, balance)
            .expect("register");
        TestIdentity { key_pair, identity }
    }

    /// Replaces the ledger key of `user` with a fresh one and drops the
    /// cached key. Returns the identity holding the new key.
    pub async fn rotate_key(&self, user: &TestIdentity) -> TestIdentity {
        let key_pair = UserKeyPair::generate(KeyType::Ed25519).expect("keygen");
        self.ledger
            .inner()
            .rotate_public_key(user.username(), key_pair.public_key_hex())
            .expect("rotate");
        self.pipeline.resolver().invalidate(user.username()).await;

        let mut identity = user.identity.clone();
        identity.public_key = key_pair.public_key_hex().to_owned();
        TestIdentity { key_pair, identity }
    }

    /// Issues a credential for `user` at the current clock time.
    pub fn credential_for(&self, user: &TestIdentity) -> Credential {
        self.authority.issue(&user.identity).expect("issue")
    }

    /// A payload carrying a fresh credential and the current timestamp.
    pub fn payload_for(&self, user: &TestIdentity) -> LogicalPayload {
        LogicalPayload::new()
            .with_token(self.credential_for(user))
            .with_timestamp(self.clock.now_secs())
    }

    /// Signs, pads and forwards `payload` through the edge, returning the
    /// forwarded request as a JSON value.
    pub fn forwarded_value(&self, signer: &TestIdentity, payload: &LogicalPayload) -> Value {
        let target = self.pipeline.config().padding_target();
        let request = seal_request(payload, &signer.key_pair, Map::new(), target).expect("seal");
        let forwarded = self
            .edge
            .forward(request, "transfer", "203.0.113.7", self.clock.now_secs())
            .expect("forward");
        serde_json::to_value(forwarded).expect("serialize")
    }

    /// Like [`forwarded_value`](Self::forwarded_value), as wire bytes.
    pub fn wire(&self, signer: &TestIdentity, payload: &LogicalPayload) -> Vec<u8> {
        serde_json::to_vec(&self.forwarded_value(signer, payload)).expect("serialize")
    }
}

/// Builds a raw credential from arbitrary header and claims JSON.
///
/// With `secret`, the third segment is an HMAC-SHA256 tag over
/// `header.claims`; without it, the segment is empty (as in `alg: none`
/// tokens).
pub fn forge_credential(header: &Value, claims: &Value, secret: Option<&[u8]>) -> String {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("header"));
    let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims"));
    let signing_input = format!("{header}.{claims}");

    let signature = secret.map_or_else(String::new, |secret| {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("any key length");
        mac.update(signing_input.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    });
    format!("{signing_input}.{signature}")
}

/// Asserts that a `Result` is an `Err` matching the given [`AuthError`](crate::AuthError) pattern.
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $pattern:pat $(if $guard:expr)? $(,)?) => {
        match $result {
            Err($pattern) $(if $guard)? => {},
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected an error, got Ok"),
        }
    };
}

/// Asserts that a pipeline result is a rejection at `$layer` whose error
/// matches `$pattern`.
#[macro_export]
macro_rules! assert_rejected {
    ($result:expr, $layer:expr, $pattern:pat $(,)?) => {
        match $result {
            Err(failure) => {
                assert_eq!(failure.layer, $layer, "wrong layer: {failure}");
                assert!(matches!(failure.error, $pattern), "unexpected error: {failure}");
            },
            Ok(_) => panic!("expected rejection at {}, got Ok", $layer),
        }
    };
}
