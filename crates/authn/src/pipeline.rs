//! Three-layer request verification.
//!
//! ```text
//! raw body
//!   → gateway_verification         envelope HMAC over the bytes as received
//!   → token_verification           credential tag, expiry, revocation, freshness
//!   → user_signature_verification  current key == snapshot, holder-of-key signature
//!   → VerifiedRequest
//! ```
//!
//! Layers run strictly in order and the first failure ends verification.
//! Each stage consumes the [`VerificationContext`] produced by the one
//! before it, so a later stage cannot run on a request an earlier one did
//! not pass.
//!
//! Failures carry the detailed [`AuthError`] for logs and map to a coarse
//! [`ErrorResponse`](crate::error::ErrorResponse) for callers.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use zerotrust_ledger::IdentityId;

use crate::{
    clock::{Clock, SystemClock},
    config::{PipelineConfig, PipelineSecrets},
    credential::{CredentialClaims, RevocationCheck, verify_credential},
    envelope::{ENVELOPE_FIELD, Envelope, GatewayMetadata, TAG_FIELD, authenticate},
    error::{AuthError, ConfigError, VerificationFailure, VerificationLayer},
    freshness::check_optional_freshness,
    key_resolver::PublicKeyResolver,
    padding::unpad,
    payload::LogicalPayload,
    replay::{DuplicateDetector, InMemoryDuplicateDetector},
    signer::verify,
};

/// The identity a verified request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Ledger identifier.
    pub user_id: IdentityId,
    /// Username.
    pub username: String,
}

/// A request that passed all three layers.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedRequest {
    /// Who sent it.
    pub identity: VerifiedIdentity,
    /// Claims of the credential it carried.
    pub claims: CredentialClaims,
    /// The unpadded, signature-checked payload.
    pub payload: LogicalPayload,
    /// Edge metadata from the envelope.
    pub gateway_metadata: GatewayMetadata,
    /// Client metadata. Covered by the envelope tag, not by the user signature.
    pub meta: Map<String, Value>,
    /// Layers passed, in order.
    pub layers: Vec<VerificationLayer>,
}

/// Per-request state threaded from one stage to the next.
#[derive(Debug)]
pub struct VerificationContext<S> {
    passed: Vec<VerificationLayer>,
    stage: S,
}

impl<S> VerificationContext<S> {
    /// Layers passed so far, in order.
    #[must_use]
    pub fn passed(&self) -> &[VerificationLayer] {
        &self.passed
    }

    /// State produced by the last stage.
    #[must_use]
    pub fn stage(&self) -> &S {
        &self.stage
    }

    fn advance<T>(mut self, layer: VerificationLayer, stage: T) -> VerificationContext<T> {
        self.passed.push(layer);
        VerificationContext { passed: self.passed, stage }
    }
}

/// Output of the gateway layer: the envelope, authenticated and parsed.
#[derive(Debug)]
pub struct GatewayAuthenticated {
    /// The envelope exactly as tagged by the edge.
    pub envelope: Envelope,
}

/// Output of the token layer.
#[derive(Debug)]
pub struct TokenVerified {
    /// Verified credential claims.
    pub claims: CredentialClaims,
    /// Unpadded payload.
    pub payload: LogicalPayload,
    /// Payload timestamp, if present.
    pub timestamp: Option<u64>,
    /// Hex user signature, not yet checked.
    pub user_signature: String,
    /// Edge metadata.
    pub gateway_metadata: GatewayMetadata,
    /// Client metadata.
    pub meta: Map<String, Value>,
}

/// Verifies requests forwarded by the edge.
///
/// Holds every collaborator explicitly: secrets, clock, key resolver and the
/// optional revocation and duplicate checks. Share one instance across
/// requests; it holds no per-request state.
pub struct VerificationPipeline {
    config: PipelineConfig,
    secrets: PipelineSecrets,
    resolver: Arc<PublicKeyResolver>,
    clock: Arc<dyn Clock>,
    revocation: Option<Arc<dyn RevocationCheck>>,
    duplicates: Option<Arc<dyn DuplicateDetector>>,
}

impl std::fmt::Debug for VerificationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationPipeline")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .field("revocation", &self.revocation.is_some())
            .field("duplicates", &self.duplicates.is_some())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl VerificationPipeline {
    /// Creates a pipeline.
    ///
    /// When `duplicate_detector` is not given but the config sets
    /// `duplicate_detection_capacity`, an in-memory detector of that size is
    /// created.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    #[builder]
    pub fn new(
        #[builder(default)] config: PipelineConfig,
        secrets: PipelineSecrets,
        resolver: Arc<PublicKeyResolver>,
        clock: Option<Arc<dyn Clock>>,
        revocation: Option<Arc<dyn RevocationCheck>>,
        duplicate_detector: Option<Arc<dyn DuplicateDetector>>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let duplicates = duplicate_detector.or_else(|| {
            config.duplicate_detection_capacity().map(|capacity| {
                Arc::new(InMemoryDuplicateDetector::new(capacity)) as Arc<dyn DuplicateDetector>
            })
        });

        Ok(Self {
            config,
            secrets,
            resolver,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            revocation,
            duplicates,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The public-key resolver, for administrative invalidation.
    #[must_use]
    pub fn resolver(&self) -> &Arc<PublicKeyResolver> {
        &self.resolver
    }

    /// Verifies a raw request body.
    ///
    /// # Errors
    ///
    /// Returns the first layer failure. A body that is not JSON fails the
    /// gateway layer as malformed.
    pub async fn verify(
        &self,
        body: &[u8],
    ) -> std::result::Result<VerifiedRequest, VerificationFailure> {
        let request: Value = serde_json::from_slice(body).map_err(|e| {
            reject(VerificationLayer::Gateway, AuthError::malformed_request(format!("invalid JSON: {e}")))
        })?;
        self.verify_value(request).await
    }

    /// Verifies a request already parsed into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the first layer failure.
    #[tracing::instrument(
        name = "verify_request",
        skip_all,
        fields(route_id = tracing::field::Empty, username = tracing::field::Empty)
    )]
    pub async fn verify_value(
        &self,
        request: Value,
    ) -> std::result::Result<VerifiedRequest, VerificationFailure> {
        let context = self.authenticate_gateway(request)?;
        let context = self.verify_token(context).await?;
        let verified = self.verify_user_signature(context).await?;

        tracing::debug!(user_id = %verified.identity.user_id, "request verified");
        Ok(verified)
    }

    /// Gateway layer: checks the envelope tag over the value as received,
    /// then parses it.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedRequest`] if the envelope or tag is missing, or
    ///   the authenticated envelope does not have the expected shape
    /// - [`AuthError::GatewayAuthFailed`] if the tag does not verify
    pub fn authenticate_gateway(
        &self,
        request: Value,
    ) -> std::result::Result<VerificationContext<GatewayAuthenticated>, VerificationFailure> {
        const LAYER: VerificationLayer = VerificationLayer::Gateway;

        let Value::Object(mut request) = request else {
            return Err(reject(LAYER, AuthError::malformed_request("request must be a JSON object")));
        };
        let (Some(envelope), Some(Value::String(tag))) =
            (request.remove(ENVELOPE_FIELD), request.remove(TAG_FIELD))
        else {
            return Err(reject(LAYER, AuthError::malformed_request("missing gateway envelope or HMAC")));
        };

        if !authenticate(&envelope, &tag, self.secrets.gateway()) {
            return Err(reject(LAYER, AuthError::GatewayAuthFailed));
        }

        let envelope: Envelope = serde_json::from_value(envelope).map_err(|e| {
            reject(LAYER, AuthError::malformed_request(format!("invalid envelope: {e}")))
        })?;

        tracing::Span::current().record("route_id", envelope.gateway_metadata.route_id.as_str());
        tracing::debug!(layer = %LAYER, "layer passed");

        let context = VerificationContext { passed: Vec::with_capacity(3), stage: () };
        Ok(context.advance(LAYER, GatewayAuthenticated { envelope }))
    }

    /// Token layer: unpads the payload, verifies the credential it carries
    /// and checks the payload timestamp.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedRequest`] if the payload has no `token`, a
    ///   non-integer `timestamp`, or no `timestamp` while one is required
    /// - [`AuthError::TokenMalformed`], [`AuthError::UnsupportedAlgorithm`],
    ///   [`AuthError::InvalidSignature`], [`AuthError::TokenExpired`] from
    ///   credential verification
    /// - [`AuthError::CredentialRevoked`] if the revocation check refuses it
    /// - [`AuthError::ReplayDetected`] if the timestamp is outside the window
    pub async fn verify_token(
        &self,
        context: VerificationContext<GatewayAuthenticated>,
    ) -> std::result::Result<VerificationContext<TokenVerified>, VerificationFailure> {
        const LAYER: VerificationLayer = VerificationLayer::Token;

        let Envelope { original_request, gateway_metadata } = &context.stage.envelope;
        let payload = unpad(original_request.protected_payload.clone());
        let now = self.clock.now_secs();

        let Some(token) = payload.token() else {
            return Err(reject(LAYER, AuthError::malformed_request("payload missing token")));
        };

        let claims = verify_credential(token, self.secrets.credential(), now)
            .map_err(|err| reject(LAYER, err))?;
        tracing::Span::current().record("username", claims.username.as_str());

        if let Some(revocation) = &self.revocation {
            match revocation.is_revoked(&claims).await {
                Ok(false) => {},
                Ok(true) => return Err(reject(LAYER, AuthError::CredentialRevoked)),
                Err(err) => return Err(reject(LAYER, err)),
            }
        }

        let timestamp = payload.timestamp().map_err(|err| reject(LAYER, err))?;
        check_optional_freshness(
            timestamp,
            now,
            self.config.replay_window(),
            self.config.require_timestamp(),
        )
        .map_err(|err| reject(LAYER, err))?;

        tracing::debug!(layer = %LAYER, "layer passed");

        let stage = TokenVerified {
            claims,
            payload,
            timestamp,
            user_signature: original_request.user_signature.clone(),
            gateway_metadata: gateway_metadata.clone(),
            meta: original_request.meta.clone(),
        };
        Ok(context.advance(LAYER, stage))
    }

    /// Signature layer: resolves the current key, rejects a rotated key and
    /// checks the holder-of-key signature over the unpadded payload.
    ///
    /// When duplicate detection is enabled, an already-accepted signature is
    /// rejected afterwards, reported against the token layer.
    ///
    /// # Errors
    ///
    /// - [`AuthError::IdentityNotFound`] or [`AuthError::ResolverUnavailable`]
    ///   from the resolver
    /// - [`AuthError::KeyRotated`] if the current key differs from the
    ///   credential's snapshot, even if the signature would verify
    /// - [`AuthError::InvalidUserSignature`] if the signature does not verify
    /// - [`AuthError::ReplayDetected`] for a duplicate request
    pub async fn verify_user_signature(
        &self,
        context: VerificationContext<TokenVerified>,
    ) -> std::result::Result<VerifiedRequest, VerificationFailure> {
        const LAYER: VerificationLayer = VerificationLayer::UserSignature;

        let VerificationContext { passed, stage } = context;
        let TokenVerified { claims, payload, timestamp, user_signature, gateway_metadata, meta } =
            stage;

        let current = self.resolver.resolve(&claims.username).await.map_err(|err| reject(LAYER, err))?;

        let snapshot_matches =
            bool::from(current.public_key.as_bytes().ct_eq(claims.public_key_snapshot.as_bytes()));
        if !snapshot_matches {
            return Err(reject(LAYER, AuthError::key_rotated(claims.username.as_str())));
        }

        if !verify(&payload, &user_signature, &current.public_key, current.key_type) {
            return Err(reject(LAYER, AuthError::InvalidUserSignature));
        }

        if let Some(duplicates) = &self.duplicates {
            // Hex decoding is case-insensitive, so key on the decoded bytes.
            let replay_key = hex::decode(&user_signature)
                .map(hex::encode)
                .map_err(|_| reject(LAYER, AuthError::InvalidUserSignature))?;
            let expires_in = self.fresh_for(timestamp);
            duplicates
                .check_and_mark(&replay_key, expires_in)
                .await
                .map_err(|err| reject(VerificationLayer::Token, err))?;
        }

        tracing::debug!(layer = %LAYER, "layer passed");

        let mut layers = passed;
        layers.push(LAYER);
        Ok(VerifiedRequest {
            identity: VerifiedIdentity { user_id: current.user_id, username: claims.username.clone() },
            claims,
            payload,
            gateway_metadata,
            meta,
            layers,
        })
    }

    /// How much longer a request with `timestamp` stays inside the window.
    fn fresh_for(&self, timestamp: Option<u64>) -> Duration {
        let window = self.config.replay_window().as_secs();
        let remaining = match timestamp {
            Some(timestamp) => timestamp.saturating_add(window).saturating_sub(self.clock.now_secs()),
            None => window,
        };
        Duration::from_secs(remaining.saturating_add(1))
    }
}

fn reject(layer: VerificationLayer, error: AuthError) -> VerificationFailure {
    tracing::warn!(layer = %layer, error = %error, "request rejected");
    VerificationFailure::new(layer, error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;
    use zerotrust_ledger::testutil::InjectedFailure;

    use super::*;
    use crate::{
        assert_rejected,
        credential::MemoryRevocationList,
        error::ReplayReason,
        testutil::{Fixture, NOW},
    };

    #[tokio::test]
    async fn test_valid_request_passes_all_layers() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 1_000);
        let payload = fx.payload_for(&alice).with("receiver", "bob").with("amount", 500);

        let verified = fx.pipeline.verify(&fx.wire(&alice, &payload)).await.unwrap();

        assert_eq!(verified.identity.username, "alice");
        assert_eq!(verified.identity.user_id, alice.identity.id);
        assert_eq!(verified.payload, payload);
        assert_eq!(
            verified.layers,
            vec![VerificationLayer::Gateway, VerificationLayer::Token, VerificationLayer::UserSignature]
        );
        assert_eq!(verified.gateway_metadata.route_id, "route_transfer");
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let fx = Fixture::new();
        let result = fx.pipeline.verify(b"not json").await;
        assert_rejected!(result, VerificationLayer::Gateway, AuthError::MalformedRequest(_));
    }

    #[tokio::test]
    async fn test_missing_hmac_is_malformed() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let mut request = fx.forwarded_value(&alice, &fx.payload_for(&alice));
        request.as_object_mut().unwrap().remove(TAG_FIELD);

        let failure = fx.pipeline.verify_value(request).await.unwrap_err();
        assert_eq!(failure.status_code(), 400);
        assert_eq!(failure.layer, VerificationLayer::Gateway);
    }

    #[tokio::test]
    async fn test_tampered_envelope_fails_gateway_layer() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let mut request = fx.forwarded_value(&alice, &fx.payload_for(&alice).with("amount", 500));
        request[ENVELOPE_FIELD]["original_request"]["protected_payload"]["data"]["amount"] = json!(5000);

        let result = fx.pipeline.verify_value(request).await;
        assert_rejected!(result, VerificationLayer::Gateway, AuthError::GatewayAuthFailed);
    }

    #[tokio::test]
    async fn test_gateway_failure_short_circuits_lookup() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let mut request = fx.forwarded_value(&alice, &fx.payload_for(&alice));
        request[TAG_FIELD] = json!("00".repeat(32));

        assert!(fx.pipeline.verify_value(request).await.is_err());
        assert_eq!(fx.ledger.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_is_malformed() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let payload = LogicalPayload::new().with_timestamp(NOW).with("amount", 1);

        let result = fx.pipeline.verify(&fx.wire(&alice, &payload)).await;
        assert_rejected!(result, VerificationLayer::Token, AuthError::MalformedRequest(_));
    }

    #[tokio::test]
    async fn test_expired_credential_fails_token_layer() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let payload = fx.payload_for(&alice);
        let wire = fx.wire(&alice, &payload);

        fx.clock.advance(3601);
        let result = fx.pipeline.verify(&wire).await;
        assert_rejected!(result, VerificationLayer::Token, AuthError::TokenExpired);
    }

    #[tokio::test]
    async fn test_missing_timestamp_required_by_default() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let payload = LogicalPayload::new().with_token(fx.credential_for(&alice));

        let result = fx.pipeline.verify(&fx.wire(&alice, &payload)).await;
        assert_rejected!(result, VerificationLayer::Token, AuthError::MalformedRequest(_));
    }

    #[tokio::test]
    async fn test_missing_timestamp_allowed_when_not_required() {
        let config = PipelineConfig::builder().require_timestamp(false).build().unwrap();
        let fx = Fixture::with_config(config);
        let alice = fx.register("alice", 0);
        let payload = LogicalPayload::new().with_token(fx.credential_for(&alice));

        assert!(fx.pipeline.verify(&fx.wire(&alice, &payload)).await.is_ok());
    }

    #[tokio::test]
    async fn test_replay_window_boundary() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let wire = fx.wire(&alice, &fx.payload_for(&alice));

        fx.clock.advance(60);
        assert!(fx.pipeline.verify(&wire).await.is_ok());

        fx.clock.advance(1);
        let result = fx.pipeline.verify(&wire).await;
        assert_rejected!(
            result,
            VerificationLayer::Token,
            AuthError::ReplayDetected(ReplayReason::Stale { skew_secs: 61, window_secs: 60 })
        );
    }

    #[tokio::test]
    async fn test_revoked_credential() {
        let revocation = MemoryRevocationList::new();
        let fx = Fixture::with_revocation(Arc::new(revocation.clone()));
        let alice = fx.register("alice", 0);
        let wire = fx.wire(&alice, &fx.payload_for(&alice));

        revocation.revoke_issued_before("alice", NOW);
        let result = fx.pipeline.verify(&wire).await;
        assert_rejected!(result, VerificationLayer::Token, AuthError::CredentialRevoked);
    }

    #[tokio::test]
    async fn test_key_rotation_rejected_even_with_valid_signature() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let payload = fx.payload_for(&alice);

        let rotated = fx.rotate_key(&alice).await;
        let result = fx.pipeline.verify(&fx.wire(&rotated, &payload)).await;

        assert_rejected!(result, VerificationLayer::UserSignature, AuthError::KeyRotated { .. });
    }

    #[tokio::test]
    async fn test_signature_by_other_key_rejected() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let mallory = fx.register("mallory", 0);
        let payload = fx.payload_for(&alice);

        let result = fx.pipeline.verify(&fx.wire(&mallory, &payload)).await;
        assert_rejected!(result, VerificationLayer::UserSignature, AuthError::InvalidUserSignature);
    }

    #[tokio::test]
    async fn test_resolver_outage_is_503() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        fx.ledger.fail_always(InjectedFailure::Connection);

        let failure = fx.pipeline.verify(&fx.wire(&alice, &fx.payload_for(&alice))).await.unwrap_err();
        assert_eq!(failure.layer, VerificationLayer::UserSignature);
        assert_eq!(failure.status_code(), 503);
        assert!(failure.is_retryable());
    }

    #[tokio::test]
    async fn test_duplicate_request_rejected_when_enabled() {
        let config = PipelineConfig::builder().duplicate_detection_capacity(100).build().unwrap();
        let fx = Fixture::with_config(config);
        let alice = fx.register("alice", 0);
        let wire = fx.wire(&alice, &fx.payload_for(&alice));

        assert!(fx.pipeline.verify(&wire).await.is_ok());
        let result = fx.pipeline.verify(&wire).await;
        assert_rejected!(
            result,
            VerificationLayer::Token,
            AuthError::ReplayDetected(ReplayReason::Duplicate)
        );
    }

    #[tokio::test]
    async fn test_duplicates_allowed_when_disabled() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let wire = fx.wire(&alice, &fx.payload_for(&alice));

        assert!(fx.pipeline.verify(&wire).await.is_ok());
        assert!(fx.pipeline.verify(&wire).await.is_ok());
    }

    #[tokio::test]
    async fn test_stages_can_run_individually() {
        let fx = Fixture::new();
        let alice = fx.register("alice", 0);
        let request = fx.forwarded_value(&alice, &fx.payload_for(&alice));

        let context = fx.pipeline.authenticate_gateway(request).unwrap();
        assert_eq!(context.passed(), &[VerificationLayer::Gateway]);

        let context = fx.pipeline.verify_token(context).await.unwrap();
        assert_eq!(context.stage().claims.username, "alice");

        let verified = fx.pipeline.verify_user_signature(context).await.unwrap();
        assert_eq!(verified.layers.len(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let fx = Fixture::new();
        let config: PipelineConfig = serde_json::from_str(r#"{"replay_window": "0s"}"#).unwrap();

        let result = VerificationPipeline::builder()
            .config(config)
            .secrets(PipelineSecrets::new("g", "c").unwrap())
            .resolver(Arc::clone(fx.pipeline.resolver()))
            .build();
        assert!(result.is_err());
    }
}
