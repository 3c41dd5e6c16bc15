//! End-to-end flow: signed login, credential issuance, a padded and signed
//! transfer forwarded through the edge, verification, and the ledger update.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use serde_json::{Map, json};
use zerotrust_authn::{
    AuthError, Clock, LogicalPayload, ReplayReason, VerificationLayer, assert_auth_error,
    assert_rejected,
    padding::DEFAULT_PADDING_TARGET,
    seal_request, sign_login,
    testutil::{Fixture, NOW, TestIdentity},
};
use zerotrust_ledger::{IdentityLedger, audit::AuditAction, testutil::InjectedFailure};

async fn log_in(fx: &Fixture, user: &TestIdentity) -> zerotrust_authn::Credential {
    let request = sign_login(user.username(), fx.clock.now_secs(), &user.key_pair).unwrap();
    let response = fx.login.login(&request).await.unwrap();
    assert!(response.success);
    assert_eq!(response.user.id, user.identity.id);
    response.token
}

fn transfer(token: zerotrust_authn::Credential, now: u64, receiver: &str, amount: u64) -> LogicalPayload {
    LogicalPayload::new()
        .with_token(token)
        .with_timestamp(now)
        .with("receiver", receiver)
        .with("amount", amount)
}

#[tokio::test]
async fn test_login_then_transfer() {
    let fx = Fixture::new();
    let alice = fx.register("alice", 1_000);
    let bob = fx.register("bob", 0);

    let token = log_in(&fx, &alice).await;
    let payload = transfer(token, NOW, "bob", 500);

    let mut meta = Map::new();
    meta.insert("client_version".into(), json!("1.4.2"));
    let request = seal_request(&payload, &alice.key_pair, meta, DEFAULT_PADDING_TARGET).unwrap();
    let forwarded = fx.edge.forward(request, "transfer", "203.0.113.7", NOW).unwrap();
    let body = serde_json::to_vec(&forwarded).unwrap();

    let verified = fx.pipeline.verify(&body).await.unwrap();
    assert_eq!(verified.identity.username, "alice");
    assert_eq!(verified.payload.get("receiver"), Some(&json!("bob")));
    assert_eq!(verified.meta.get("client_version"), Some(&json!("1.4.2")));
    assert_eq!(verified.gateway_metadata.client_ip, "203.0.113.7");

    // Business logic runs only on the verified identity.
    let ledger: &dyn IdentityLedger = fx.ledger.as_ref();
    assert!(ledger.is_sufficient_balance(verified.identity.user_id, 500).await.unwrap());
    ledger.apply_transfer(verified.identity.user_id, bob.identity.id, 500).await.unwrap();

    assert_eq!(fx.ledger.inner().balance_of(alice.identity.id), Some(500));
    assert_eq!(fx.ledger.inner().balance_of(bob.identity.id), Some(500));
    assert_eq!(fx.ledger.inner().transfers_for(bob.identity.id).len(), 1);
    assert_eq!(fx.audit.actions(), vec![AuditAction::Login]);
}

#[tokio::test]
async fn test_identical_request_resent_after_window() {
    let fx = Fixture::new();
    let alice = fx.register("alice", 1_000);
    fx.register("bob", 0);

    let token = log_in(&fx, &alice).await;
    let body = fx.wire(&alice, &transfer(token, NOW, "bob", 500));

    assert!(fx.pipeline.verify(&body).await.is_ok());

    fx.clock.advance(61);
    let result = fx.pipeline.verify(&body).await;
    assert_rejected!(
        result,
        VerificationLayer::Token,
        AuthError::ReplayDetected(ReplayReason::Stale { skew_secs: 61, window_secs: 60 })
    );
}

#[tokio::test]
async fn test_session_outlives_many_requests_until_expiry() {
    let fx = Fixture::new();
    let alice = fx.register("alice", 1_000);
    let token = log_in(&fx, &alice).await;

    for _ in 0..5 {
        fx.clock.advance(600);
        let payload = transfer(token.clone(), fx.clock.now_secs(), "bob", 1);
        assert!(fx.pipeline.verify(&fx.wire(&alice, &payload)).await.is_ok());
    }

    fx.clock.advance(601);
    let payload = transfer(token, fx.clock.now_secs(), "bob", 1);
    let result = fx.pipeline.verify(&fx.wire(&alice, &payload)).await;
    assert_rejected!(result, VerificationLayer::Token, AuthError::TokenExpired);
}

#[tokio::test]
async fn test_login_with_wrong_key_is_refused() {
    let fx = Fixture::new();
    let alice = fx.register("alice", 0);
    let mallory = fx.register("mallory", 0);

    let request = sign_login(alice.username(), NOW, &mallory.key_pair).unwrap();
    assert_auth_error!(fx.login.login(&request).await, AuthError::InvalidUserSignature);
    assert_eq!(fx.audit.actions(), vec![AuditAction::LoginFailed]);
}

#[tokio::test]
async fn test_ledger_outage_and_recovery() {
    let fx = Fixture::new();
    let alice = fx.register("alice", 0);
    let token = log_in(&fx, &alice).await;
    let body = fx.wire(&alice, &transfer(token, NOW, "bob", 1));

    fx.ledger.fail_always(InjectedFailure::Connection);
    let failure = fx.pipeline.verify(&body).await.unwrap_err();
    assert_eq!(failure.status_code(), 503);
    assert_eq!(
        serde_json::to_value(failure.to_response()).unwrap(),
        json!({
            "success": false,
            "error": "Service temporarily unavailable",
            "layer": "user_signature_verification",
        })
    );

    fx.ledger.clear_failure();
    assert!(fx.pipeline.verify(&body).await.is_ok());
}

#[tokio::test]
async fn test_cached_key_survives_brief_outage() {
    let fx = Fixture::new();
    let alice = fx.register("alice", 0);
    let token = log_in(&fx, &alice).await;

    let first = fx.wire(&alice, &transfer(token.clone(), NOW, "bob", 1));
    assert!(fx.pipeline.verify(&first).await.is_ok());

    fx.ledger.fail_always(InjectedFailure::Timeout);
    let second = fx.wire(&alice, &transfer(token, NOW, "bob", 2));
    assert!(fx.pipeline.verify(&second).await.is_ok());
}
