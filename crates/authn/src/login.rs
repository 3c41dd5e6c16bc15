//! Login: exchanging a signed timestamp for a credential.
//!
//! A login request proves possession of the registered private key by
//! signing `{"timestamp":…,"username":…}`. Because there is no prior session
//! to bind to, the freshness window is wider than for API calls (300s by
//! default). The identity is read from the Ledger directly, bypassing the
//! public-key cache, so a credential is always bound to the current key.
//!
//! Callers see the same rejection for an unknown username and a bad
//! signature. The precise reason goes to the audit trail and the logs.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use zerotrust_ledger::{
    IdentityId, IdentityLedger,
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, identity_resource},
};

use crate::{
    clock::{Clock, SystemClock},
    config::PipelineConfig,
    credential::{Credential, CredentialAuthority},
    error::{AuthError, ConfigError, Result},
    freshness::{DEFAULT_LOGIN_REPLAY_WINDOW, check_freshness},
    signer::verify,
};

/// A login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Identity logging in.
    pub username: String,
    /// Unix seconds at which the client signed the request.
    pub timestamp: u64,
    /// Hex signature over [`LoginMessage`].
    pub signature: String,
}

/// The object a login signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginMessage<'a> {
    /// Same as [`LoginRequest::timestamp`].
    pub timestamp: u64,
    /// Same as [`LoginRequest::username`].
    pub username: &'a str,
}

impl LoginRequest {
    /// The object the signature must cover.
    #[must_use]
    pub fn message(&self) -> LoginMessage<'_> {
        LoginMessage { timestamp: self.timestamp, username: &self.username }
    }
}

/// Identity summary returned on successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginUser {
    /// Ledger identifier.
    pub id: IdentityId,
    /// Username.
    pub username: String,
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Always `true`.
    pub success: bool,
    /// The issued credential.
    pub token: Credential,
    /// Who logged in.
    pub user: LoginUser,
}

/// Verifies login requests and issues credentials.
pub struct LoginService {
    authority: Arc<CredentialAuthority>,
    ledger: Arc<dyn IdentityLedger>,
    audit: Arc<dyn AuditLogger>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl std::fmt::Debug for LoginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginService")
            .field("authority", &self.authority)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl LoginService {
    /// Creates a login service.
    ///
    /// `clock` defaults to [`SystemClock`] and `window` to 300s.
    #[builder]
    pub fn new(
        authority: Arc<CredentialAuthority>,
        ledger: Arc<dyn IdentityLedger>,
        audit: Arc<dyn AuditLogger>,
        clock: Option<Arc<dyn Clock>>,
        #[builder(default = DEFAULT_LOGIN_REPLAY_WINDOW)] window: Duration,
    ) -> Self {
        Self {
            authority,
            ledger,
            audit,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            window,
        }
    }

    /// Creates a login service whose freshness window is the configured
    /// `login_replay_window`.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] from [`PipelineConfig::validate`].
    pub fn from_config(
        authority: Arc<CredentialAuthority>,
        ledger: Arc<dyn IdentityLedger>,
        audit: Arc<dyn AuditLogger>,
        clock: Arc<dyn Clock>,
        config: &PipelineConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { authority, ledger, audit, clock, window: config.login_replay_window() })
    }

    /// Verifies `request` and, on success, issues a credential.
    ///
    /// Steps, in order: field presence, freshness within the login window,
    /// identity lookup, signature check, `record_login`, credential issuance.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedRequest`] if `username` or `signature` is empty
    /// - [`AuthError::ReplayDetected`] if the timestamp is outside the window
    /// - [`AuthError::InvalidUserSignature`] for an unknown username or a bad
    ///   signature
    /// - [`AuthError::ResolverUnavailable`] if the Ledger is unreachable
    #[tracing::instrument(skip(self, request), fields(username = %request.username))]
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        if request.username.is_empty() || request.signature.is_empty() {
            return Err(AuthError::malformed_request(
                "username, timestamp, and signature are required",
            ));
        }

        let now = self.clock.now_secs();
        if let Err(err) = check_freshness(request.timestamp, now, self.window) {
            self.audit_failure(&request.username, "stale timestamp").await;
            return Err(err);
        }

        let identity = match self.ledger.lookup_identity(&request.username).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                tracing::warn!("login for unknown identity");
                self.audit_failure(&request.username, "unknown identity").await;
                return Err(AuthError::InvalidUserSignature);
            },
            Err(err) if err.is_transient() => return Err(AuthError::resolver_unavailable(err)),
            Err(err) => return Err(AuthError::Ledger(err)),
        };

        if !verify(&request.message(), &request.signature, &identity.public_key, identity.key_type) {
            tracing::warn!("login signature did not verify");
            self.audit_failure(&request.username, "invalid signature").await;
            return Err(AuthError::InvalidUserSignature);
        }

        self.ledger.record_login(identity.id, self.clock.now()).await?;
        let token = self.authority.issue(&identity)?;

        let event = AuditEvent::builder()
            .actor(identity.username.clone())
            .action(AuditAction::Login)
            .resource(identity_resource(&identity.username))
            .result(AuditResult::Success)
            .metadata(HashMap::from([("timestamp".to_owned(), request.timestamp.to_string())]))
            .build();
        self.audit.log(&event).await;

        tracing::info!(user_id = %identity.id, "login succeeded");
        Ok(LoginResponse {
            success: true,
            token,
            user: LoginUser { id: identity.id, username: identity.username },
        })
    }

    async fn audit_failure(&self, username: &str, reason: &str) {
        let event = AuditEvent::builder()
            .actor(username)
            .action(AuditAction::LoginFailed)
            .resource(identity_resource(username))
            .result(AuditResult::Failure(reason.to_owned()))
            .build();
        self.audit.log(&event).await;
    }
}
