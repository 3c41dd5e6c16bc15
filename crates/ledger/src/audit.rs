//! Audit trail for authentication decisions.
//!
//! Logins, credential issuance and administrative key-cache operations are
//! recorded as [`AuditEvent`]s through an [`AuditLogger`]. Per-request
//! verification rejections are not audited here; they are logged through
//! `tracing` by the pipeline.
//!
//! # Usage
//!
//! ```no_run
//! use zerotrust_ledger::audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("alice")
//!     .action(AuditAction::Login)
//!     .resource(zerotrust_ledger::audit::identity_resource("alice"))
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Action recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuditAction {
    /// A login attempt succeeded and a credential was issued.
    Login,
    /// A login attempt was rejected.
    LoginFailed,
    /// A single public-key cache entry was invalidated.
    InvalidateKeyCache,
    /// The whole public-key cache was cleared.
    ClearKeyCache,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login_success"),
            Self::LoginFailed => write!(f, "login_failed"),
            Self::InvalidateKeyCache => write!(f, "invalidate_key_cache"),
            Self::ClearKeyCache => write!(f, "clear_key_cache"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Who performed the action (username, service name, or "system").
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier, e.g. `identity:alice`.
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context such as client address.
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

/// Audit log backend.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events at `INFO`.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation, e.g. `login`
/// - `audit.resource`: what was affected
/// - `audit.result`: `success` or `failure: ...`
/// - `audit.metadata`: `k=v` pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let mut pairs: Vec<_> = event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        let metadata_str = pairs.join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// Audit logger that keeps events in memory, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLogger {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded actions, oldest first.
    #[must_use]
    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|event| event.action).collect()
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Resource identifier for an identity.
pub fn identity_resource(username: &str) -> String {
    format!("identity:{username}")
}
