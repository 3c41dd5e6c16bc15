//! Edge-to-service envelope authentication.
//!
//! The edge wraps every client request in an [`Envelope`] with arrival
//! metadata and tags the whole envelope with HMAC-SHA256 under a secret
//! shared only between edge and service. The tag is computed over the
//! canonical serialization, so any byte-level change to the client request
//! or the metadata invalidates it.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "gateway_envelope": {
//!     "original_request": {
//!       "meta": {},
//!       "protected_payload": {"data": {...}, "padding": "...", "originalSize": 87},
//!       "user_signature": "<hex>"
//!     },
//!     "gateway_metadata": {
//!       "arrival_time": 1700000000,
//!       "route_id": "route_transfer",
//!       "gateway_id": "gateway-001",
//!       "client_ip": "203.0.113.7"
//!     }
//!   },
//!   "gateway_hmac": "<hex>"
//! }
//! ```

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{
    canonical::{canonical_value_bytes, to_canonical_bytes},
    config::PipelineConfig,
    error::{AuthError, ConfigError, Result},
    padding::{DEFAULT_PADDING_TARGET, PaddedPayload, check_padded_size},
};

type HmacSha256 = Hmac<Sha256>;

/// Default edge identifier.
pub const DEFAULT_GATEWAY_ID: &str = "gateway-001";

/// Field holding the envelope in a [`GatewayRequest`].
pub const ENVELOPE_FIELD: &str = "gateway_envelope";

/// Field holding the envelope tag in a [`GatewayRequest`].
pub const TAG_FIELD: &str = "gateway_hmac";

/// What the client sends to the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    /// Free-form client metadata. Not signed by the user.
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// The padded, signed payload.
    pub protected_payload: PaddedPayload,
    /// Hex user signature over the unpadded payload.
    pub user_signature: String,
}

/// Arrival metadata added by the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayMetadata {
    /// Unix seconds at which the edge received the request.
    pub arrival_time: u64,
    /// Route the request arrived on, `route_<endpoint>`.
    pub route_id: String,
    /// Identifier of the edge instance.
    pub gateway_id: String,
    /// Client address as seen by the edge.
    pub client_ip: String,
}

/// A client request wrapped by the edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The request exactly as the client sent it.
    pub original_request: ClientRequest,
    /// Edge metadata.
    pub gateway_metadata: GatewayMetadata,
}

/// An envelope plus its tag, as forwarded to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// The wrapped request.
    pub gateway_envelope: Envelope,
    /// Hex HMAC-SHA256 over the canonical envelope.
    pub gateway_hmac: String,
}

/// Wraps a client request with edge metadata.
#[must_use]
pub fn wrap(original_request: ClientRequest, gateway_metadata: GatewayMetadata) -> Envelope {
    Envelope { original_request, gateway_metadata }
}

/// Computes the hex HMAC-SHA256 tag over the canonical form of `envelope`.
///
/// # Errors
///
/// Returns an error if `envelope` cannot be serialized.
pub fn compute_tag<T: Serialize + ?Sized>(envelope: &T, secret: &[u8]) -> Result<String> {
    let message = to_canonical_bytes(envelope)?;
    Ok(hex::encode(mac(secret, &message)?.finalize().into_bytes()))
}

/// Checks `tag_hex` against the envelope as received.
///
/// Takes the raw JSON value so the tag covers exactly the bytes that
/// arrived, including fields a typed parse would drop. Comparison is
/// constant time. Malformed hex is a mismatch.
#[must_use]
pub fn authenticate(envelope: &Value, tag_hex: &str, secret: &[u8]) -> bool {
    let Ok(tag) = hex::decode(tag_hex) else {
        return false;
    };
    let Ok(message) = canonical_value_bytes(envelope) else {
        return false;
    };
    let Ok(mac) = mac(secret, &message) else {
        return false;
    };
    mac.verify_slice(&tag).is_ok()
}

fn mac(secret: &[u8], message: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| AuthError::internal(format!("invalid HMAC key: {e}")))?;
    mac.update(message);
    Ok(mac)
}

/// The edge side of envelope authentication.
///
/// ```
/// use zerotrust_authn::envelope::{EdgeAuthenticator, authenticate};
/// # use zerotrust_authn::{LogicalPayload, envelope::ClientRequest, padding::pad};
/// # let request = ClientRequest {
/// #     meta: Default::default(),
/// #     protected_payload: pad(&LogicalPayload::new(), 4096)?,
/// #     user_signature: "00".into(),
/// # };
///
/// let edge = EdgeAuthenticator::new(b"S", "gateway-001");
/// let forwarded = edge.forward(request, "transfer", "203.0.113.7", 1_700_000_000)?;
///
/// assert_eq!(forwarded.gateway_envelope.gateway_metadata.route_id, "route_transfer");
/// let value = serde_json::to_value(&forwarded.gateway_envelope)?;
/// assert!(authenticate(&value, &forwarded.gateway_hmac, b"S"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct EdgeAuthenticator {
    secret: Zeroizing<Vec<u8>>,
    gateway_id: String,
    padding_target: usize,
}

impl fmt::Debug for EdgeAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeAuthenticator")
            .field("gateway_id", &self.gateway_id)
            .field("padding_target", &self.padding_target)
            .finish_non_exhaustive()
    }
}

impl EdgeAuthenticator {
    /// Creates an edge holding `secret`, identifying itself as `gateway_id`
    /// and expecting payloads padded to [`DEFAULT_PADDING_TARGET`].
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>, gateway_id: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_ref().to_vec()),
            gateway_id: gateway_id.into(),
            padding_target: DEFAULT_PADDING_TARGET,
        }
    }

    /// Creates an edge expecting the configured `padding_target`.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] from [`PipelineConfig::validate`].
    pub fn from_config(
        secret: impl AsRef<[u8]>,
        gateway_id: impl Into<String>,
        config: &PipelineConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(secret, gateway_id).with_padding_target(config.padding_target()))
    }

    /// Sets the padded size requests must arrive with.
    #[must_use]
    pub fn with_padding_target(mut self, padding_target: usize) -> Self {
        self.padding_target = padding_target;
        self
    }

    /// This edge's identifier.
    #[must_use]
    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Padded size requests must arrive with.
    #[must_use]
    pub fn padding_target(&self) -> usize {
        self.padding_target
    }

    /// Wraps and tags a client request that arrived on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedRequest`] if the request carries no
    /// user signature or is not padded to this edge's target size, or a
    /// serialization error from tagging.
    #[tracing::instrument(skip(self, request), fields(gateway_id = %self.gateway_id))]
    pub fn forward(
        &self,
        request: ClientRequest,
        endpoint: &str,
        client_ip: &str,
        arrival_time: u64,
    ) -> Result<GatewayRequest> {
        if request.user_signature.is_empty() {
            return Err(AuthError::malformed_request("invalid request structure"));
        }
        check_padded_size(&request.protected_payload, self.padding_target)?;

        let envelope = wrap(
            request,
            GatewayMetadata {
                arrival_time,
                route_id: format!("route_{endpoint}"),
                gateway_id: self.gateway_id.clone(),
                client_ip: client_ip.to_owned(),
            },
        );
        let gateway_hmac = compute_tag(&envelope, &self.secret)?;

        tracing::debug!(route_id = %envelope.gateway_metadata.route_id, "Envelope tagged");
        Ok(GatewayRequest { gateway_envelope: envelope, gateway_hmac })
    }
}
