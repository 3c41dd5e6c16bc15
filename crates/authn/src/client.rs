//! Client-side request construction.
//!
//! Order matters: the payload is signed first, padded second. The signature
//! therefore covers only the logical payload, and the service checks it
//! against the payload after stripping the filler.

use serde_json::{Map, Value};

use crate::{
    envelope::ClientRequest,
    error::Result,
    login::{LoginMessage, LoginRequest},
    padding::pad,
    payload::LogicalPayload,
    signer::UserKeyPair,
};

/// Signs, pads and wraps `payload` for sending to the edge.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized or signed.
///
/// # Examples
///
/// ```
/// use zerotrust_authn::{LogicalPayload, client::seal_request, signer::UserKeyPair};
/// use zerotrust_ledger::KeyType;
///
/// let keys = UserKeyPair::generate(KeyType::Ed25519)?;
/// let payload = LogicalPayload::new().with("receiver", "bob").with("amount", 500);
///
/// let request = seal_request(&payload, &keys, Default::default(), 4096)?;
/// assert_eq!(request.protected_payload.data, payload);
/// # Ok::<(), zerotrust_authn::AuthError>(())
/// ```
pub fn seal_request(
    payload: &LogicalPayload,
    key_pair: &UserKeyPair,
    meta: Map<String, Value>,
    target_size: usize,
) -> Result<ClientRequest> {
    let user_signature = key_pair.sign(payload)?;
    let protected_payload = pad(payload, target_size)?;
    Ok(ClientRequest { meta, protected_payload, user_signature })
}

/// Builds a signed login request.
///
/// The signature covers the canonical `{"timestamp":…,"username":…}` object.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn sign_login(username: &str, timestamp: u64, key_pair: &UserKeyPair) -> Result<LoginRequest> {
    let signature = key_pair.sign(&LoginMessage { timestamp, username })?;
    Ok(LoginRequest { username: username.to_owned(), timestamp, signature })
}
