//! Size normalization for protected payloads.
//!
//! Payloads are padded to a fixed size so that request length does not leak
//! which operation a client performed. Padding is applied to an
//! already-signed payload and removed before the signature is checked, so
//! the random filler never enters the signed bytes.
//!
//! ```
//! use zerotrust_authn::{LogicalPayload, padding::{pad, unpad}};
//!
//! let payload = LogicalPayload::new().with("receiver", "bob").with("amount", 500);
//! let padded = pad(&payload, 4096)?;
//!
//! assert_eq!(zerotrust_authn::canonical::to_canonical_bytes(&padded)?.len(), 4096);
//! assert_eq!(unpad(padded), payload);
//! # Ok::<(), zerotrust_authn::AuthError>(())
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    canonical::to_canonical_bytes,
    error::{AuthError, Result},
    payload::LogicalPayload,
};

/// Default padded size in bytes.
pub const DEFAULT_PADDING_TARGET: usize = 4096;

/// A logical payload plus random filler.
///
/// Field order matches canonical key order, so plain and canonical
/// serialization have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddedPayload {
    /// The signed payload.
    pub data: LogicalPayload,
    /// Canonical length of `data` in bytes.
    #[serde(rename = "originalSize")]
    pub original_size: usize,
    /// Random lowercase hex filler.
    #[serde(default)]
    pub padding: String,
}

/// Pads `payload` so its canonical serialization is `target_size` bytes.
///
/// When the payload alone is already `target_size` or larger, or there is no
/// room for filler, padding is empty and the size is left as is.
///
/// # Errors
///
/// Returns [`AuthError::Serialization`](crate::AuthError::Serialization) if
/// the payload cannot be serialized.
pub fn pad(payload: &LogicalPayload, target_size: usize) -> Result<PaddedPayload> {
    let original_size = to_canonical_bytes(payload)?.len();
    let mut padded =
        PaddedPayload { data: payload.clone(), original_size, padding: String::new() };

    if original_size >= target_size {
        return Ok(padded);
    }

    let base_size = to_canonical_bytes(&padded)?.len();
    if let Some(fill) = target_size.checked_sub(base_size).filter(|fill| *fill > 0) {
        padded.padding = random_hex(fill);
    }

    Ok(padded)
}

/// Checks that `padded` has the size [`pad`] produces for `target_size`.
///
/// A payload that could not be padded down to the target passes only with
/// empty filler.
///
/// # Errors
///
/// Returns [`AuthError::MalformedRequest`] for any other size.
pub fn check_padded_size(padded: &PaddedPayload, target_size: usize) -> Result<()> {
    let size = to_canonical_bytes(padded)?.len();
    if size == target_size || (size > target_size && padded.padding.is_empty()) {
        return Ok(());
    }
    Err(AuthError::malformed_request("payload not padded to the required size"))
}

/// Strips filler, returning the signed payload.

#[must_use]
pub fn unpad(padded: PaddedPayload) -> LogicalPayload {
    padded.data
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len.div_ceil(2)];
    rand::rng().fill(bytes.as_mut_slice());
    let mut encoded = hex::encode(bytes);
    encoded.truncate(len);
    encoded
}
