//! Canonical JSON serialization.
//!
//! Every tag and signature in this crate is computed over the output of
//! [`to_canonical_bytes`]: compact JSON (no insignificant whitespace) with
//! object keys sorted by their UTF-8 bytes at every depth. Two parties that
//! agree on the logical value therefore agree on the signed bytes, whatever
//! order their serializer emits fields in.
//!
//! Scalars are written by `serde_json`. Integers are exact; callers that need
//! cross-language agreement should avoid non-integral numbers in signed
//! payloads.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Serializes `value` to canonical JSON bytes.
///
/// # Errors
///
/// Returns [`AuthError::Serialization`](crate::AuthError::Serialization) if
/// `value` cannot be represented as JSON (e.g. a map with non-string keys).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use zerotrust_authn::canonical::to_canonical_bytes;
///
/// let bytes = to_canonical_bytes(&json!({"b": 1, "a": {"d": [1, 2], "c": "x"}}))?;
/// assert_eq!(bytes, br#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
/// # Ok::<(), zerotrust_authn::AuthError>(())
/// ```
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    canonical_value_bytes(&value)
}

/// Canonical bytes of an already-parsed JSON value.
///
/// # Errors
///
/// Returns [`AuthError::Serialization`](crate::AuthError::Serialization) if
/// writing a scalar fails.
pub fn canonical_value_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(out, item)?;
            }
            out.push(b'}');
        },
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        },
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
