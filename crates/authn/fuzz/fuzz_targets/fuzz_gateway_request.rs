//! Fuzz target for the request-side parsers.
//!
//! Arbitrary bytes are parsed as a forwarded request and pushed through the
//! gateway layer and the payload accessors. A random body must never pass
//! the envelope check, and nothing may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use zerotrust_authn::{
    LogicalPayload,
    canonical::canonical_value_bytes,
    envelope::{ENVELOPE_FIELD, TAG_FIELD, authenticate},
    padding::{PaddedPayload, unpad},
};

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let _ = canonical_value_bytes(&value);

    if let (Some(envelope), Some(Value::String(tag))) = (value.get(ENVELOPE_FIELD), value.get(TAG_FIELD)) {
        assert!(!authenticate(envelope, tag, b"fuzz-secret"));
    }

    if let Ok(padded) = serde_json::from_value::<PaddedPayload>(value.clone()) {
        let payload = unpad(padded);
        let _ = payload.token();
        let _ = payload.timestamp();
    }

    if let Ok(payload) = LogicalPayload::try_from(value) {
        let _ = payload.timestamp();
    }
});
