//! Holder-of-key signatures over canonical payloads.
//!
//! A client signs the canonical bytes of its logical payload (see
//! [`canonical`](crate::canonical)) with its private key; the service verifies
//! the same canonical bytes against the identity's registered public key.
//! Keys and signatures travel hex-encoded.
//!
//! The signature algorithm is a [`SignatureScheme`] strategy chosen by the
//! identity's explicit [`KeyType`] tag via [`scheme_for`], never by inspecting
//! key material.

use std::fmt;

use ed25519_dalek::{
    KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SIGNATURE_LENGTH, Signature, Signer,
    SigningKey, VerifyingKey,
};
use rand_core::OsRng;
use serde::Serialize;
use zeroize::Zeroizing;
use zerotrust_ledger::KeyType;

use crate::{
    canonical::to_canonical_bytes,
    error::{AuthError, Result},
};

/// A deterministic asymmetric signature algorithm.
pub trait SignatureScheme: Send + Sync {
    /// Tag identifying this scheme.
    fn key_type(&self) -> KeyType;

    /// Generates a fresh `(private_key, public_key)` pair.
    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>);

    /// Derives the public key from private key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPrivateKey`] for malformed key material.
    fn public_key(&self, private_key: &[u8]) -> Result<Vec<u8>>;

    /// Signs `message` with `private_key`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPrivateKey`] for malformed key material.
    fn sign(&self, message: &[u8], private_key: &[u8]) -> Result<Vec<u8>>;

    /// Returns `true` only if `signature` is valid for `message` under
    /// `public_key`. Malformed inputs yield `false`.
    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool;
}

/// Ed25519 (RFC 8032) via `ed25519-dalek`.
///
/// Private keys are accepted either as the 32-byte seed or as the 64-byte
/// `seed || public_key` layout used by NaCl-family libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Scheme;

impl Ed25519Scheme {
    fn signing_key(private_key: &[u8]) -> Result<SigningKey> {
        match private_key.len() {
            SECRET_KEY_LENGTH => {
                let mut seed = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
                seed.copy_from_slice(private_key);
                Ok(SigningKey::from_bytes(&seed))
            },
            KEYPAIR_LENGTH => {
                let mut keypair = Zeroizing::new([0u8; KEYPAIR_LENGTH]);
                keypair.copy_from_slice(private_key);
                SigningKey::from_keypair_bytes(&keypair).map_err(|_| {
                    AuthError::InvalidPrivateKey("keypair halves do not match".into())
                })
            },
            len => Err(AuthError::InvalidPrivateKey(format!(
                "expected {SECRET_KEY_LENGTH} or {KEYPAIR_LENGTH} bytes, got {len}"
            ))),
        }
    }
}

impl SignatureScheme for Ed25519Scheme {
    fn key_type(&self) -> KeyType {
        KeyType::Ed25519
    }

    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let private_key = Zeroizing::new(signing_key.to_bytes().to_vec());
        (private_key, signing_key.verifying_key().to_bytes().to_vec())
    }

    fn public_key(&self, private_key: &[u8]) -> Result<Vec<u8>> {
        Ok(Self::signing_key(private_key)?.verifying_key().to_bytes().to_vec())
    }

    fn sign(&self, message: &[u8], private_key: &[u8]) -> Result<Vec<u8>> {
        let signing_key = Self::signing_key(private_key)?;
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(public_key) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(public_key) else {
            return false;
        };
        let Ok(signature) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key) else {
            return false;
        };
        verifying_key.verify_strict(message, &Signature::from_bytes(&signature)).is_ok()
    }
}

/// Returns the scheme registered for `key_type`.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for key types this build does
/// not implement.
pub fn scheme_for(key_type: KeyType) -> Result<&'static dyn SignatureScheme> {
    match key_type {
        KeyType::Ed25519 => Ok(&Ed25519Scheme),
        other => Err(AuthError::UnsupportedAlgorithm(format!("no signature scheme for {other}"))),
    }
}

/// A user's asymmetric key pair.
///
/// The private half is zeroized on drop and redacted from `Debug` output.
#[derive(Clone)]
pub struct UserKeyPair {
    key_type: KeyType,
    private_key: Zeroizing<Vec<u8>>,
    public_key_hex: String,
}

impl UserKeyPair {
    /// Generates a fresh key pair for `key_type`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedAlgorithm`] for unknown key types.
    pub fn generate(key_type: KeyType) -> Result<Self> {
        let scheme = scheme_for(key_type)?;
        let (private_key, public_key) = scheme.generate();
        Ok(Self { key_type, private_key, public_key_hex: hex::encode(public_key) })
    }

    /// Loads a key pair from a hex-encoded private key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPrivateKey`] if the hex or key material is
    /// malformed.
    pub fn from_private_hex(key_type: KeyType, private_key_hex: &str) -> Result<Self> {
        let scheme = scheme_for(key_type)?;
        let private_key = Zeroizing::new(
            hex::decode(private_key_hex.trim())
                .map_err(|e| AuthError::InvalidPrivateKey(format!("invalid hex: {e}")))?,
        );
        let public_key = scheme.public_key(&private_key)?;
        Ok(Self { key_type, private_key, public_key_hex: hex::encode(public_key) })
    }

    /// Scheme this key pair belongs to.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Hex-encoded public key, as registered with the Ledger.
    #[must_use]
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// Signs the canonical form of `payload`, returning a hex signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Serialization`] if `payload` is not representable
    /// as JSON.
    pub fn sign<T: Serialize + ?Sized>(&self, payload: &T) -> Result<String> {
        let message = to_canonical_bytes(payload)?;
        let scheme = scheme_for(self.key_type)?;
        Ok(hex::encode(scheme.sign(&message, &self.private_key)?))
    }
}

impl fmt::Debug for UserKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserKeyPair")
            .field("key_type", &self.key_type)
            .field("public_key_hex", &self.public_key_hex)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Signs the canonical form of `payload` with `key_pair`.
///
/// # Errors
///
/// See [`UserKeyPair::sign`].
pub fn sign<T: Serialize + ?Sized>(payload: &T, key_pair: &UserKeyPair) -> Result<String> {
    key_pair.sign(payload)
}

/// Verifies a hex signature over the canonical form of `payload`.
///
/// Never panics and never errors: bad hex, wrong lengths, invalid curve
/// points, unknown key types and unserializable payloads all yield `false`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use zerotrust_authn::signer::{UserKeyPair, verify};
/// use zerotrust_ledger::KeyType;
///
/// let keys = UserKeyPair::generate(KeyType::Ed25519)?;
/// let payload = json!({"receiver": "bob", "amount": 500});
/// let signature = keys.sign(&payload)?;
///
/// assert!(verify(&payload, &signature, keys.public_key_hex(), KeyType::Ed25519));
/// assert!(!verify(&json!({"receiver": "eve", "amount": 500}), &signature, keys.public_key_hex(), KeyType::Ed25519));
/// # Ok::<(), zerotrust_authn::AuthError>(())
/// ```
#[must_use]
pub fn verify<T: Serialize + ?Sized>(
    payload: &T,
    signature_hex: &str,
    public_key_hex: &str,
    key_type: KeyType,
) -> bool {
    let Ok(scheme) = scheme_for(key_type) else {
        return false;
    };
    let Ok(message) = to_canonical_bytes(payload) else {
        return false;
    };
    let (Ok(signature), Ok(public_key)) = (hex::decode(signature_hex), hex::decode(public_key_hex))
    else {
        return false;
    };
    scheme.verify(&message, &signature, &public_key)
}
