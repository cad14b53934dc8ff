//! Ed25519 signing primitives used by the SSH certificate authority.
//!
//! Thin wrapper over `ed25519-dalek` that keeps key material off of
//! `Debug` output and gives the CA a `Sha256` digest helper for CA
//! public-key fingerprinting.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    #[error("signature verification failed")]
    VerificationFailed,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// An Ed25519 signing key.
///
/// Key bytes are wrapped in `Zeroizing` on extraction so callers writing
/// them to a credential file don't leave a long-lived plaintext copy
/// sitting in a heap allocation the Rust allocator might reuse silently.
pub struct SigningKeypair {
    inner: SigningKey,
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("inner", &"<redacted>")
            .finish()
    }
}

impl SigningKeypair {
    /// Generates a new keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a keypair from a 32-byte seed, e.g. read back from a
    /// credential file on disk.
    pub fn from_bytes(seed: &[u8; 32]) -> Result<Self> {
        if seed == &[0u8; 32] {
            return Err(CryptoError::InvalidKey("all-zero seed".to_string()));
        }
        Ok(Self {
            inner: SigningKey::from_bytes(seed),
        })
    }

    /// Returns the 32-byte seed, wrapped so it is zeroized on drop.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.inner.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKeyWrapper {
        VerifyingKeyWrapper {
            inner: self.inner.verifying_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> SignatureWrapper {
        SignatureWrapper {
            inner: self.inner.sign(message),
        }
    }
}

/// An Ed25519 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyingKeyWrapper {
    inner: VerifyingKey,
}

impl VerifyingKeyWrapper {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner =
            VerifyingKey::from_bytes(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &SignatureWrapper) -> Result<()> {
        self.inner
            .verify_strict(message, &signature.inner)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    /// SHA-256 fingerprint of the raw public key bytes, as recorded against
    /// a source VM's `ca_fingerprint_at_prepare` to detect CA rotation.
    pub fn fingerprint_hex(&self) -> String {
        sha256_hex(&self.inner.to_bytes())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureWrapper {
    inner: Signature,
}

impl SignatureWrapper {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: Signature::from_bytes(bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

/// Hex-encoded SHA-256 digest, used for token hashing (§6 bearer-token
/// authorization) as well as CA key fingerprinting.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let key = SigningKeypair::generate();
        let vk = key.verifying_key();
        let message = b"issue a sandbox certificate";

        let sig = key.sign(message);
        assert!(vk.verify(message, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let key = SigningKeypair::generate();
        let vk = key.verifying_key();

        let sig = key.sign(b"original");
        assert!(vk.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key1 = SigningKeypair::generate();
        let key2 = SigningKeypair::generate();
        let vk2 = key2.verifying_key();

        let sig = key1.sign(b"message");
        assert!(vk2.verify(b"message", &sig).is_err());
    }

    #[test]
    fn rejects_all_zero_seed() {
        assert!(SigningKeypair::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn fingerprint_is_stable_for_same_key() {
        let key = SigningKeypair::generate();
        let vk = key.verifying_key();
        assert_eq!(vk.fingerprint_hex(), vk.fingerprint_hex());
    }

    #[test]
    fn fingerprint_differs_across_keys() {
        let vk1 = SigningKeypair::generate().verifying_key();
        let vk2 = SigningKeypair::generate().verifying_key();
        assert_ne!(vk1.fingerprint_hex(), vk2.fingerprint_hex());
    }

    #[test]
    fn sha256_hex_is_64_lowercase_hex_chars() {
        let digest = sha256_hex(b"hello");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_sign_verify_roundtrip(message in prop::collection::vec(any::<u8>(), 0..4096)) {
            let key = SigningKeypair::generate();
            let vk = key.verifying_key();
            let sig = key.sign(&message);
            prop_assert!(vk.verify(&message, &sig).is_ok());
        }

        #[test]
        fn prop_tampered_signature_fails(
            message in prop::collection::vec(any::<u8>(), 1..256),
            tamper_index in 0usize..64,
            tamper_xor in 1u8..=255,
        ) {
            let key = SigningKeypair::generate();
            let vk = key.verifying_key();
            let sig = key.sign(&message);
            let mut bytes = sig.to_bytes();
            bytes[tamper_index] ^= tamper_xor;
            let tampered = SignatureWrapper::from_bytes(&bytes);
            prop_assert!(vk.verify(&message, &tampered).is_err());
        }
    }
}
