//! Long-term identity keys used by the AKE's SIGNATURE message.
//!
//! OTR's real AKE signs with a DSA key wrapped in a custom MPI encoding;
//! this workspace uses Ed25519 instead (the AKE's cryptographic internals
//! are explicitly out of this spec's scope — only the wire *shape* of the
//! AKE messages and the resulting session keys matter here). Shaped after
//! `dl_crypto::identity::IdentityKeyPair`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// A long-term identity public key, opaque to the core beyond equality and
/// a human-readable fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LongTermPublicKey(pub Vec<u8>);

impl LongTermPublicKey {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "long-term public key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Human-verifiable fingerprint: BLAKE3 of the key, truncated to 20
    /// bytes, hex-grouped for display. Display-only — no protocol role.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Long-term identity signing key. Zeroized on drop.
///
/// `Clone` lets a master session share its identity key with slave sessions
/// spawned for other instances of the same peer conversation.
#[derive(Clone, ZeroizeOnDrop)]
pub struct LongTermKeyPair {
    #[zeroize(skip)]
    pub public: LongTermPublicKey,
    secret_bytes: [u8; 32],
}

impl LongTermKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = LongTermPublicKey(signing_key.verifying_key().to_bytes().to_vec());
        Self { public, secret_bytes: signing_key.to_bytes() }
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.secret_bytes).sign(msg).to_bytes().to_vec()
    }

    pub fn verify(public: &LongTermPublicKey, msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let public_arr: [u8; 32] = public
            .0
            .clone()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("bad public key length".into()))?;
        let vk = VerifyingKey::from_bytes(&public_arr)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig_arr: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("bad signature length".into()))?;
        let sig = Signature::from_bytes(&sig_arr);
        vk.verify(msg, &sig).map_err(|_| CryptoError::SignatureVerification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = LongTermKeyPair::generate();
        let sig = kp.sign(b"hello");
        LongTermKeyPair::verify(&kp.public, b"hello", &sig).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let kp = LongTermKeyPair::generate();
        let sig = kp.sign(b"hello");
        assert!(LongTermKeyPair::verify(&kp.public, b"goodbye", &sig).is_err());
    }

    #[test]
    fn fingerprint_is_stable() {
        let kp = LongTermKeyPair::generate();
        assert_eq!(kp.public.fingerprint(), kp.public.fingerprint());
    }
}
