//! Key derivation for session (AKE) keys.
//!
//! `dl_crypto::kdf` expands a root key into send/recv chain keys with HKDF;
//! this module follows the same shape to expand a DH shared secret into the
//! AES/MAC key pairs a `SessionKeys` cell needs. Real OTR derives these with
//! SHA-1 and a byte-tag scheme; we use HKDF-SHA256 with distinct `info`
//! strings instead — equivalent in effect (a domain-separated expand of the
//! same shared secret), and the data-message wire format (§6.3) does not
//! depend on how the keys were derived internally.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Derived key material for one direction of one `SessionKeys` cell.
#[derive(Clone, Copy)]
pub struct DirectionalKeys {
    pub aes_key: [u8; 16],
    pub mac_key: [u8; 20],
}

/// Derive the four keys (send AES/MAC, recv AES/MAC) for a cell from its raw
/// DH shared secret. `we_are_low` distinguishes which side's keys are the
/// "sending" half vs "receiving" half, since both participants compute the
/// same shared secret but must land on complementary sending/receiving keys
/// — mirroring OTR's `byte 0x01`..`0x04` derivation tags.
pub fn derive_cell_keys(
    shared_secret: &[u8],
    we_are_low: bool,
) -> Result<(DirectionalKeys, DirectionalKeys), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(b"otr-session-keys-v1"), shared_secret);

    let mut low_aes = [0u8; 16];
    let mut low_mac = [0u8; 20];
    let mut high_aes = [0u8; 16];
    let mut high_mac = [0u8; 20];

    hk.expand(b"low-aes", &mut low_aes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"low-mac", &mut low_mac)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"high-aes", &mut high_aes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    hk.expand(b"high-mac", &mut high_mac)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let low = DirectionalKeys { aes_key: low_aes, mac_key: low_mac };
    let high = DirectionalKeys { aes_key: high_aes, mac_key: high_mac };

    // The "low" half is always this participant's sending keys iff their DH
    // public key sorts lower than the peer's, matching OTR's tie-break rule
    // for which side is "Alice" for key derivation purposes.
    if we_are_low {
        Ok((low, high)) // (sending, receiving)
    } else {
        Ok((high, low))
    }
}

/// Derive the AKE secrets `(s, c, cp, m1, m2, m1p, m2p)` from the AKE DH
/// shared secret. Only `s` (the initial root secret fed forward into the
/// first `SessionKeys` cells) is used by `otr-core`; the others exist for a
/// `DefaultAuthContext` implementing message-encryption/MAC keys for the
/// reveal-signature/signature messages themselves.
pub fn derive_ake_secret(dh_shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(b"otr-ake-v1"), dh_shared_secret);
    let mut s = [0u8; 32];
    hk.expand(b"s", &mut s)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(s)
}

/// Derive the symmetric key used to hide the reveal-signature/signature
/// payload during the AKE, from the AKE secret `s`.
pub fn derive_sig_key(ake_secret: &[u8; 32]) -> Result<[u8; 16], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(b"otr-ake-v1"), ake_secret);
    let mut key = [0u8; 16];
    hk.expand(b"sig-key", &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// SHA-256 commitment hash used by DH-COMMIT to bind to a DH public key
/// before it is revealed.
pub fn commitment_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complementary_sides_derive_matching_send_recv_pairs() {
        let secret = b"shared-dh-secret-bytes";
        let (alice_send, alice_recv) = derive_cell_keys(secret, true).unwrap();
        let (bob_send, bob_recv) = derive_cell_keys(secret, false).unwrap();

        assert_eq!(alice_send.aes_key, bob_recv.aes_key);
        assert_eq!(alice_send.mac_key, bob_recv.mac_key);
        assert_eq!(alice_recv.aes_key, bob_send.aes_key);
        assert_eq!(alice_recv.mac_key, bob_send.mac_key);
    }
}
