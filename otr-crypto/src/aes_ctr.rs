//! AES-128-CTR, OTR's data-message cipher.
//!
//! The wire only ever carries the top 8 bytes of the 16-byte big-endian CTR
//! counter (the low 8 bytes are implicitly zero at the start of each
//! message); this module accepts that top half and does the zero-padding
//! itself, mirroring `dl_crypto::aead`'s "helpers over a fixed wire layout"
//! shape.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::Aes128;
use ctr::Ctr128BE;

use crate::error::CryptoError;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Build the full 16-byte IV from the wire's 8-byte counter top half.
fn iv_from_counter(counter_top_half: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&counter_top_half.to_be_bytes());
    iv
}

/// Encrypt (or decrypt — CTR mode is symmetric) `data` in place under `key`
/// starting at the given counter top half.
pub fn apply_keystream(
    key: &[u8; 16],
    counter_top_half: u64,
    data: &mut [u8],
) -> Result<(), CryptoError> {
    let iv = iv_from_counter(counter_top_half);
    let mut cipher = Aes128Ctr::new(key.into(), &iv.into());
    cipher.apply_keystream(data);
    Ok(())
}

/// Encrypt `plaintext`, returning a freshly allocated ciphertext of the same
/// length.
pub fn encrypt(key: &[u8; 16], counter_top_half: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = plaintext.to_vec();
    apply_keystream(key, counter_top_half, &mut buf)?;
    Ok(buf)
}

/// Decrypt `ciphertext` (identical operation to `encrypt` under CTR mode).
pub fn decrypt(key: &[u8; 16], counter_top_half: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt(key, counter_top_half, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [7u8; 16];
        let pt = b"hello otr world";
        let ct = encrypt(&key, 1, pt).unwrap();
        assert_ne!(ct, pt);
        let rt = decrypt(&key, 1, &ct).unwrap();
        assert_eq!(rt, pt);
    }

    #[test]
    fn different_counters_produce_different_ciphertext() {
        let key = [7u8; 16];
        let pt = b"same plaintext..";
        let ct1 = encrypt(&key, 1, pt).unwrap();
        let ct2 = encrypt(&key, 2, pt).unwrap();
        assert_ne!(ct1, ct2);
    }
}
