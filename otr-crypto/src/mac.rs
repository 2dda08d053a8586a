//! HMAC-SHA1, truncated to the wire MAC length (20 bytes — full SHA1 output
//! for data messages, per OTRv2/v3).

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::CryptoError;

type HmacSha1 = Hmac<Sha1>;

pub const MAC_LEN: usize = 20;

/// Compute the HMAC-SHA1 over `data` with `key`, truncated to `MAC_LEN` bytes.
pub fn compute(key: &[u8; MAC_LEN], data: &[u8]) -> Result<[u8; MAC_LEN], CryptoError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut truncated = [0u8; MAC_LEN];
    truncated.copy_from_slice(&out[..MAC_LEN]);
    Ok(truncated)
}

/// Constant-time verification of a received MAC.
pub fn verify(key: &[u8; MAC_LEN], data: &[u8], expected: &[u8]) -> Result<bool, CryptoError> {
    if expected.len() != MAC_LEN {
        return Ok(false);
    }
    let computed = compute(key, data)?;
    let mut diff = 0u8;
    for (a, b) in computed.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    Ok(diff == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_mac() {
        let key = [1u8; MAC_LEN];
        let data = b"a data message T value";
        let mac = compute(&key, data).unwrap();
        assert!(verify(&key, data, &mac).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let key = [1u8; MAC_LEN];
        let mac = compute(&key, b"original").unwrap();
        assert!(!verify(&key, b"tampered", &mac).unwrap());
    }
}
