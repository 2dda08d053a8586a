//! Diffie-Hellman key agreement over the OTR 1536-bit MODP group.
//!
//! This is the group OTRv2/v3 standardised (RFC 3526 group 5). The core
//! treats DH key material as opaque; only this module and `otr-core::keys`
//! know the encoding.

use num_bigint_dig::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// `g` — the generator for the OTR DH group.
const GENERATOR: u64 = 2;

/// `p` — RFC 3526 1536-bit MODP group prime, as used by OTRv2/v3.
const MODULUS_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD",
    "129024E088A67CC74020BBEA63B139B22514A08798E3404",
    "DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C",
    "245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406",
    "B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE",
    "45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD",
    "24CF5F83655D23DCA3AD961C62F356208552BB9ED529077",
    "096966D670C354E4ABC9804F1746C08CA18217C32905E46",
    "2E36CE3BE39E772C180E86039B2783A2EC07A28FB5C55DF",
    "06F4C52C9DE2BCBF6955817183995497CEA956AE515D225",
    "6D6EF15CE30C3D72CA8EC09DB7DFEA9E7D0AFA76BEB4B53",
    "7AA6C1032303E7ECE9B8D31D68EB78A8F9F54F28EE6DA10",
    "8F3C1B0D795CCD10CDCF0F57F27A8EC85CD5C7D99",
);

fn p() -> BigUint {
    BigUint::parse_bytes(MODULUS_HEX.as_bytes(), 16).expect("static DH modulus is valid hex")
}

fn g() -> BigUint {
    BigUint::from(GENERATOR)
}

/// An OTR DH keypair. The secret half is zeroized on drop.
///
/// `Clone` is needed because `otr-core`'s key matrix shares a local keypair
/// across more than one matrix cell at a time (ratchet bookkeeping copies
/// the pair, not just its public half).
#[derive(Clone, ZeroizeOnDrop)]
pub struct DhKeypair {
    #[zeroize(skip)]
    public: BigUint,
    secret: BigUint,
}

impl DhKeypair {
    /// Generate a fresh keypair, with a 320-bit secret exponent (the value
    /// libotr itself uses: large enough relative to group order, small
    /// enough to keep modexp cheap).
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = OsRng;
        let secret = rng.gen_biguint(320);
        let public = g().modpow(&secret, &p());
        Ok(Self { public, secret })
    }

    pub fn public(&self) -> DhPublicKey {
        DhPublicKey(self.public.clone())
    }

    /// Compute the raw DH shared secret `g^(ab) mod p` against a peer's
    /// public key, as big-endian bytes.
    pub fn shared_secret(&self, their_public: &DhPublicKey) -> Result<Vec<u8>, CryptoError> {
        their_public.validate()?;
        let shared = their_public.0.modpow(&self.secret, &p());
        Ok(shared.to_bytes_be())
    }
}

/// An OTR DH public key (a group element, encoded as an MPI on the wire).
///
/// `Ord` compares the underlying group element as an unsigned integer; the
/// AKE key-derivation step uses this to decide which side is "low"/"high"
/// (§4.3 of the session-key derivation scheme).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DhPublicKey(BigUint);

impl DhPublicKey {
    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes))
    }

    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    /// Reject `1` and values outside `[2, p-2]`, per OTR's group-membership
    /// check on received public keys.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let modulus = p();
        let two = BigUint::from(2u8);
        if self.0 < two || self.0 > modulus.clone() - two {
            return Err(CryptoError::InvalidDhPublicKey);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_secret_agrees() {
        let alice = DhKeypair::generate().unwrap();
        let bob = DhKeypair::generate().unwrap();

        let s1 = alice.shared_secret(&bob.public()).unwrap();
        let s2 = bob.shared_secret(&alice.public()).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn rejects_degenerate_public_key() {
        let bad = DhPublicKey::from_bytes_be(&[1]);
        assert!(bad.validate().is_err());
    }
}
