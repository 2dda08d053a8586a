//! otr-crypto — low-level cryptographic primitives for the OTR session engine
//!
//! # Design principles
//! - No novel cryptography: DH, AES-CTR, HMAC-SHA1 and HKDF all come from
//!   audited crates.
//! - Secret material is zeroized on drop.
//! - Public types are opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `dh`       — DH keypair generation and shared-secret computation over
//!                the OTR 1536-bit MODP group
//! - `aes_ctr`  — AES-128-CTR encrypt/decrypt helpers
//! - `mac`      — HMAC-SHA1, truncated to the wire MAC length
//! - `kdf`      — session-key and AKE-secret derivation
//! - `identity` — long-term Ed25519 identity keys used by the AKE's
//!                SIGNATURE message
//! - `error`    — unified error type

pub mod aes_ctr;
pub mod dh;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod mac;

pub use error::CryptoError;
