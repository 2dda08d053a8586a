use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("DH key generation failed: {0}")]
    KeyGeneration(String),

    #[error("DH public key out of range for the negotiated group")]
    InvalidDhPublicKey,

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("AES-CTR operation failed: {0}")]
    Cipher(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
