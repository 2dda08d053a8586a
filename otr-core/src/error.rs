use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("wire error: {0}")]
    Wire(#[from] otr_proto::ProtoError),

    #[error("crypto error: {0}")]
    Crypto(#[from] otr_crypto::CryptoError),

    #[error("no session-keys cell matches (recipientKeyId={recipient_key_id}, senderKeyId={sender_key_id})")]
    NoMatchingCell { recipient_key_id: u32, sender_key_id: u32 },

    #[error("MAC verification failed on inbound data message")]
    AuthenticationFailure,

    #[error("receiving counter regressed for this key cell")]
    CounterRegression,

    #[error("operation not legal in current session status")]
    PolicyRefusal,

    #[error("unsupported or unrecognized message kind")]
    Unsupported,
}
