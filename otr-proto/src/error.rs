use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed on-wire frame: {0}")]
    MalformedFrame(String),

    #[error("unknown message type byte: {0:#x}")]
    UnknownMessageType(u8),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("unexpected end of buffer while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("invalid fragment: {0}")]
    InvalidFragment(String),

    #[error("fragment references an instance this host is not tracking")]
    UnknownInstance,
}
