//! Wire encoding for the OTR session engine: binary primitives, message
//! framing, TLVs, the base64 envelope/query/whitespace-tag grammar, and
//! fragmentation.
//!
//! Module layout mirrors `dl_proto`: a `binary` primitive layer, a
//! `message` type layer built on it, a `codec` layer for the outermost
//! text grammar, and `tlv`/`fragment` as independent concerns bolted onto
//! the message layer.

pub mod binary;
pub mod codec;
pub mod error;
pub mod fragment;
pub mod message;
pub mod tlv;

pub use error::ProtoError;
pub use message::{AkeKind, AkeMessage, DataMessage, ErrorMessage, Message, QueryMessage};
