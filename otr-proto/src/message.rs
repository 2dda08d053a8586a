//! On-wire message types carried inside the OTR-encoded envelope, plus the
//! plaintext-adjacent Query/Error/whitespace-tagged forms.
//!
//! Shaped after `dl_proto::envelope::Envelope` / `dl_proto::message` (one
//! struct per wire concept, `serde`-free here since OTR's wire format is a
//! fixed binary layout, not JSON).

use crate::binary::{Reader, Writer};
use crate::error::ProtoError;

/// OTR message-type tag bytes (bit-exact with OTRv2/v3).
pub mod type_tag {
    pub const DH_COMMIT: u8 = 0x02;
    pub const DATA: u8 = 0x03;
    pub const DH_KEY: u8 = 0x0a;
    pub const REVEAL_SIGNATURE: u8 = 0x11;
    pub const SIGNATURE: u8 = 0x12;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AkeKind {
    DhCommit,
    DhKey,
    RevealSignature,
    Signature,
}

impl AkeKind {
    pub fn tag(self) -> u8 {
        match self {
            AkeKind::DhCommit => type_tag::DH_COMMIT,
            AkeKind::DhKey => type_tag::DH_KEY,
            AkeKind::RevealSignature => type_tag::REVEAL_SIGNATURE,
            AkeKind::Signature => type_tag::SIGNATURE,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            type_tag::DH_COMMIT => Some(AkeKind::DhCommit),
            type_tag::DH_KEY => Some(AkeKind::DhKey),
            type_tag::REVEAL_SIGNATURE => Some(AkeKind::RevealSignature),
            type_tag::SIGNATURE => Some(AkeKind::Signature),
            _ => None,
        }
    }
}

/// An AKE protocol message. Its `body` is opaque to this crate — it is
/// produced and consumed entirely by `otr-core`'s `AuthContext`, per the
/// spec's "the core consumes an opaque AuthContext" design (§1, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkeMessage {
    pub version: u8,
    pub sender_instance_tag: u32,
    pub receiver_instance_tag: u32,
    pub kind: AkeKind,
    pub body: Vec<u8>,
}

/// A data message (§4.4/§4.5/§6.3) — bit-exact layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub version: u8,
    pub sender_instance_tag: u32,
    pub receiver_instance_tag: u32,
    pub flags: u8,
    pub sender_keyid: u32,
    pub recipient_keyid: u32,
    pub next_dh_public: Vec<u8>,
    pub counter_top_half: u64,
    pub encrypted_message: Vec<u8>,
    pub mac: [u8; 20],
    pub old_mac_keys: Vec<u8>,
}

impl DataMessage {
    /// Serialize the portion that is MAC-authenticated (`T` in §4.4/§4.5):
    /// everything up to and including the encrypted message, i.e. everything
    /// except the MAC itself and the reveal field.
    pub fn authenticated_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.short(self.version as u16);
        w.byte(type_tag::DATA);
        if self.version == 3 {
            w.int(self.sender_instance_tag);
            w.int(self.receiver_instance_tag);
        }
        w.byte(self.flags);
        w.int(self.sender_keyid);
        w.int(self.recipient_keyid);
        w.mpi(&self.next_dh_public);
        w.long_top_half(self.counter_top_half);
        w.data(&self.encrypted_message);
        w.into_bytes()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.authenticated_bytes();
        bytes.extend_from_slice(&self.mac);
        let mut w = Writer::new();
        w.data(&self.old_mac_keys);
        bytes.extend_from_slice(w.as_slice());
        bytes
    }

    pub fn decode(version: u8, sender_instance_tag: u32, receiver_instance_tag: u32, mut r: Reader) -> Result<Self, ProtoError> {
        let flags = r.byte()?;
        let sender_keyid = r.int()?;
        let recipient_keyid = r.int()?;
        let next_dh_public = r.mpi()?;
        let counter_top_half = r.long_top_half()?;
        let encrypted_message = r.data()?;
        let mac_bytes = {
            let remaining = r.remaining();
            if remaining.len() < 20 {
                return Err(ProtoError::MalformedFrame("data message truncated before MAC".into()));
            }
            let mac = remaining[..20].to_vec();
            r.skip(20)?;
            mac
        };
        let old_mac_keys = r.data()?;
        let mut mac = [0u8; 20];
        mac.copy_from_slice(&mac_bytes);
        Ok(Self {
            version,
            sender_instance_tag,
            receiver_instance_tag,
            flags,
            sender_keyid,
            recipient_keyid,
            next_dh_public,
            counter_top_half,
            encrypted_message,
            mac,
            old_mac_keys,
        })
    }
}

/// An in-band OTR error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub text: String,
}

/// A query message listing the protocol versions a peer is willing to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    pub versions: Vec<u8>,
}

/// Top-level classification of one reassembled inbound/outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Query(QueryMessage),
    Error(ErrorMessage),
    PlainText(String),
    Ake(AkeMessage),
    Data(DataMessage),
}
