//! TLV (type, length, value) records appended to data messages.
//!
//! Generalizes the tagged-content shape of `dl_proto::message::MessageContent`
//! to OTR's raw `u16` type / `u16` length / opaque value framing (§6.3).

use crate::binary::{Reader, Writer};
use crate::error::ProtoError;

pub const TLV_PADDING: u16 = 0;
pub const TLV_DISCONNECTED: u16 = 1;
pub const TLV_SMP1: u16 = 2;
pub const TLV_SMP2: u16 = 3;
pub const TLV_SMP3: u16 = 4;
pub const TLV_SMP4: u16 = 5;
pub const TLV_SMP_ABORT: u16 = 6;
pub const TLV_SMP1Q: u16 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tlv_type: u16,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(tlv_type: u16, value: Vec<u8>) -> Self {
        Self { tlv_type, value }
    }

    pub fn disconnected() -> Self {
        Self::new(TLV_DISCONNECTED, Vec::new())
    }

    pub fn is_smp(&self) -> bool {
        matches!(
            self.tlv_type,
            TLV_SMP1 | TLV_SMP2 | TLV_SMP3 | TLV_SMP4 | TLV_SMP_ABORT | TLV_SMP1Q
        )
    }
}

/// Encode a sequence of TLVs into their wire form (type:u16, length:u16,
/// value). Caller is responsible for prepending the NUL byte that separates
/// plaintext from the TLV tail.
pub fn encode_all(tlvs: &[Tlv]) -> Vec<u8> {
    let mut w = Writer::new();
    for tlv in tlvs {
        w.short(tlv.tlv_type);
        w.short(tlv.value.len() as u16);
        w.raw(&tlv.value);
    }
    w.into_bytes()
}

/// Decode a run of back-to-back TLVs from the tail of a decrypted payload.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Tlv>, ProtoError> {
    let mut r = Reader::new(bytes);
    let mut out = Vec::new();
    while !r.is_empty() {
        let tlv_type = r.short()?;
        let len = r.short()? as usize;
        if r.remaining().len() < len {
            return Err(ProtoError::MalformedFrame("TLV value shorter than declared length".into()));
        }
        let value = r.remaining()[..len].to_vec();
        r.skip(len)?;
        out.push(Tlv::new(tlv_type, value));
    }
    Ok(out)
}

/// Split a decrypted payload into (plaintext, tlvs) per §4.4 step 7: text,
/// optionally followed by one NUL byte then a run of TLVs.
pub fn split_payload(payload: &[u8]) -> Result<(String, Vec<Tlv>), ProtoError> {
    match payload.iter().position(|&b| b == 0) {
        Some(idx) => {
            let text = String::from_utf8_lossy(&payload[..idx]).into_owned();
            let tlvs = decode_all(&payload[idx + 1..])?;
            Ok((text, tlvs))
        }
        None => {
            let text = String::from_utf8_lossy(payload).into_owned();
            Ok((text, Vec::new()))
        }
    }
}

/// Build a decryptable payload from plaintext and TLVs: plaintext bytes,
/// then (if any TLVs) a NUL byte and the encoded TLVs.
pub fn build_payload(plaintext: &str, tlvs: &[Tlv]) -> Vec<u8> {
    let mut out = plaintext.as_bytes().to_vec();
    if !tlvs.is_empty() {
        out.push(0);
        out.extend_from_slice(&encode_all(tlvs));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_roundtrip() {
        let tlvs = vec![Tlv::new(TLV_SMP1, vec![1, 2, 3]), Tlv::disconnected()];
        let encoded = encode_all(&tlvs);
        let decoded = decode_all(&encoded).unwrap();
        assert_eq!(tlvs, decoded);
    }

    #[test]
    fn payload_roundtrip_with_and_without_tlvs() {
        let (text, tlvs) = split_payload(b"hello").unwrap();
        assert_eq!(text, "hello");
        assert!(tlvs.is_empty());

        let built = build_payload("hi", &[Tlv::disconnected()]);
        let (text2, tlvs2) = split_payload(&built).unwrap();
        assert_eq!(text2, "hi");
        assert_eq!(tlvs2, vec![Tlv::disconnected()]);
    }
}
