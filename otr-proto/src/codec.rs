//! The outermost envelope: OTR-encoded base64 framing, the query message
//! grammar, and the whitespace tag. Bit-compatible with OTRv2/v3 (§6.3).

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::binary::{Reader, Writer};
use crate::error::ProtoError;
use crate::message::{AkeKind, AkeMessage, DataMessage, ErrorMessage, Message, QueryMessage, type_tag};

/// Prefix on every base64-encoded OTR message.
pub const ENCODED_PREFIX: &str = "?OTR:";
/// Suffix terminating an encoded (non-fragmented) message.
pub const ENCODED_SUFFIX: char = '.';
/// Prefix on an in-band error message.
pub const ERROR_PREFIX: &str = "?OTR Error:";

const WHITESPACE_BASE: &str = "\u{20}\u{09}\u{20}\u{09}\u{20}\u{09}\u{20}\u{20}\u{09}\u{09}\u{09}\u{09}";
const WHITESPACE_V2: &str = "\u{20}\u{20}\u{09}\u{09}\u{20}\u{20}\u{09}\u{20}";
const WHITESPACE_V3: &str = "\u{20}\u{20}\u{09}\u{09}\u{20}\u{20}\u{09}\u{09}";

/// Build the whitespace tag to append to an outgoing plaintext message,
/// advertising the given versions (only 2 and 3 are ever offered).
pub fn whitespace_tag(versions: &[u8]) -> String {
    let mut tag = String::from(WHITESPACE_BASE);
    if versions.contains(&3) {
        tag.push_str(WHITESPACE_V3);
    }
    if versions.contains(&2) {
        tag.push_str(WHITESPACE_V2);
    }
    tag
}

pub fn with_whitespace_tag(plaintext: &str, versions: &[u8]) -> String {
    format!("{plaintext}{}", whitespace_tag(versions))
}

/// Detect and strip a whitespace tag from inbound plaintext. Returns the
/// cleaned text and the advertised versions, if any were present.
pub fn strip_whitespace_tag(text: &str) -> (String, Vec<u8>) {
    let Some(base_idx) = text.find(WHITESPACE_BASE) else {
        return (text.to_string(), Vec::new());
    };
    let mut versions = Vec::new();
    let mut tail = &text[base_idx + WHITESPACE_BASE.len()..];
    loop {
        if let Some(rest) = tail.strip_prefix(WHITESPACE_V3) {
            versions.push(3);
            tail = rest;
        } else if let Some(rest) = tail.strip_prefix(WHITESPACE_V2) {
            versions.push(2);
            tail = rest;
        } else {
            break;
        }
    }
    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..base_idx]);
    cleaned.push_str(tail);
    (cleaned, versions)
}

/// Render a query message: `?OTRv<versions>?` (v1 is never offered, only
/// recognized on input).
pub fn format_query(versions: &[u8]) -> String {
    let mut s = String::from("?OTRv");
    for v in versions {
        if *v == 2 || *v == 3 {
            s.push(char::from_digit(*v as u32, 10).unwrap());
        }
    }
    s.push('?');
    s
}

/// Parse a query message out of raw inbound text. Recognizes the bare `?OTR?`
/// (v1-only, never opens a session) and `?OTRv<digits>?` forms.
pub fn parse_query(text: &str) -> Option<QueryMessage> {
    if text == "?OTR?" {
        return Some(QueryMessage { versions: vec![1] });
    }
    let rest = text.strip_prefix("?OTRv")?;
    let end = rest.find('?')?;
    let digits = &rest[..end];
    let versions = digits.chars().filter_map(|c| c.to_digit(10)).map(|d| d as u8).collect();
    Some(QueryMessage { versions })
}

fn encode_envelope(body: &[u8]) -> String {
    format!("{ENCODED_PREFIX}{}{ENCODED_SUFFIX}", STANDARD.encode(body))
}

fn decode_envelope(text: &str) -> Result<Vec<u8>, ProtoError> {
    let inner = text
        .strip_prefix(ENCODED_PREFIX)
        .ok_or_else(|| ProtoError::MalformedFrame("missing ?OTR: prefix".into()))?;
    let inner = inner.strip_suffix(ENCODED_SUFFIX).unwrap_or(inner);
    Ok(STANDARD.decode(inner)?)
}

/// Is this text an OTR-encoded message (as opposed to plain text, query, or
/// error text)? Used by the fragmenter to decide whether to chunk at all.
pub fn is_encoded(text: &str) -> bool {
    text.starts_with(ENCODED_PREFIX)
}

fn encode_ake_body(msg: &AkeMessage) -> Vec<u8> {
    let mut w = Writer::new();
    w.short(msg.version as u16);
    w.byte(msg.kind.tag());
    if msg.version == 3 {
        w.int(msg.sender_instance_tag);
        w.int(msg.receiver_instance_tag);
    }
    w.raw(&msg.body);
    w.into_bytes()
}

/// Serialize a classified `Message` back into the text form that travels
/// over the wire (pre-fragmentation).
pub fn serialize(msg: &Message) -> String {
    match msg {
        Message::Query(q) => format_query(&q.versions),
        Message::Error(e) => format!("{ERROR_PREFIX} {}", e.text),
        Message::PlainText(text) => text.clone(),
        Message::Ake(ake) => encode_envelope(&encode_ake_body(ake)),
        Message::Data(data) => encode_envelope(&data.encode()),
    }
}

/// Classify raw inbound text into a structured `Message`.
pub fn classify(text: &str) -> Result<Message, ProtoError> {
    if let Some(err_text) = text.strip_prefix(ERROR_PREFIX) {
        return Ok(Message::Error(ErrorMessage {
            text: err_text.trim_start().to_string(),
        }));
    }
    if let Some(query) = parse_query(text) {
        return Ok(Message::Query(query));
    }
    if !is_encoded(text) {
        return Ok(Message::PlainText(text.to_string()));
    }

    let body = decode_envelope(text)?;
    let mut r = Reader::new(&body);
    let version = r.short()? as u8;
    let tag = r.byte()?;

    let (sender_instance_tag, receiver_instance_tag) = if version == 3 {
        (r.int()?, r.int()?)
    } else {
        (0, 0)
    };

    if tag == type_tag::DATA {
        let data = DataMessage::decode(version, sender_instance_tag, receiver_instance_tag, r)?;
        return Ok(Message::Data(data));
    }

    let kind = AkeKind::from_tag(tag).ok_or(ProtoError::UnknownMessageType(tag))?;
    Ok(Message::Ake(AkeMessage {
        version,
        sender_instance_tag,
        receiver_instance_tag,
        kind,
        body: r.remaining().to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_roundtrip() {
        let rendered = format_query(&[3, 2]);
        assert_eq!(rendered, "?OTRv32?");
        let parsed = parse_query(&rendered).unwrap();
        assert_eq!(parsed.versions, vec![3, 2]);
    }

    #[test]
    fn bare_v1_query_is_recognized_but_carries_only_v1() {
        let parsed = parse_query("?OTR?").unwrap();
        assert_eq!(parsed.versions, vec![1]);
    }

    #[test]
    fn whitespace_tag_roundtrip() {
        let tagged = with_whitespace_tag("hello", &[3]);
        let (cleaned, versions) = strip_whitespace_tag(&tagged);
        assert_eq!(cleaned, "hello");
        assert_eq!(versions, vec![3]);
    }

    #[test]
    fn plain_text_classifies_as_plaintext() {
        assert_eq!(classify("hi there").unwrap(), Message::PlainText("hi there".into()));
    }

    #[test]
    fn error_message_classifies() {
        let msg = classify("?OTR Error: nope").unwrap();
        assert_eq!(msg, Message::Error(ErrorMessage { text: "nope".into() }));
    }

    #[test]
    fn data_message_envelope_roundtrips() {
        let data = DataMessage {
            version: 3,
            sender_instance_tag: 0x1001,
            receiver_instance_tag: 0x2002,
            flags: 0,
            sender_keyid: 1,
            recipient_keyid: 1,
            next_dh_public: vec![1, 2, 3],
            counter_top_half: 42,
            encrypted_message: vec![9, 9, 9],
            mac: [7u8; 20],
            old_mac_keys: vec![],
        };
        let msg = Message::Data(data.clone());
        let text = serialize(&msg);
        assert!(is_encoded(&text));
        let parsed = classify(&text).unwrap();
        assert_eq!(parsed, Message::Data(data));
    }
}
