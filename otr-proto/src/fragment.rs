//! Fragmentation and reassembly of on-wire frames (§4.7).
//!
//! Wire form: `?OTR|sender|receiver,k,n,payload,` — hex instance tags, 1-based
//! `k` of `n` total fragments, comma-delimited.

use std::collections::HashMap;

use crate::error::ProtoError;

/// Split an already-serialized OTR-encoded message into fragments no larger
/// than `max_fragment_size` bytes each. Returns the message unfragmented (as
/// a single-element vec) if it already fits, matching §4.7's "non-encoded
/// outputs are sent as a single frame" rule for the caller to apply first.
pub fn fragment(
    payload: &str,
    sender_instance_tag: u32,
    receiver_instance_tag: u32,
    max_fragment_size: usize,
) -> Vec<String> {
    let header_len_estimate = |k: usize, n: usize| {
        format!("?OTR|{sender_instance_tag:x}|{receiver_instance_tag:x},{k},{n},,").len()
    };
    if header_len_estimate(1, 1) + payload.len() <= max_fragment_size {
        return vec![payload.to_string()];
    }

    // Find a fragment count n such that every chunk (header + piece) fits.
    let mut n = 2;
    loop {
        let header_len = header_len_estimate(n, n);
        if header_len >= max_fragment_size {
            n += 1;
            continue;
        }
        let chunk_cap = max_fragment_size - header_len;
        let needed = payload.len().div_ceil(chunk_cap);
        if needed <= n {
            break;
        }
        n += 1;
    }

    let header_len = header_len_estimate(n, n);
    let chunk_cap = max_fragment_size - header_len;
    payload
        .as_bytes()
        .chunks(chunk_cap)
        .enumerate()
        .map(|(i, chunk)| {
            let k = i + 1;
            format!(
                "?OTR|{sender_instance_tag:x}|{receiver_instance_tag:x},{k},{n},{},",
                String::from_utf8_lossy(chunk)
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub sender_instance_tag: u32,
    pub receiver_instance_tag: u32,
    pub k: usize,
    pub n: usize,
    pub payload: String,
}

pub fn is_fragment(text: &str) -> bool {
    text.starts_with("?OTR|")
}

pub fn parse_fragment(text: &str) -> Result<Fragment, ProtoError> {
    let rest = text
        .strip_prefix("?OTR|")
        .ok_or_else(|| ProtoError::InvalidFragment("missing ?OTR| prefix".into()))?;
    let rest = rest
        .strip_suffix(',')
        .ok_or_else(|| ProtoError::InvalidFragment("missing trailing comma".into()))?;

    let mut parts = rest.splitn(2, '|');
    let sender_hex = parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing sender tag".into()))?;
    let rest = parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing receiver/indices".into()))?;

    let mut rest_parts = rest.splitn(2, ',');
    let receiver_hex = rest_parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing receiver tag".into()))?;
    let rest = rest_parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing k,n,payload".into()))?;

    let mut idx_parts = rest.splitn(3, ',');
    let k_str = idx_parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing k".into()))?;
    let n_str = idx_parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing n".into()))?;
    let payload = idx_parts.next().ok_or_else(|| ProtoError::InvalidFragment("missing payload".into()))?;

    let sender_instance_tag =
        u32::from_str_radix(sender_hex, 16).map_err(|_| ProtoError::InvalidFragment("bad sender tag".into()))?;
    let receiver_instance_tag =
        u32::from_str_radix(receiver_hex, 16).map_err(|_| ProtoError::InvalidFragment("bad receiver tag".into()))?;
    let k: usize = k_str.parse().map_err(|_| ProtoError::InvalidFragment("bad k".into()))?;
    let n: usize = n_str.parse().map_err(|_| ProtoError::InvalidFragment("bad n".into()))?;

    if k == 0 || n == 0 || k > n {
        return Err(ProtoError::InvalidFragment("k/n out of range".into()));
    }

    Ok(Fragment {
        sender_instance_tag,
        receiver_instance_tag,
        k,
        n,
        payload: payload.to_string(),
    })
}

struct PartialRun {
    n: usize,
    receiver_instance_tag: u32,
    parts: Vec<Option<String>>,
    received: usize,
    /// The next `k` this run will accept, starting at 1. Fragments must
    /// arrive in ascending order; anything else (a repeat or a genuine
    /// permutation) invalidates the run.
    next_k: usize,
}

/// Reassembles fragments, keyed by sender instance tag (§4.7). Each tag
/// tracks one in-progress run at a time; a new run with a different `n`
/// discards the old partial state rather than silently merging two runs.
/// Fragments within a run must arrive in ascending `k` order — a repeat or a
/// genuinely out-of-sequence index invalidates the whole run.
#[derive(Default)]
pub struct Assembler {
    runs: HashMap<u32, PartialRun>,
}

pub enum AssembleOutcome {
    Complete(String),
    Pending,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment in. `known_instance` lets the caller reject
    /// fragments addressed to a receiver tag the host isn't tracking.
    pub fn feed(&mut self, frag: Fragment, known_instance: impl Fn(u32) -> bool) -> Result<AssembleOutcome, ProtoError> {
        if frag.receiver_instance_tag != 0 && !known_instance(frag.receiver_instance_tag) {
            return Err(ProtoError::UnknownInstance);
        }

        let run = self.runs.entry(frag.sender_instance_tag).or_insert_with(|| PartialRun {
            n: frag.n,
            receiver_instance_tag: frag.receiver_instance_tag,
            parts: vec![None; frag.n],
            received: 0,
            next_k: 1,
        });

        if run.n != frag.n || run.receiver_instance_tag != frag.receiver_instance_tag {
            // A fragment for a fresh run with a different shape: restart.
            *run = PartialRun {
                n: frag.n,
                receiver_instance_tag: frag.receiver_instance_tag,
                parts: vec![None; frag.n],
                received: 0,
                next_k: 1,
            };
        }

        if frag.k != run.next_k {
            self.runs.remove(&frag.sender_instance_tag);
            return Err(ProtoError::InvalidFragment("fragment out of order".into()));
        }

        run.parts[frag.k - 1] = Some(frag.payload);
        run.received += 1;
        run.next_k += 1;

        if run.received < run.n {
            return Ok(AssembleOutcome::Pending);
        }

        let run = self.runs.remove(&frag.sender_instance_tag).unwrap();
        let mut out = String::new();
        for (i, part) in run.parts.into_iter().enumerate() {
            match part {
                Some(p) => out.push_str(&p),
                None => return Err(ProtoError::InvalidFragment(format!("missing fragment {}", i + 1))),
            }
        }
        Ok(AssembleOutcome::Complete(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_then_reassemble_in_order() {
        let payload = "?OTR:".to_string() + &"A".repeat(600) + ".";
        let frames = fragment(&payload, 0x1, 0x2, 150);
        assert!(frames.len() > 1);

        let mut assembler = Assembler::new();
        let mut result = None;
        for frame in &frames {
            let frag = parse_fragment(frame).unwrap();
            match assembler.feed(frag, |_| true).unwrap() {
                AssembleOutcome::Pending => {}
                AssembleOutcome::Complete(s) => result = Some(s),
            }
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn duplicate_fragment_index_is_rejected() {
        let payload = "?OTR:".to_string() + &"B".repeat(600) + ".";
        let frames = fragment(&payload, 0x1, 0x2, 150);
        assert!(frames.len() >= 3);

        let mut assembler = Assembler::new();
        let frag0 = parse_fragment(&frames[0]).unwrap();
        assembler.feed(frag0, |_| true).unwrap();

        // Feed fragment 0 again: invalid.
        let frag0_again = parse_fragment(&frames[0]).unwrap();
        let err = assembler.feed(frag0_again, |_| true);
        assert!(err.is_err());
    }

    #[test]
    fn permuted_fragments_are_rejected() {
        let payload = "?OTR:".to_string() + &"B".repeat(600) + ".";
        let frames = fragment(&payload, 0x1, 0x2, 150);
        assert!(frames.len() >= 3);

        let mut assembler = Assembler::new();
        // Deliver fragment 2 before fragment 1: genuinely out of order.
        let frag1 = parse_fragment(&frames[1]).unwrap();
        let err = assembler.feed(frag1, |_| true);
        assert!(err.is_err());
    }

    #[test]
    fn small_payload_is_not_fragmented() {
        let frames = fragment("hello", 0x1, 0x2, 150);
        assert_eq!(frames, vec!["hello".to_string()]);
    }

    #[test]
    fn unknown_receiver_instance_is_rejected() {
        let payload = "?OTR:".to_string() + &"C".repeat(600) + ".";
        let frames = fragment(&payload, 0x1, 0x99, 150);
        let frag = parse_fragment(&frames[0]).unwrap();
        let mut assembler = Assembler::new();
        let err = assembler.feed(frag, |tag| tag == 0x2);
        assert!(matches!(err, Err(ProtoError::UnknownInstance)));
    }
}
