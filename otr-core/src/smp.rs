//! `SmpEngine`: the Socialist Millionaires Protocol sub-machine consumed by
//! `SessionCore` (§4.8). The spec treats SMP's zero-knowledge proofs as an
//! external collaborator (§1); `DefaultSmpEngine` is a concrete, simplified
//! stand-in: a commit-then-reveal equality check rather than a true
//! zero-knowledge proof, so each side's secret is exposed to the peer once
//! the exchange completes. Good enough to exercise the engine end to end;
//! not a drop-in replacement for real SMP's secrecy guarantee.
//!
//! Grounded on `dl_crypto::x3dh`'s signature-verification shape (compute a
//! commitment, verify it later against revealed material).

use otr_crypto::kdf::commitment_hash;
use otr_proto::tlv::{Tlv, TLV_SMP1, TLV_SMP1Q, TLV_SMP2, TLV_SMP3, TLV_SMP4, TLV_SMP_ABORT};

use crate::error::CoreError;

/// Outcome of feeding one inbound TLV to the engine.
pub struct SmpHandled {
    /// True if this TLV type belongs to SMP (caller should swallow the
    /// message regardless of `outbound`/`outcome`, per §4.4 step 8).
    pub claimed: bool,
    pub outbound: Vec<Tlv>,
    /// `Some(question)` the first time a peer-initiated request arrives, so
    /// the host can be asked for a secret via `respondSmp`.
    pub peer_request: Option<Option<String>>,
    /// `Some(matched)` once this side has independently confirmed equality.
    pub outcome: Option<bool>,
}

fn empty_handled(claimed: bool) -> SmpHandled {
    SmpHandled { claimed, outbound: Vec::new(), peer_request: None, outcome: None }
}

pub trait SmpEngine: Send {
    fn is_in_progress(&self) -> bool;
    fn initiate(&mut self, question: Option<String>, secret: &[u8]) -> Result<Vec<Tlv>, CoreError>;
    fn respond(&mut self, secret: &[u8]) -> Result<Vec<Tlv>, CoreError>;
    fn abort(&mut self) -> Vec<Tlv>;
    fn handle_tlv(&mut self, tlv: &Tlv) -> Result<SmpHandled, CoreError>;
}

enum State {
    Idle,
    /// We sent SMP1[Q]; waiting on SMP2.
    Initiated { secret: Vec<u8> },
    /// We received SMP1[Q]; waiting on the host to call `respond`.
    PeerInitiated { peer_commit: [u8; 32] },
    /// We responded with SMP2; waiting on SMP3 (the peer's reveal).
    AwaitingPeerReveal { secret: Vec<u8>, peer_commit: [u8; 32] },
    /// We sent SMP3 (our reveal); waiting on SMP4 (the peer's reveal).
    AwaitingFinalReveal { secret: Vec<u8>, peer_commit: [u8; 32] },
    Done(bool),
}

#[derive(Default)]
pub struct DefaultSmpEngine {
    state_holder: Option<State>,
}

impl DefaultSmpEngine {
    pub fn new() -> Self {
        Self { state_holder: Some(State::Idle) }
    }

    fn state(&mut self) -> State {
        self.state_holder.take().unwrap_or(State::Idle)
    }

    fn set(&mut self, s: State) {
        self.state_holder = Some(s);
    }
}

impl SmpEngine for DefaultSmpEngine {
    fn is_in_progress(&self) -> bool {
        !matches!(self.state_holder, Some(State::Idle) | None)
    }

    fn initiate(&mut self, question: Option<String>, secret: &[u8]) -> Result<Vec<Tlv>, CoreError> {
        let commit = commitment_hash(secret);
        self.set(State::Initiated { secret: secret.to_vec() });
        let tlv = match question {
            Some(q) => {
                let mut value = q.into_bytes();
                value.push(0);
                value.extend_from_slice(&commit);
                Tlv::new(TLV_SMP1Q, value)
            }
            None => Tlv::new(TLV_SMP1, commit.to_vec()),
        };
        Ok(vec![tlv])
    }

    fn respond(&mut self, secret: &[u8]) -> Result<Vec<Tlv>, CoreError> {
        let peer_commit = match self.state() {
            State::PeerInitiated { peer_commit } => peer_commit,
            other => {
                self.set(other);
                return Err(CoreError::PolicyRefusal);
            }
        };
        let commit = commitment_hash(secret);
        self.set(State::AwaitingPeerReveal { secret: secret.to_vec(), peer_commit });
        Ok(vec![Tlv::new(TLV_SMP2, commit.to_vec())])
    }

    fn abort(&mut self) -> Vec<Tlv> {
        self.set(State::Idle);
        vec![Tlv::new(TLV_SMP_ABORT, Vec::new())]
    }

    fn handle_tlv(&mut self, tlv: &Tlv) -> Result<SmpHandled, CoreError> {
        match tlv.tlv_type {
            TLV_SMP1 | TLV_SMP1Q => {
                let (question, commit_bytes) = if tlv.tlv_type == TLV_SMP1Q {
                    let nul = tlv.value.iter().position(|&b| b == 0).ok_or(CoreError::Unsupported)?;
                    (Some(String::from_utf8_lossy(&tlv.value[..nul]).into_owned()), &tlv.value[nul + 1..])
                } else {
                    (None, tlv.value.as_slice())
                };
                let mut peer_commit = [0u8; 32];
                if commit_bytes.len() != 32 {
                    return Err(CoreError::Unsupported);
                }
                peer_commit.copy_from_slice(commit_bytes);
                self.set(State::PeerInitiated { peer_commit });
                Ok(SmpHandled {
                    claimed: true,
                    outbound: Vec::new(),
                    peer_request: Some(question),
                    outcome: None,
                })
            }
            TLV_SMP2 => {
                let secret = match self.state() {
                    State::Initiated { secret } => secret,
                    other => {
                        self.set(other);
                        return Ok(empty_handled(true));
                    }
                };
                let mut commit = [0u8; 32];
                if tlv.value.len() != 32 {
                    return Err(CoreError::Unsupported);
                }
                commit.copy_from_slice(&tlv.value);
                self.set(State::AwaitingFinalReveal { secret: secret.clone(), peer_commit: commit });
                Ok(SmpHandled {
                    claimed: true,
                    outbound: vec![Tlv::new(TLV_SMP3, secret)],
                    peer_request: None,
                    outcome: None,
                })
            }
            TLV_SMP3 => {
                let (secret, peer_commit) = match self.state() {
                    State::AwaitingPeerReveal { secret, peer_commit } => (secret, peer_commit),
                    other => {
                        self.set(other);
                        return Ok(empty_handled(true));
                    }
                };
                if commitment_hash(&tlv.value) != peer_commit {
                    self.set(State::Idle);
                    return Err(CoreError::AuthenticationFailure);
                }
                let matched = constant_time_eq(&secret, &tlv.value);
                self.set(State::Done(matched));
                Ok(SmpHandled {
                    claimed: true,
                    outbound: vec![Tlv::new(TLV_SMP4, secret)],
                    peer_request: None,
                    outcome: Some(matched),
                })
            }
            TLV_SMP4 => {
                let (secret, peer_commit) = match self.state() {
                    State::AwaitingFinalReveal { secret, peer_commit } => (secret, peer_commit),
                    other => {
                        self.set(other);
                        return Ok(empty_handled(true));
                    }
                };
                if commitment_hash(&tlv.value) != peer_commit {
                    self.set(State::Idle);
                    return Err(CoreError::AuthenticationFailure);
                }
                let matched = constant_time_eq(&secret, &tlv.value);
                self.set(State::Done(matched));
                Ok(SmpHandled { claimed: true, outbound: Vec::new(), peer_request: None, outcome: Some(matched) })
            }
            TLV_SMP_ABORT => {
                self.set(State::Idle);
                Ok(empty_handled(true))
            }
            _ => Ok(empty_handled(false)),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secrets_both_sides_confirm() {
        let mut alice = DefaultSmpEngine::new();
        let mut bob = DefaultSmpEngine::new();

        let smp1 = alice.initiate(Some("favorite color?".into()), b"blue").unwrap();
        let handled1 = bob.handle_tlv(&smp1[0]).unwrap();
        assert_eq!(handled1.peer_request, Some(Some("favorite color?".into())));

        let smp2 = bob.respond(b"blue").unwrap();
        let handled2 = alice.handle_tlv(&smp2[0]).unwrap();
        let smp3 = &handled2.outbound[0];

        let handled3 = bob.handle_tlv(smp3).unwrap();
        assert_eq!(handled3.outcome, Some(true));
        let smp4 = &handled3.outbound[0];

        let handled4 = alice.handle_tlv(smp4).unwrap();
        assert_eq!(handled4.outcome, Some(true));
    }

    #[test]
    fn mismatched_secrets_report_false() {
        let mut alice = DefaultSmpEngine::new();
        let mut bob = DefaultSmpEngine::new();

        let smp1 = alice.initiate(None, b"blue").unwrap();
        bob.handle_tlv(&smp1[0]).unwrap();
        let smp2 = bob.respond(b"red").unwrap();
        let handled2 = alice.handle_tlv(&smp2[0]).unwrap();
        let smp3 = &handled2.outbound[0];

        let handled3 = bob.handle_tlv(smp3).unwrap();
        assert_eq!(handled3.outcome, Some(false));

        let smp4 = &handled3.outbound[0];
        let handled4 = alice.handle_tlv(smp4).unwrap();
        assert_eq!(handled4.outcome, Some(false));
    }

    #[test]
    fn abort_resets_state() {
        let mut alice = DefaultSmpEngine::new();
        alice.initiate(None, b"secret").unwrap();
        assert!(alice.is_in_progress());
        alice.abort();
        assert!(!alice.is_in_progress());
    }
}
