//! `AuthContext`: the AKE state machine consumed (not owned) by
//! `SessionCore`. The spec treats the AKE's cryptographic internals as an
//! external collaborator (§1); `DefaultAuthContext` is a concrete, simplified
//! implementation so the engine is runnable and testable end-to-end.
//!
//! Grounded on `dl_crypto::x3dh`'s initiator/responder split and header
//! struct, generalized from X3DH's one-shot agreement to OTR's
//! commit/key/reveal-sig/signature four-message exchange.

use otr_crypto::dh::{DhKeypair, DhPublicKey};
use otr_crypto::identity::{LongTermKeyPair, LongTermPublicKey};
use otr_crypto::{aes_ctr, kdf};
use otr_proto::binary::{Reader, Writer};
use otr_proto::message::{AkeKind, AkeMessage};

use crate::error::CoreError;

/// What the session core needs once an AKE completes.
pub struct AkeOutput {
    pub local_pair: DhKeypair,
    pub remote_public: DhPublicKey,
    pub remote_long_term_public: LongTermPublicKey,
}

/// The AKE state machine interface `SessionCore` drives. Opaque to the spec;
/// concrete here so scenarios in `tests/scenarios.rs` can run end to end.
pub trait AuthContext: Send {
    fn is_secure(&self) -> bool;

    /// Discard any in-progress handshake and return to idle.
    fn reset(&mut self);

    /// Begin an AKE as the initiator, producing the first outbound message.
    fn initiate(&mut self, version: u8) -> Result<AkeMessage, CoreError>;

    /// Feed one inbound AKE message; returns an outbound reply, if any.
    fn receive(&mut self, msg: &AkeMessage) -> Result<Option<AkeMessage>, CoreError>;

    /// Valid only once [`Self::is_secure`] is true; consumes the completed
    /// handshake's key material. Calling this resets the context to idle.
    fn take_output(&mut self) -> Option<AkeOutput>;

    /// Deep-clone the in-progress (or idle) handshake state, used when a
    /// master clones its `AuthContext` into a newly discovered slave (§4.2,
    /// §4.6).
    fn clone_box(&self) -> Box<dyn AuthContext>;
}

enum State {
    Idle,
    /// We sent DH-COMMIT; `x` is our ephemeral pair, `r` hides `gx`.
    CommitSent { x: DhKeypair, r: [u8; 16] },
    /// We received DH-COMMIT and replied DH-KEY; waiting on REVEAL-SIGNATURE.
    AwaitingRevealSig { y: DhKeypair, encrypted_gx: Vec<u8>, gx_hash: [u8; 32] },
    /// We received DH-KEY and replied REVEAL-SIGNATURE; waiting on SIGNATURE.
    AwaitingSignature { x: DhKeypair, gy: DhPublicKey, s: [u8; 32] },
    Done(AkeOutput),
}

/// A concrete OTR-shaped AKE: DH commit/reveal hides `gx` behind an
/// AES-encrypted blob and a SHA-256 commitment hash; REVEAL-SIGNATURE and
/// SIGNATURE carry each side's Ed25519 identity signature over the
/// transcript, encrypted under a key derived from the DH secret.
pub struct DefaultAuthContext {
    state: State,
    local_identity: LongTermKeyPair,
}

impl DefaultAuthContext {
    pub fn new(local_identity: LongTermKeyPair) -> Self {
        Self { state: State::Idle, local_identity }
    }

    fn transcript(gx: &[u8], gy: &[u8]) -> Vec<u8> {
        let mut t = Vec::with_capacity(gx.len() + gy.len());
        t.extend_from_slice(gx);
        t.extend_from_slice(gy);
        t
    }
}

impl AuthContext for DefaultAuthContext {
    fn is_secure(&self) -> bool {
        matches!(self.state, State::Done(_))
    }

    fn reset(&mut self) {
        self.state = State::Idle;
    }

    fn initiate(&mut self, version: u8) -> Result<AkeMessage, CoreError> {
        let x = DhKeypair::generate()?;
        let mut r = [0u8; 16];
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(&mut r);

        let gx = x.public().to_bytes_be();
        let gx_hash = kdf::commitment_hash(&gx);
        let encrypted_gx = aes_ctr::encrypt(&r, 0, &gx)?;

        let mut w = Writer::new();
        w.data(&encrypted_gx);
        w.data(&gx_hash);

        self.state = State::CommitSent { x, r };
        Ok(AkeMessage {
            version,
            sender_instance_tag: 0,
            receiver_instance_tag: 0,
            kind: AkeKind::DhCommit,
            body: w.into_bytes(),
        })
    }

    fn receive(&mut self, msg: &AkeMessage) -> Result<Option<AkeMessage>, CoreError> {
        match (&self.state, msg.kind) {
            (_, AkeKind::DhCommit) => {
                let mut r = Reader::new(&msg.body);
                let encrypted_gx = r.data()?;
                let gx_hash_vec = r.data()?;
                let mut gx_hash = [0u8; 32];
                if gx_hash_vec.len() != 32 {
                    return Err(CoreError::Unsupported);
                }
                gx_hash.copy_from_slice(&gx_hash_vec);

                let y = DhKeypair::generate()?;
                let gy = y.public().to_bytes_be();
                let mut w = Writer::new();
                w.data(&gy);

                self.state = State::AwaitingRevealSig { y, encrypted_gx, gx_hash };
                Ok(Some(AkeMessage {
                    version: msg.version,
                    sender_instance_tag: msg.receiver_instance_tag,
                    receiver_instance_tag: msg.sender_instance_tag,
                    kind: AkeKind::DhKey,
                    body: w.into_bytes(),
                }))
            }
            (State::CommitSent { .. }, AkeKind::DhKey) => {
                let (x, r_key) = match std::mem::replace(&mut self.state, State::Idle) {
                    State::CommitSent { x, r } => (x, r),
                    _ => unreachable!(),
                };
                let mut reader = Reader::new(&msg.body);
                let gy_bytes = reader.data()?;
                let gy = DhPublicKey::from_bytes_be(&gy_bytes);

                let shared = x.shared_secret(&gy)?;
                let s = kdf::derive_ake_secret(&shared)?;
                let sig_key = kdf::derive_sig_key(&s)?;

                let gx = x.public().to_bytes_be();
                let transcript = Self::transcript(&gx, &gy_bytes);
                let signature = self.local_identity.sign(&transcript);

                let mut payload = Writer::new();
                payload.data(&self.local_identity.public.0);
                payload.data(&signature);
                let encrypted_sig = aes_ctr::encrypt(&sig_key, 0, &payload.into_bytes())?;

                let mut w = Writer::new();
                w.data(&r_key);
                w.data(&encrypted_sig);

                self.state = State::AwaitingSignature { x, gy, s };
                Ok(Some(AkeMessage {
                    version: msg.version,
                    sender_instance_tag: msg.receiver_instance_tag,
                    receiver_instance_tag: msg.sender_instance_tag,
                    kind: AkeKind::RevealSignature,
                    body: w.into_bytes(),
                }))
            }
            (State::AwaitingRevealSig { .. }, AkeKind::RevealSignature) => {
                let (y, encrypted_gx, gx_hash) = match std::mem::replace(&mut self.state, State::Idle) {
                    State::AwaitingRevealSig { y, encrypted_gx, gx_hash } => (y, encrypted_gx, gx_hash),
                    _ => unreachable!(),
                };
                let mut reader = Reader::new(&msg.body);
                let r_key_vec = reader.data()?;
                let encrypted_sig = reader.data()?;
                let mut r_key = [0u8; 16];
                if r_key_vec.len() != 16 {
                    return Err(CoreError::Unsupported);
                }
                r_key.copy_from_slice(&r_key_vec);

                let gx = aes_ctr::decrypt(&r_key, 0, &encrypted_gx)?;
                if kdf::commitment_hash(&gx) != gx_hash {
                    return Err(CoreError::AuthenticationFailure);
                }
                let gx_pub = DhPublicKey::from_bytes_be(&gx);

                let shared = y.shared_secret(&gx_pub)?;
                let s = kdf::derive_ake_secret(&shared)?;
                let sig_key = kdf::derive_sig_key(&s)?;

                let payload = aes_ctr::decrypt(&sig_key, 0, &encrypted_sig)?;
                let mut payload_reader = Reader::new(&payload);
                let remote_identity_bytes = payload_reader.data()?;
                let signature = payload_reader.data()?;
                let remote_identity = LongTermPublicKey(remote_identity_bytes);

                let gy = y.public().to_bytes_be();
                let transcript = Self::transcript(&gx, &gy);
                LongTermKeyPair::verify(&remote_identity, &transcript, &signature)
                    .map_err(|_| CoreError::AuthenticationFailure)?;

                let our_transcript = Self::transcript(&gx, &gy);
                let our_signature = self.local_identity.sign(&our_transcript);
                let mut reply_payload = Writer::new();
                reply_payload.data(&self.local_identity.public.0);
                reply_payload.data(&our_signature);
                let encrypted_reply = aes_ctr::encrypt(&sig_key, 1, &reply_payload.into_bytes())?;
                let mut w = Writer::new();
                w.data(&encrypted_reply);

                let output = AkeOutput { local_pair: y, remote_public: gx_pub, remote_long_term_public: remote_identity };
                self.state = State::Done(output);

                Ok(Some(AkeMessage {
                    version: msg.version,
                    sender_instance_tag: msg.receiver_instance_tag,
                    receiver_instance_tag: msg.sender_instance_tag,
                    kind: AkeKind::Signature,
                    body: w.into_bytes(),
                }))
            }
            (State::AwaitingSignature { .. }, AkeKind::Signature) => {
                let (x, gy, s) = match std::mem::replace(&mut self.state, State::Idle) {
                    State::AwaitingSignature { x, gy, s } => (x, gy, s),
                    _ => unreachable!(),
                };
                let sig_key = kdf::derive_sig_key(&s)?;
                let mut reader = Reader::new(&msg.body);
                let encrypted_reply = reader.data()?;
                let payload = aes_ctr::decrypt(&sig_key, 1, &encrypted_reply)?;
                let mut payload_reader = Reader::new(&payload);
                let remote_identity_bytes = payload_reader.data()?;
                let signature = payload_reader.data()?;
                let remote_identity = LongTermPublicKey(remote_identity_bytes);

                let gx = x.public().to_bytes_be();
                let gy_bytes = gy.to_bytes_be();
                let transcript = Self::transcript(&gx, &gy_bytes);
                LongTermKeyPair::verify(&remote_identity, &transcript, &signature)
                    .map_err(|_| CoreError::AuthenticationFailure)?;

                self.state = State::Done(AkeOutput {
                    local_pair: x,
                    remote_public: gy,
                    remote_long_term_public: remote_identity,
                });
                Ok(None)
            }
            _ => Err(CoreError::Unsupported),
        }
    }

    fn take_output(&mut self) -> Option<AkeOutput> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Done(out) => Some(out),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn clone_box(&self) -> Box<dyn AuthContext> {
        // Only the identity key and idle/commit-sent bookkeeping clone
        // meaningfully across instances; mid-handshake DH secrets are not
        // shared since a clone is always targeted at a fresh instance tag
        // that hasn't seen traffic yet (§4.2 step 5, §4.6).
        let cloned_state = match &self.state {
            State::Idle => State::Idle,
            State::CommitSent { x, r } => State::CommitSent { x: x.clone(), r: *r },
            _ => State::Idle,
        };
        Box::new(DefaultAuthContext {
            state: cloned_state,
            local_identity: self.local_identity.clone(),
        })
    }
}
