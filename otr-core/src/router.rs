//! `InstanceRouter`: owns one master `SessionCore` per `SessionId` and the
//! table of v3 slave instances discovered under it (§3.2, §5).
//!
//! Grounded on `guard-v2`'s engine `mod.rs` (subsystems held behind their own
//! `parking_lot::RwLock`/`Mutex`, looked up by key, created lazily on first
//! reference — the same shape this applies to `SessionId -> master` and
//! `(SessionId, InstanceTag) -> slave`).

use std::collections::HashMap;
use std::sync::Arc;

use otr_proto::message::{AkeKind, Message};
use otr_proto::tlv::Tlv;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::host::Host;
use crate::ids::{InstanceTag, SessionId};
use crate::policy::SessionStatus;
use crate::session::{ReceiveOutcome, SessionCore, SessionEvent};

struct Conversation {
    master: SessionCore,
    slaves: HashMap<InstanceTag, SessionCore>,
    /// The slave the application has chosen to address for outgoing
    /// messages, if any (§6.2 `setOutgoingInstance`/`getOutgoingInstance`).
    outgoing: Option<InstanceTag>,
}

/// Routes inbound/outbound traffic for every `SessionId` this process knows
/// about. One `InstanceRouter` is shared by a whole `OtrEngine` (§5's "guarded
/// by its own mutex, looked up by key").
pub struct InstanceRouter {
    host: Arc<dyn Host>,
    conversations: Mutex<HashMap<SessionId, Conversation>>,
}

impl InstanceRouter {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host, conversations: Mutex::new(HashMap::new()) }
    }

    fn with_conversation<R>(&self, session_id: &SessionId, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut table = self.conversations.lock();
        let conv = table.entry(session_id.clone()).or_insert_with(|| Conversation {
            master: SessionCore::new_master(session_id.clone(), self.host.clone()),
            slaves: HashMap::new(),
            outgoing: None,
        });
        f(conv)
    }

    /// The instance an operation with no explicit tag resolves to: the
    /// selected outgoing slave if one is set and still present, else the
    /// master (§8: "delegating operations... called when a slave is
    /// selected affect the slave only").
    fn default_target(conv: &mut Conversation) -> &mut SessionCore {
        if let Some(tag) = conv.outgoing {
            if conv.slaves.contains_key(&tag) {
                return conv.slaves.get_mut(&tag).unwrap();
            }
        }
        &mut conv.master
    }

    // ── outbound (§4.5, §6.2) ────────────────────────────────────────

    /// Send on behalf of the application. If a v3 outgoing instance has been
    /// selected and is still present, it is used instead of the master
    /// (§6.2's `setOutgoingInstance`).
    pub fn transform_sending(&self, session_id: &SessionId, text: &str, tlvs: Vec<Tlv>) -> Result<Vec<String>, CoreError> {
        self.with_conversation(session_id, |conv| Self::default_target(conv).transform_sending(text, tlvs))
    }

    pub fn start_session(&self, session_id: &SessionId) -> Result<(), CoreError> {
        self.with_conversation(session_id, |conv| Self::default_target(conv).start_session())
    }

    /// Ends only the selected slave when one is selected; otherwise tears
    /// down the whole conversation (master plus every slave).
    pub fn end_session(&self, session_id: &SessionId) -> Result<(), CoreError> {
        self.with_conversation(session_id, |conv| {
            if let Some(tag) = conv.outgoing {
                if let Some(slave) = conv.slaves.get_mut(&tag) {
                    return slave.end_session();
                }
            }
            conv.master.end_session()?;
            for slave in conv.slaves.values_mut() {
                slave.end_session()?;
            }
            Ok(())
        })
    }

    pub fn refresh_session(&self, session_id: &SessionId) -> Result<(), CoreError> {
        self.end_session(session_id)?;
        self.start_session(session_id)
    }

    // ── inbound (§4.2, §4.6) ─────────────────────────────────────────

    /// Peek the instance tag out of a reassembly-eligible frame without
    /// fully decoding it, to decide master vs. slave routing before parsing.
    /// A fragment carries its sender tag in the header but can't reveal its
    /// message kind, so the DH-KEY flag is only ever `true` for a
    /// fully-formed, unfragmented AKE message.
    fn peek_sender_tag(raw: &str) -> Option<(u32, bool)> {
        if otr_proto::fragment::is_fragment(raw) {
            return otr_proto::fragment::parse_fragment(raw).ok().map(|f| (f.sender_instance_tag, false));
        }
        if !otr_proto::codec::is_encoded(raw) {
            return None;
        }
        match otr_proto::codec::classify(raw) {
            Ok(Message::Ake(ake)) if ake.version == 3 => Some((ake.sender_instance_tag, ake.kind == AkeKind::DhKey)),
            Ok(Message::Data(dm)) if dm.version == 3 => Some((dm.sender_instance_tag, false)),
            _ => None,
        }
    }

    pub fn transform_receiving(&self, session_id: &SessionId, raw: &str) -> Result<Option<String>, CoreError> {
        self.with_conversation(session_id, |conv| {
            let peek = Self::peek_sender_tag(raw);
            let sender_tag = peek.map(|(tag, _)| InstanceTag(tag));
            let is_dh_key = peek.map(|(_, dh_key)| dh_key).unwrap_or(false);

            // The master pins itself to the first peer instance it ever
            // hears from, per `new_master`'s "until the peer addresses it"
            // (§3.2) — no slave needed for a buddy's single client. Only a
            // genuinely distinct, later instance tag gets its own slave.
            if let Some(tag) = sender_tag {
                if !tag.is_zero() && conv.master.receiver_tag().is_zero() && conv.slaves.is_empty() {
                    conv.master.pin_receiver_tag(tag);
                }
            }

            let target_is_new_slave = match sender_tag {
                Some(tag) if !tag.is_zero() => tag != conv.master.receiver_tag() && !conv.slaves.contains_key(&tag),
                _ => false,
            };

            if target_is_new_slave {
                let tag = sender_tag.unwrap();
                let mut slave = SessionCore::new_slave(session_id.clone(), self.host.clone(), conv.master.sender_tag(), tag);
                slave.mirror_events_to(conv.master.events_sender());
                // §9/D.2, first call site: a brand-new slave whose first
                // sighting is a DH-KEY reply adopts the master's in-flight
                // AuthContext so it can complete that same handshake.
                if is_dh_key {
                    slave.install_auth(conv.master.clone_auth());
                }
                // A new instance appearing behind an already-established
                // master is reported once (§4.2 step 5).
                if conv.master.status() != SessionStatus::Plaintext || !conv.slaves.is_empty() {
                    self.host.multiple_instances_detected(session_id);
                    conv.master.emit(SessionEvent::MultipleInstancesDetected { tag });
                }
                conv.slaves.insert(tag, slave);
            }

            let outcome: ReceiveOutcome = match sender_tag {
                Some(tag) if !tag.is_zero() && tag != conv.master.receiver_tag() => {
                    conv.slaves.get_mut(&tag).expect("just inserted above if missing").transform_receiving(raw)?
                }
                _ => conv.master.transform_receiving(raw)?,
            };

            // §9/D.2, second call site: a v3 AKE (re)started while responding
            // to a Query/whitespace tag on the master propagates its fresh
            // AuthContext to every known slave, so they converge on the same
            // handshake (§4.6).
            if sender_tag.is_none() {
                if let Some(3) = outcome.ake_started_version {
                    for slave in conv.slaves.values_mut() {
                        slave.reset_auth();
                        slave.install_auth(conv.master.clone_auth());
                    }
                }
            }

            Ok(outcome.text)
        })
    }

    // ── §6.2/§9 listener fan-out ──────────────────────────────────────

    /// Subscribe to status/instance events for a `SessionId`. Slave events
    /// are mirrored onto the master's channel (see `SessionCore::mirror_events_to`),
    /// so one subscription here observes the whole conversation.
    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<SessionEvent> {
        self.with_conversation(session_id, |conv| conv.master.subscribe())
    }

    // ── §6.2 session/instance introspection ─────────────────────────

    pub fn get_session_status(&self, session_id: &SessionId, tag: Option<InstanceTag>) -> SessionStatus {
        self.with_conversation(session_id, |conv| match tag {
            Some(t) if !t.is_zero() => conv.slaves.get(&t).map(|s| s.status()).unwrap_or(SessionStatus::Plaintext),
            _ => conv.master.status(),
        })
    }

    /// §4.9: the master plus all slaves.
    pub fn get_instances(&self, session_id: &SessionId) -> Vec<InstanceTag> {
        self.with_conversation(session_id, |conv| {
            std::iter::once(conv.master.sender_tag()).chain(conv.slaves.keys().copied()).collect()
        })
    }

    /// §4.9: selecting the master's own pinned `receiverTag` deselects any
    /// slave (future sends go through the master again).
    pub fn set_outgoing_instance(&self, session_id: &SessionId, tag: InstanceTag) {
        self.with_conversation(session_id, |conv| {
            conv.outgoing = if tag == conv.master.receiver_tag() { None } else { Some(tag) };
            conv.master.emit(SessionEvent::OutgoingSessionChanged { tag });
        });
    }

    pub fn get_outgoing_instance(&self, session_id: &SessionId) -> Option<InstanceTag> {
        self.with_conversation(session_id, |conv| conv.outgoing)
    }

    // ── §4.8 SMP, delegated to whichever instance the app addresses ────

    pub fn init_smp(&self, session_id: &SessionId, tag: Option<InstanceTag>, question: Option<String>, secret: &[u8]) -> Result<(), CoreError> {
        self.with_conversation(session_id, |conv| match tag {
            Some(t) if !t.is_zero() => conv
                .slaves
                .get_mut(&t)
                .ok_or(CoreError::PolicyRefusal)?
                .init_smp(question, secret),
            _ => Self::default_target(conv).init_smp(question, secret),
        })
    }

    /// §4.8: picks the slave by tag, falling back to self (here: the
    /// selected outgoing instance, or the master) when the tag is unknown.
    pub fn respond_smp(&self, session_id: &SessionId, tag: Option<InstanceTag>, secret: &[u8]) -> Result<(), CoreError> {
        self.with_conversation(session_id, |conv| match tag {
            Some(t) if !t.is_zero() => match conv.slaves.get_mut(&t) {
                Some(slave) => slave.respond_smp(secret),
                None => Self::default_target(conv).respond_smp(secret),
            },
            _ => Self::default_target(conv).respond_smp(secret),
        })
    }

    pub fn abort_smp(&self, session_id: &SessionId, tag: Option<InstanceTag>) -> Result<(), CoreError> {
        self.with_conversation(session_id, |conv| match tag {
            Some(t) if !t.is_zero() => conv.slaves.get_mut(&t).ok_or(CoreError::PolicyRefusal)?.abort_smp(),
            _ => Self::default_target(conv).abort_smp(),
        })
    }

    pub fn is_smp_in_progress(&self, session_id: &SessionId, tag: Option<InstanceTag>) -> bool {
        self.with_conversation(session_id, |conv| match tag {
            Some(t) if !t.is_zero() => conv.slaves.get(&t).map(|s| s.is_smp_in_progress()).unwrap_or(false),
            _ => Self::default_target(conv).is_smp_in_progress(),
        })
    }

    pub fn get_remote_public_key(&self, session_id: &SessionId, tag: Option<InstanceTag>) -> Option<otr_crypto::identity::LongTermPublicKey> {
        self.with_conversation(session_id, |conv| match tag {
            Some(t) if !t.is_zero() => conv.slaves.get(&t).and_then(|s| s.remote_public_key().cloned()),
            _ => conv.master.remote_public_key().cloned(),
        })
    }
}
