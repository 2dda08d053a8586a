//! `SessionCore`: the per-conversation state machine (§4.1–§4.9).
//!
//! Grounded on `dl_crypto::ratchet::RatchetSession` (owns crypto state,
//! mutated only through named operations) and `guard-v2`'s engine `mod.rs`
//! (mode enum + `tokio::sync::broadcast` event fan-out, §5's "listener set
//! guarded by its own mutex... copy-on-dispatch" realized here via broadcast
//! subscribers instead of a manually-guarded `Vec`).

use std::sync::Arc;

use otr_crypto::dh::DhPublicKey;
use otr_crypto::identity::LongTermPublicKey;
use otr_crypto::{aes_ctr, mac};
use otr_proto::fragment::{self, AssembleOutcome, Assembler};
use otr_proto::message::{AkeKind, AkeMessage, DataMessage, ErrorMessage, Message, QueryMessage};
use otr_proto::tlv::{self, Tlv, TLV_DISCONNECTED};
use otr_proto::{codec, ProtoError};
use tokio::sync::broadcast;
use tracing::warn;

use crate::ake::{AuthContext, DefaultAuthContext};
use crate::error::CoreError;
use crate::host::Host;
use crate::ids::{InstanceTag, SessionId};
use crate::keys::{KeyMatrix, Slot};
use crate::policy::{OfferStatus, SessionStatus};
use crate::smp::{DefaultSmpEngine, SmpEngine};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StatusChanged { tag: InstanceTag, status: SessionStatus },
    MultipleInstancesDetected { tag: InstanceTag },
    OutgoingSessionChanged { tag: InstanceTag },
}

/// What `transform_receiving` produced: text for the host, and — only
/// relevant to the master/slave router — the version an AKE was just
/// (re)started at, so slave `AuthContext`s can be cloned (§4.2 step 5, §4.6).
pub struct ReceiveOutcome {
    pub text: Option<String>,
    pub ake_started_version: Option<u8>,
}

impl ReceiveOutcome {
    fn none() -> Self {
        Self { text: None, ake_started_version: None }
    }

    fn text(text: String) -> Self {
        Self { text: Some(text), ake_started_version: None }
    }
}

pub struct SessionCore {
    pub session_id: SessionId,
    host: Arc<dyn Host>,
    sender_tag: InstanceTag,
    receiver_tag: InstanceTag,
    protocol_version: u8,
    status: SessionStatus,
    offer_status: OfferStatus,
    remote_long_term_public_key: Option<LongTermPublicKey>,
    auth: Box<dyn AuthContext>,
    smp: Box<dyn SmpEngine>,
    keys: Option<KeyMatrix>,
    assembler: Assembler,
    events: broadcast::Sender<SessionEvent>,
    mirror_to: Vec<broadcast::Sender<SessionEvent>>,
}

impl SessionCore {
    fn new(session_id: SessionId, host: Arc<dyn Host>, sender_tag: InstanceTag, receiver_tag: InstanceTag) -> Self {
        let identity = host.get_local_key_pair(&session_id);
        let (events, _) = broadcast::channel(32);
        Self {
            session_id,
            host,
            sender_tag,
            receiver_tag,
            protocol_version: 0,
            status: SessionStatus::Plaintext,
            offer_status: OfferStatus::Idle,
            remote_long_term_public_key: None,
            auth: Box::new(DefaultAuthContext::new(identity)),
            smp: Box::new(DefaultSmpEngine::new()),
            keys: None,
            assembler: Assembler::new(),
            events,
            mirror_to: Vec::new(),
        }
    }

    /// A master is created on first app interest in a `SessionId` (§3.2);
    /// its receiver tag starts at `ZERO_TAG` until the peer addresses it.
    pub fn new_master(session_id: SessionId, host: Arc<dyn Host>) -> Self {
        Self::new(session_id, host, InstanceTag::generate(), InstanceTag::ZERO)
    }

    /// A slave is created lazily by the router on first sighting of a new
    /// `senderInstanceTag` (§3.2); it shares the master's local identity
    /// tag but is pinned to one specific remote instance from birth.
    pub fn new_slave(session_id: SessionId, host: Arc<dyn Host>, local_sender_tag: InstanceTag, peer_instance_tag: InstanceTag) -> Self {
        let mut core = Self::new(session_id, host, local_sender_tag, peer_instance_tag);
        core.protocol_version = 3;
        core
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// This session's raw event sender, handed to newly discovered slaves so
    /// they can mirror their events upstream.
    pub fn events_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    /// Mirror this session's events onto a master's listener set (§4.2 step
    /// 5's "register a listener that re-emits the slave's status events").
    pub fn mirror_events_to(&mut self, upstream: broadcast::Sender<SessionEvent>) {
        self.mirror_to.push(upstream);
    }

    /// Visible to `router`, which emits `MultipleInstancesDetected` and
    /// `OutgoingSessionChanged` on the master's channel directly since those
    /// two events originate from router-level bookkeeping, not session state.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event.clone());
        for upstream in &self.mirror_to {
            let _ = upstream.send(event.clone());
        }
    }

    fn set_status(&mut self, new: SessionStatus) {
        if new != self.status {
            self.status = new;
            self.emit(SessionEvent::StatusChanged { tag: self.receiver_tag, status: new });
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn remote_public_key(&self) -> Option<&LongTermPublicKey> {
        self.remote_long_term_public_key.as_ref()
    }

    pub fn receiver_tag(&self) -> InstanceTag {
        self.receiver_tag
    }

    /// Adopts a peer's instance tag the first time it's observed, per
    /// `new_master`'s "until the peer addresses it" (§3.2). Only the router
    /// calls this, and only while this session hasn't been pinned yet.
    pub(crate) fn pin_receiver_tag(&mut self, tag: InstanceTag) {
        self.receiver_tag = tag;
    }

    pub fn sender_tag(&self) -> InstanceTag {
        self.sender_tag
    }

    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    fn fragment_and_return(&self, serialized: String) -> Vec<String> {
        if codec::is_encoded(&serialized) {
            let mtu = self.host.get_max_fragment_size(&self.session_id);
            fragment::fragment(&serialized, self.sender_tag.0, self.receiver_tag.0, mtu)
        } else {
            vec![serialized]
        }
    }

    fn send_message(&self, msg: &Message) {
        let serialized = codec::serialize(msg);
        for frame in self.fragment_and_return(serialized) {
            self.host.inject_message(&self.session_id, &frame);
        }
    }

    // ── 4.1 lifecycle ────────────────────────────────────────────────

    fn do_start_ake(&mut self) -> Result<Option<u8>, CoreError> {
        let policy = self.host.get_session_policy(&self.session_id);
        if !policy.any_version_enabled() {
            return Ok(None);
        }
        let version = if policy.allow_v3 { 3 } else { 2 };
        self.protocol_version = version;
        let mut msg = self.auth.initiate(version)?;
        msg.sender_instance_tag = self.sender_tag.0;
        msg.receiver_instance_tag = self.receiver_tag.0;
        self.send_message(&Message::Ake(msg));
        Ok(Some(version))
    }

    pub fn start_session(&mut self) -> Result<(), CoreError> {
        if self.status == SessionStatus::Encrypted {
            return Ok(());
        }
        self.do_start_ake()?;
        Ok(())
    }

    pub fn end_session(&mut self) -> Result<(), CoreError> {
        if self.status == SessionStatus::Encrypted {
            let dm = self.encrypt_data_message("", &[Tlv::disconnected()])?;
            self.send_message(&Message::Data(dm));
        }
        self.keys = None;
        self.auth.reset();
        self.smp.abort();
        self.set_status(SessionStatus::Plaintext);
        Ok(())
    }

    pub fn refresh_session(&mut self) -> Result<(), CoreError> {
        self.end_session()?;
        self.start_session()
    }

    // ── 4.5 data-message encrypt ─────────────────────────────────────

    fn encrypt_data_message(&mut self, plaintext: &str, tlvs: &[Tlv]) -> Result<DataMessage, CoreError> {
        let keys = self.keys.as_mut().ok_or(CoreError::PolicyRefusal)?;
        let (l, r) = KeyMatrix::encryption_slot();
        let counter = keys.next_sending_counter(l, r);
        let sending = keys.sending_key(l, r)?;
        let sender_keyid = keys.local_key_id(l);
        let recipient_keyid = keys.remote_key_id(r);
        let next_dh_public = keys.local_public(Slot::Current).to_bytes_be();

        let payload = tlv::build_payload(plaintext, tlvs);
        let encrypted_message = aes_ctr::encrypt(&sending.aes_key, counter, &payload)?;

        let mut dm = DataMessage {
            version: self.protocol_version,
            sender_instance_tag: self.sender_tag.0,
            receiver_instance_tag: self.receiver_tag.0,
            flags: 0,
            sender_keyid,
            recipient_keyid,
            next_dh_public,
            counter_top_half: counter,
            encrypted_message,
            mac: [0u8; 20],
            old_mac_keys: Vec::new(),
        };
        let t = dm.authenticated_bytes();
        dm.mac = mac::compute(&sending.mac_key, &t)?;
        dm.old_mac_keys = keys.drain_old_mac_keys();
        Ok(dm)
    }

    fn encrypt_and_send(&mut self, tlvs: &[Tlv]) -> Result<(), CoreError> {
        let dm = self.encrypt_data_message("", tlvs)?;
        self.send_message(&Message::Data(dm));
        Ok(())
    }

    pub fn transform_sending(&mut self, text: &str, tlvs: Vec<Tlv>) -> Result<Vec<String>, CoreError> {
        match self.status {
            SessionStatus::Encrypted => {
                let dm = self.encrypt_data_message(text, &tlvs)?;
                let serialized = codec::serialize(&Message::Data(dm));
                Ok(self.fragment_and_return(serialized))
            }
            SessionStatus::Plaintext => {
                let policy = self.host.get_session_policy(&self.session_id);
                if policy.require_encryption {
                    self.do_start_ake()?;
                    self.host.require_encrypted_message(&self.session_id);
                    Ok(Vec::new())
                } else if policy.send_whitespace_tag && self.offer_status != OfferStatus::Rejected {
                    let versions = policy.enabled_versions();
                    self.offer_status = OfferStatus::Sent;
                    Ok(vec![codec::with_whitespace_tag(text, &versions)])
                } else {
                    Ok(vec![text.to_string()])
                }
            }
            SessionStatus::Finished => {
                self.host.finished_session_message(&self.session_id);
                Ok(Vec::new())
            }
        }
    }

    // ── 4.2 inbound pipeline ─────────────────────────────────────────

    pub fn transform_receiving(&mut self, raw: &str) -> Result<ReceiveOutcome, CoreError> {
        let policy = self.host.get_session_policy(&self.session_id);
        if !policy.any_version_enabled() {
            return Ok(ReceiveOutcome::text(raw.to_string()));
        }

        let reassembled = if fragment::is_fragment(raw) {
            let frag = match fragment::parse_fragment(raw) {
                Ok(f) => f,
                Err(_) => {
                    warn!("dropping malformed fragment");
                    return Ok(ReceiveOutcome::none());
                }
            };
            let my_tag = self.sender_tag.0;
            match self.assembler.feed(frag, |tag| tag == my_tag) {
                Ok(AssembleOutcome::Complete(s)) => s,
                Ok(AssembleOutcome::Pending) => return Ok(ReceiveOutcome::none()),
                Err(ProtoError::UnknownInstance) => {
                    self.host.message_from_another_instance_received(&self.session_id);
                    return Ok(ReceiveOutcome::none());
                }
                Err(e) => {
                    warn!(error = %e, "dropping invalid fragment run");
                    return Ok(ReceiveOutcome::none());
                }
            }
        } else {
            raw.to_string()
        };

        let message = match codec::classify(&reassembled) {
            Ok(m) => m,
            Err(_) => return Ok(ReceiveOutcome::text(reassembled)),
        };

        if self.addressed_to_another_instance(&message) {
            self.host.message_from_another_instance_received(&self.session_id);
            return Ok(ReceiveOutcome::none());
        }

        match &message {
            Message::PlainText(_) if self.offer_status == OfferStatus::Sent => self.offer_status = OfferStatus::Rejected,
            Message::PlainText(_) => {}
            _ => self.offer_status = OfferStatus::Accepted,
        }

        self.dispatch(message)
    }

    /// §4.2 step 5: a v3 AKE/Data message addressed to a different local
    /// instance is discarded, except the very first DH-COMMIT of a handshake
    /// (`receiverInstanceTag == 0`, since the initiator doesn't know our tag
    /// yet).
    fn addressed_to_another_instance(&self, message: &Message) -> bool {
        match message {
            Message::Ake(ake) if ake.version == 3 => {
                let initial_dh_commit = ake.kind == AkeKind::DhCommit && ake.receiver_instance_tag == 0;
                !initial_dh_commit && ake.receiver_instance_tag != self.sender_tag.0
            }
            Message::Data(dm) if dm.version == 3 => dm.receiver_instance_tag != self.sender_tag.0,
            _ => false,
        }
    }

    fn dispatch(&mut self, message: Message) -> Result<ReceiveOutcome, CoreError> {
        match message {
            Message::Data(dm) => self.handle_data_message(dm),
            Message::Ake(ake) => self.handle_ake_message(ake),
            Message::Error(err) => {
                self.host.show_error(&self.session_id, &err.text);
                let policy = self.host.get_session_policy(&self.session_id);
                if policy.error_start_ake {
                    let versions = policy.enabled_versions();
                    self.host.inject_message(&self.session_id, &codec::format_query(&versions));
                }
                Ok(ReceiveOutcome::none())
            }
            Message::Query(q) => {
                let version = self.handle_query(&q)?;
                Ok(ReceiveOutcome { text: None, ake_started_version: version })
            }
            Message::PlainText(text) => self.handle_plaintext(text),
        }
    }

    /// §4.6: respond to a query with a DH-COMMIT at the best mutually
    /// enabled version (v1 is never negotiated). Returns the version an AKE
    /// was started at, for the router's slave-cloning step.
    pub fn handle_query(&mut self, q: &QueryMessage) -> Result<Option<u8>, CoreError> {
        let policy = self.host.get_session_policy(&self.session_id);
        let version = if q.versions.contains(&3) && policy.allow_v3 {
            Some(3)
        } else if q.versions.contains(&2) && policy.allow_v2 {
            Some(2)
        } else {
            None
        };
        let Some(version) = version else { return Ok(None) };
        self.protocol_version = version;
        let mut msg = self.auth.initiate(version)?;
        msg.sender_instance_tag = self.sender_tag.0;
        msg.receiver_instance_tag = self.receiver_tag.0;
        self.send_message(&Message::Ake(msg));
        Ok(Some(version))
    }

    fn handle_plaintext(&mut self, text: String) -> Result<ReceiveOutcome, CoreError> {
        let (cleaned, versions) = codec::strip_whitespace_tag(&text);
        let mut ake_started_version = None;

        if !versions.is_empty() {
            let policy = self.host.get_session_policy(&self.session_id);
            if policy.whitespace_start_ake {
                ake_started_version = self.handle_query(&QueryMessage { versions })?;
            }
            if matches!(self.status, SessionStatus::Encrypted | SessionStatus::Finished) {
                self.host.unencrypted_message_received(&self.session_id, &cleaned);
            }
            return Ok(ReceiveOutcome { text: Some(cleaned), ake_started_version });
        }

        match self.status {
            SessionStatus::Encrypted | SessionStatus::Finished => {
                self.host.unencrypted_message_received(&self.session_id, &cleaned);
            }
            SessionStatus::Plaintext => {
                let policy = self.host.get_session_policy(&self.session_id);
                if policy.require_encryption {
                    self.host.unencrypted_message_received(&self.session_id, &cleaned);
                }
            }
        }
        Ok(ReceiveOutcome { text: Some(cleaned), ake_started_version })
    }

    fn handle_ake_message(&mut self, ake: AkeMessage) -> Result<ReceiveOutcome, CoreError> {
        let sender_instance_tag = ake.sender_instance_tag;
        let reply = self.auth.receive(&ake)?;
        if let Some(mut reply_msg) = reply {
            reply_msg.sender_instance_tag = self.sender_tag.0;
            reply_msg.receiver_instance_tag = sender_instance_tag;
            self.send_message(&Message::Ake(reply_msg));
        }
        if self.auth.is_secure() {
            if let Some(output) = self.auth.take_output() {
                self.remote_long_term_public_key = Some(output.remote_long_term_public);
                self.keys = Some(KeyMatrix::populate_from_ake(output.local_pair, output.remote_public)?);
                self.auth.reset();
                self.smp.abort();
                self.set_status(SessionStatus::Encrypted);
            }
        }
        Ok(ReceiveOutcome::none())
    }

    fn emit_unreadable(&mut self) {
        self.host.unreadable_message_received(&self.session_id);
        let reply = self.host.get_reply_for_unreadable_message(&self.session_id);
        self.send_message(&Message::Error(ErrorMessage { text: reply }));
    }

    /// §4.4: decrypt, MAC-verify, ratchet, and dispatch TLVs for one inbound
    /// data message.
    fn handle_data_message(&mut self, dm: DataMessage) -> Result<ReceiveOutcome, CoreError> {
        if self.status != SessionStatus::Encrypted {
            self.emit_unreadable();
            return Ok(ReceiveOutcome::none());
        }
        let Some(keys) = self.keys.as_mut() else {
            self.emit_unreadable();
            return Ok(ReceiveOutcome::none());
        };
        let Some((l, r)) = keys.find_cell(dm.recipient_keyid, dm.sender_keyid) else {
            self.emit_unreadable();
            return Ok(ReceiveOutcome::none());
        };

        let receiving = keys.receiving_key(l, r)?;
        let t = dm.authenticated_bytes();
        if !mac::verify(&receiving.mac_key, &t, &dm.mac)? {
            self.emit_unreadable();
            return Ok(ReceiveOutcome::none());
        }

        if keys.check_and_record_receiving_counter(l, r, dm.counter_top_half).is_err() {
            self.emit_unreadable();
            return Ok(ReceiveOutcome::none());
        }
        keys.mark_receiving_mac_key_used(l, r);

        let plaintext_bytes = aes_ctr::decrypt(&receiving.aes_key, dm.counter_top_half, &dm.encrypted_message)?;

        if dm.sender_keyid == keys.most_recent_remote_key_id() {
            keys.ratchet_remote(DhPublicKey::from_bytes_be(&dm.next_dh_public));
        }
        if dm.recipient_keyid == keys.most_recent_local_key_id() {
            keys.ratchet_local()?;
        }

        let (text, tlvs) = tlv::split_payload(&plaintext_bytes)?;

        if tlvs.iter().any(|t| t.tlv_type == TLV_DISCONNECTED) {
            self.set_status(SessionStatus::Finished);
            return Ok(ReceiveOutcome::none());
        }

        let mut outbound = Vec::new();
        for t in &tlvs {
            if t.is_smp() {
                let handled = self.smp.handle_tlv(t)?;
                outbound.extend(handled.outbound);
            }
        }
        if !outbound.is_empty() {
            self.encrypt_and_send(&outbound)?;
        }
        if tlvs.iter().any(|t| t.is_smp()) {
            return Ok(ReceiveOutcome::none());
        }

        Ok(ReceiveOutcome::text(text))
    }

    // ── 4.8 SMP operations ───────────────────────────────────────────

    pub fn init_smp(&mut self, question: Option<String>, secret: &[u8]) -> Result<(), CoreError> {
        if self.status != SessionStatus::Encrypted {
            return Err(CoreError::PolicyRefusal);
        }
        let tlvs = self.smp.initiate(question, secret)?;
        self.encrypt_and_send(&tlvs)
    }

    pub fn respond_smp(&mut self, secret: &[u8]) -> Result<(), CoreError> {
        if self.status != SessionStatus::Encrypted {
            return Err(CoreError::PolicyRefusal);
        }
        let tlvs = self.smp.respond(secret)?;
        self.encrypt_and_send(&tlvs)
    }

    pub fn abort_smp(&mut self) -> Result<(), CoreError> {
        let tlvs = self.smp.abort();
        self.encrypt_and_send(&tlvs)
    }

    pub fn is_smp_in_progress(&self) -> bool {
        self.smp.is_in_progress()
    }

    // ── router hooks (§4.2 step 5, §4.6) ────────────────────────────

    pub fn clone_auth(&self) -> Box<dyn AuthContext> {
        self.auth.clone_box()
    }

    pub fn install_auth(&mut self, auth: Box<dyn AuthContext>) {
        self.auth = auth;
    }

    pub fn reset_auth(&mut self) {
        self.auth.reset();
    }
}
