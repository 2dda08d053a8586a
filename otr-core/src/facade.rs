//! `OtrEngine`: the public, typed request/response surface over an
//! [`InstanceRouter`] (§6.2).
//!
//! Grounded on `guard-core::ipc` — a thin facade struct that validates
//! nothing itself and simply forwards typed calls to the subsystem that
//! owns the relevant state.

use std::sync::Arc;

use otr_crypto::identity::LongTermPublicKey;
use otr_proto::tlv::Tlv;
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::host::Host;
use crate::ids::{InstanceTag, SessionId};
use crate::policy::SessionStatus;
use crate::router::InstanceRouter;
use crate::session::SessionEvent;

/// The engine applications embed. One instance per local account is the
/// expected usage (§2): every operation is keyed by [`SessionId`], so a
/// single `OtrEngine` can track many peers under one account transparently.
pub struct OtrEngine {
    router: InstanceRouter,
}

impl OtrEngine {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { router: InstanceRouter::new(host) }
    }

    /// §4.2/§4.5: the only two operations that touch the wire on every
    /// message. Plaintext in, frame(s) out; frame in, plaintext out (if any).
    pub fn transform_sending(&self, session_id: &SessionId, plaintext: &str) -> Result<Vec<String>, CoreError> {
        self.router.transform_sending(session_id, plaintext, Vec::new())
    }

    pub fn transform_receiving(&self, session_id: &SessionId, raw: &str) -> Result<Option<String>, CoreError> {
        self.router.transform_receiving(session_id, raw)
    }

    // ── §4.1/§6.2 lifecycle ──────────────────────────────────────────

    pub fn start_session(&self, session_id: &SessionId) -> Result<(), CoreError> {
        self.router.start_session(session_id)
    }

    pub fn end_session(&self, session_id: &SessionId) -> Result<(), CoreError> {
        self.router.end_session(session_id)
    }

    pub fn refresh_session(&self, session_id: &SessionId) -> Result<(), CoreError> {
        self.router.refresh_session(session_id)
    }

    // ── §6.2 instance introspection ──────────────────────────────────

    pub fn get_session_status(&self, session_id: &SessionId, instance: Option<InstanceTag>) -> SessionStatus {
        self.router.get_session_status(session_id, instance)
    }

    pub fn get_instances(&self, session_id: &SessionId) -> Vec<InstanceTag> {
        self.router.get_instances(session_id)
    }

    pub fn set_outgoing_instance(&self, session_id: &SessionId, instance: InstanceTag) {
        self.router.set_outgoing_instance(session_id, instance)
    }

    pub fn get_outgoing_instance(&self, session_id: &SessionId) -> Option<InstanceTag> {
        self.router.get_outgoing_instance(session_id)
    }

    pub fn get_remote_public_key(&self, session_id: &SessionId, instance: Option<InstanceTag>) -> Option<LongTermPublicKey> {
        self.router.get_remote_public_key(session_id, instance)
    }

    // ── §4.8/§6.2 SMP ─────────────────────────────────────────────────

    pub fn init_smp(&self, session_id: &SessionId, instance: Option<InstanceTag>, question: Option<String>, secret: &[u8]) -> Result<(), CoreError> {
        self.router.init_smp(session_id, instance, question, secret)
    }

    pub fn respond_smp(&self, session_id: &SessionId, instance: Option<InstanceTag>, secret: &[u8]) -> Result<(), CoreError> {
        self.router.respond_smp(session_id, instance, secret)
    }

    pub fn abort_smp(&self, session_id: &SessionId, instance: Option<InstanceTag>) -> Result<(), CoreError> {
        self.router.abort_smp(session_id, instance)
    }

    pub fn is_smp_in_progress(&self, session_id: &SessionId, instance: Option<InstanceTag>) -> bool {
        self.router.is_smp_in_progress(session_id, instance)
    }

    /// Send an application TLV alongside (or instead of) plaintext, e.g. a
    /// custom extension TLV. Ordinary messages should use
    /// [`Self::transform_sending`] instead.
    pub fn transform_sending_with_tlvs(&self, session_id: &SessionId, plaintext: &str, tlvs: Vec<Tlv>) -> Result<Vec<String>, CoreError> {
        self.router.transform_sending(session_id, plaintext, tlvs)
    }

    /// §6.2's `addListener`/`removeListener` for `statusChanged`,
    /// `multipleInstancesDetected`, and `outgoingSessionChanged`, realized as
    /// a broadcast subscription: a listener is added by subscribing and
    /// removed by dropping the returned receiver.
    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<SessionEvent> {
        self.router.subscribe(session_id)
    }
}
