//! `Host`: the callbacks and queries `SessionCore` needs from its embedding
//! application (§6.1). Grounded on `dl_store`'s error-aggregation shape and
//! `guard_core::event_log`'s callback surface — a small trait the engine
//! invokes synchronously, never the other way around.

use otr_crypto::identity::LongTermKeyPair;

use crate::ids::SessionId;
use crate::policy::Policy;

pub trait Host: Send + Sync {
    /// Transport send. Best-effort and non-blocking from the core's
    /// perspective (§5) — a slow host is the host's problem.
    fn inject_message(&self, session_id: &SessionId, frame: &str);

    fn get_session_policy(&self, session_id: &SessionId) -> Policy;
    fn get_local_key_pair(&self, session_id: &SessionId) -> LongTermKeyPair;
    fn get_max_fragment_size(&self, session_id: &SessionId) -> usize;

    fn show_error(&self, session_id: &SessionId, text: &str);
    fn show_alert(&self, session_id: &SessionId, text: &str);
    fn unencrypted_message_received(&self, session_id: &SessionId, text: &str);
    fn unreadable_message_received(&self, session_id: &SessionId);
    fn finished_session_message(&self, session_id: &SessionId);
    fn require_encrypted_message(&self, session_id: &SessionId);
    fn message_from_another_instance_received(&self, session_id: &SessionId);
    fn multiple_instances_detected(&self, session_id: &SessionId);
    fn get_reply_for_unreadable_message(&self, session_id: &SessionId) -> String;
    fn get_fallback_message(&self, session_id: &SessionId) -> String;
}
