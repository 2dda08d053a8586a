//! End-to-end scenarios (§8), wiring two or three in-memory `SessionCore`s
//! together through a fake `Host`, in the style of
//! `guard-v2/crates/guard-service/tests/connected_tests.rs`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use otr_core::{Host, OtrEngine, Policy, SessionId, SessionStatus};
use otr_crypto::identity::LongTermKeyPair;
use parking_lot::Mutex;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Side {
    Alice,
    Bob,
}

/// The in-memory "transport": `inject_message` enqueues, the test driver
/// drains. Also keeps a running count of frames sent, for the fragmentation
/// scenario's sanity checks.
struct Wire {
    queue: Mutex<VecDeque<(Side, String)>>,
    sent: AtomicUsize,
}

impl Wire {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), sent: AtomicUsize::new(0) }
    }

    fn send(&self, to: Side, frame: String) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push_back((to, frame));
    }

    fn pop(&self) -> Option<(Side, String)> {
        self.queue.lock().pop_front()
    }
}

struct FakeHost {
    name: &'static str,
    to: Side,
    identity: LongTermKeyPair,
    policy: Policy,
    wire: Arc<Wire>,
    max_fragment_size: usize,
}

impl FakeHost {
    fn new(name: &'static str, to: Side, policy: Policy, wire: Arc<Wire>) -> Arc<Self> {
        Arc::new(Self { name, to, identity: LongTermKeyPair::generate(), policy, wire, max_fragment_size: 65536 })
    }

    fn with_fragment_size(name: &'static str, to: Side, policy: Policy, wire: Arc<Wire>, max_fragment_size: usize) -> Arc<Self> {
        Arc::new(Self { name, to, identity: LongTermKeyPair::generate(), policy, wire, max_fragment_size })
    }
}

impl Host for FakeHost {
    fn inject_message(&self, _session_id: &SessionId, frame: &str) {
        self.wire.send(self.to, frame.to_string());
    }

    fn get_session_policy(&self, _session_id: &SessionId) -> Policy {
        self.policy
    }

    fn get_local_key_pair(&self, _session_id: &SessionId) -> LongTermKeyPair {
        self.identity.clone()
    }

    fn get_max_fragment_size(&self, _session_id: &SessionId) -> usize {
        self.max_fragment_size
    }

    fn show_error(&self, _session_id: &SessionId, _text: &str) {}
    fn show_alert(&self, _session_id: &SessionId, _text: &str) {}
    fn unencrypted_message_received(&self, _session_id: &SessionId, _text: &str) {}
    fn unreadable_message_received(&self, _session_id: &SessionId) {}
    fn finished_session_message(&self, _session_id: &SessionId) {}
    fn require_encrypted_message(&self, _session_id: &SessionId) {}
    fn message_from_another_instance_received(&self, _session_id: &SessionId) {}
    fn multiple_instances_detected(&self, _session_id: &SessionId) {}

    fn get_reply_for_unreadable_message(&self, _session_id: &SessionId) -> String {
        format!("{}: that message was unreadable", self.name)
    }

    fn get_fallback_message(&self, _session_id: &SessionId) -> String {
        format!("{} wants to start a private conversation.", self.name)
    }
}

struct Pair {
    wire: Arc<Wire>,
    alice: Arc<OtrEngine>,
    bob: Arc<OtrEngine>,
    alice_id: SessionId,
    bob_id: SessionId,
}

impl Pair {
    fn new(policy: Policy) -> Self {
        Self::with_fragment_sizes(policy, 65536, 65536)
    }

    fn with_fragment_sizes(policy: Policy, alice_mtu: usize, bob_mtu: usize) -> Self {
        let wire = Arc::new(Wire::new());
        let alice_host = FakeHost::with_fragment_size("alice", Side::Bob, policy, wire.clone(), alice_mtu);
        let bob_host = FakeHost::with_fragment_size("bob", Side::Alice, policy, wire.clone(), bob_mtu);
        Self {
            alice: Arc::new(OtrEngine::new(alice_host)),
            bob: Arc::new(OtrEngine::new(bob_host)),
            alice_id: SessionId::new("alice", "bob", "otr-test"),
            bob_id: SessionId::new("bob", "alice", "otr-test"),
            wire,
        }
    }

    /// Drain the wire, returning every plaintext either side's
    /// `transform_receiving` surfaced, in delivery order.
    fn drain(&self) -> Vec<(Side, String)> {
        let mut delivered = Vec::new();
        while let Some((to, frame)) = self.wire.pop() {
            let result = match to {
                Side::Alice => self.alice.transform_receiving(&self.alice_id, &frame),
                Side::Bob => self.bob.transform_receiving(&self.bob_id, &frame),
            };
            if let Ok(Some(text)) = result {
                delivered.push((to, text));
            }
        }
        delivered
    }

    fn establish(&self) {
        self.alice.start_session(&self.alice_id).unwrap();
        self.drain();
        assert_eq!(self.alice.get_session_status(&self.alice_id, None), SessionStatus::Encrypted);
        assert_eq!(self.bob.get_session_status(&self.bob_id, None), SessionStatus::Encrypted);
    }
}

fn secure_policy() -> Policy {
    Policy { require_encryption: true, ..Policy::default() }
}

#[test]
fn clean_v3_ake_and_round_trip() {
    let pair = Pair::new(secure_policy());
    pair.establish();

    let frames = pair.alice.transform_sending(&pair.alice_id, "hello").unwrap();
    for f in frames {
        pair.wire.send(Side::Bob, f);
    }
    let delivered = pair.drain();
    assert_eq!(delivered, vec![(Side::Bob, "hello".to_string())]);
}

#[test]
fn fragmentation_round_trip_and_duplicate_rejection() {
    // A small MTU forces `transform_sending` to fragment the data message.
    let pair = Pair::with_fragment_sizes(secure_policy(), 65536, 65536);
    pair.establish();

    let alice_frames = pair.alice.transform_sending(&pair.alice_id, &"x".repeat(600)).unwrap();
    assert!(alice_frames.len() == 1, "sanity: unfragmented send with a large MTU stays one frame");

    // Re-run with a tiny MTU on Alice's side for the actual fragmentation case.
    let pair = Pair::with_fragment_sizes(secure_policy(), 120, 65536);
    pair.establish();
    let long_text = "y".repeat(600);
    let frames = pair.alice.transform_sending(&pair.alice_id, &long_text).unwrap();
    assert!(frames.len() > 1, "a 600-byte data message at MTU 120 must fragment");

    for f in &frames {
        pair.wire.send(Side::Bob, f.clone());
    }
    let delivered = pair.drain();
    assert_eq!(delivered, vec![(Side::Bob, long_text.clone())]);

    // Re-deliver the first fragment of a second message a second time: the
    // assembler rejects the run as out of order and drops it silently.
    let frames2 = pair.alice.transform_sending(&pair.alice_id, &long_text).unwrap();
    assert!(frames2.len() > 1);
    let first = frames2[0].clone();
    assert!(pair.bob.transform_receiving(&pair.bob_id, &first).unwrap().is_none());
    assert!(pair.bob.transform_receiving(&pair.bob_id, &first).unwrap().is_none());

    // A third message delivered with fragment 2 arriving before fragment 1
    // (genuine permutation, not a repeat) is rejected the moment the
    // out-of-order fragment lands.
    let frames3 = pair.alice.transform_sending(&pair.alice_id, &long_text).unwrap();
    assert!(frames3.len() > 1);
    assert!(pair.bob.transform_receiving(&pair.bob_id, &frames3[1]).unwrap().is_none());
}

#[test]
fn mac_replay_is_rejected() {
    let pair = Pair::new(secure_policy());
    pair.establish();

    let frames = pair.alice.transform_sending(&pair.alice_id, "first message").unwrap();
    assert_eq!(frames.len(), 1);
    let frame = frames[0].clone();

    let first = pair.bob.transform_receiving(&pair.bob_id, &frame).unwrap();
    assert_eq!(first, Some("first message".to_string()));

    // Replaying the identical frame must be rejected (counter did not
    // advance) without tearing down the session.
    let replay = pair.bob.transform_receiving(&pair.bob_id, &frame);
    assert!(replay.is_ok());
    assert_eq!(replay.unwrap(), None);
    assert_eq!(pair.bob.get_session_status(&pair.bob_id, None), SessionStatus::Encrypted);
}

#[test]
fn disconnect_tlv_finishes_the_peer() {
    let pair = Pair::new(secure_policy());
    pair.establish();

    pair.alice.end_session(&pair.alice_id).unwrap();
    let delivered = pair.drain();
    assert!(delivered.is_empty());

    assert_eq!(pair.alice.get_session_status(&pair.alice_id, None), SessionStatus::Plaintext);
    assert_eq!(pair.bob.get_session_status(&pair.bob_id, None), SessionStatus::Finished);

    // Sending into a Finished session yields no frames.
    assert!(pair.bob.transform_sending(&pair.bob_id, "anything").unwrap().is_empty());
}

#[test]
fn smp_success_leaves_no_proof_in_progress() {
    let pair = Pair::new(secure_policy());
    pair.establish();

    pair.alice.init_smp(&pair.alice_id, None, Some("favourite colour?".to_string()), b"blue").unwrap();
    pair.drain();
    pair.bob.respond_smp(&pair.bob_id, None, b"blue").unwrap();
    let delivered = pair.drain();

    // SMP TLVs never surface as app-visible plaintext.
    assert!(delivered.is_empty());
    assert!(!pair.alice.is_smp_in_progress(&pair.alice_id, None));
    assert!(!pair.bob.is_smp_in_progress(&pair.bob_id, None));
}

#[test]
fn instance_split_creates_a_slave_per_sender_tag_and_reports_multiple_instances() {
    // Two independent engines stand in for two logged-in instances of "bob".
    // Both talk to a single Alice SessionId; each picks its own random
    // instance tag. Alice's master pins itself to the first tag it ever
    // hears (bob1) — no slave needed for a single client — and only the
    // second, genuinely distinct instance (bob2) gets its own slave.
    let policy = secure_policy();
    let wire = Arc::new(Wire::new());

    let alice_host = FakeHost::new("alice", Side::Bob, policy, wire.clone());
    let alice = Arc::new(OtrEngine::new(alice_host));
    let alice_id = SessionId::new("alice", "bob", "otr-test");

    let bob1_host = FakeHost::new("bob1", Side::Alice, policy, wire.clone());
    let bob1 = Arc::new(OtrEngine::new(bob1_host));
    let bob1_id = SessionId::new("bob1", "alice", "otr-test");

    let bob2_host = FakeHost::new("bob2", Side::Alice, policy, wire.clone());
    let bob2 = Arc::new(OtrEngine::new(bob2_host));
    let bob2_id = SessionId::new("bob2", "alice", "otr-test");

    // Every frame addressed to "Bob" fans out to both of Bob's instances;
    // each instance's own receiver-tag filtering (§4.2 step 5) discards what
    // isn't addressed to it.
    let drain_all = || {
        while let Some((to, frame)) = wire.pop() {
            match to {
                Side::Alice => {
                    let _ = alice.transform_receiving(&alice_id, &frame);
                }
                Side::Bob => {
                    let _ = bob1.transform_receiving(&bob1_id, &frame);
                    let _ = bob2.transform_receiving(&bob2_id, &frame);
                }
            }
        }
    };

    bob1.start_session(&bob1_id).unwrap();
    drain_all();
    bob2.start_session(&bob2_id).unwrap();
    drain_all();

    // Master tag (now pinned to bob1) + one slave (bob2).
    let instances = alice.get_instances(&alice_id);
    assert_eq!(instances.len(), 2, "expected master pinned to bob1 plus one slave for bob2, got {instances:?}");
    assert_eq!(alice.get_session_status(&alice_id, None), SessionStatus::Encrypted);
}
