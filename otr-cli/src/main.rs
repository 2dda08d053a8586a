//! Demo binary for the OTR session engine (§6.2/§8 scenarios), grounded on
//! `guard-v2/crates/guard-service/src/main.rs`'s `Cli`/`Commands` shape.
//!
//! There is no real transport here: `DemoHost::inject_message` drops frames
//! onto a shared in-memory queue and the top-level driver drains it after
//! each call, rather than calling the peer engine back in-line — recursing
//! straight into the peer's `transform_receiving` from inside `inject_message`
//! would re-enter the sending engine's own conversation lock as soon as the
//! peer's reply routed back, since both directions run on the same thread.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use otr_core::{Host, OtrEngine, Policy, SessionEvent, SessionId};
use otr_crypto::identity::LongTermKeyPair;
use parking_lot::Mutex;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "OTR session engine demo", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run Alice and Bob through a v3 AKE, an encrypted round trip, and an SMP exchange.
    Demo {
        /// Optional TOML file overriding the default Policy for both sides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Generate a fresh long-term identity key pair and print its fingerprint.
    Fingerprint,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo { config } => run_demo(config).await,
        Commands::Fingerprint => {
            let kp = LongTermKeyPair::generate();
            println!("{}", kp.public.fingerprint());
            Ok(())
        }
    }
}

/// §B.3: Policy is the only configuration surface, loaded with a
/// serde-default fallback the same way `guard_core::storage::load_settings`
/// falls back to `GuardSettings::default()`.
fn load_policy(path: Option<&PathBuf>) -> Result<Policy> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)?;
            Ok(toml::from_str(&text)?)
        }
        None => Ok(Policy::default()),
    }
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Alice,
    Bob,
}

/// The shared "transport": frames queued by one side's `inject_message`,
/// drained by the demo driver between application-level calls.
struct Wire {
    queue: Mutex<VecDeque<(Side, String)>>,
}

impl Wire {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()) }
    }

    fn send(&self, to: Side, frame: String) {
        self.queue.lock().push_back((to, frame));
    }

    fn pop(&self) -> Option<(Side, String)> {
        self.queue.lock().pop_front()
    }
}

struct DemoHost {
    name: &'static str,
    to: Side,
    identity: LongTermKeyPair,
    policy: Policy,
    wire: Arc<Wire>,
}

impl DemoHost {
    fn new(name: &'static str, to: Side, policy: Policy, wire: Arc<Wire>) -> Arc<Self> {
        Arc::new(Self { name, to, identity: LongTermKeyPair::generate(), policy, wire })
    }
}

impl Host for DemoHost {
    fn inject_message(&self, _session_id: &SessionId, frame: &str) {
        info!(from = self.name, bytes = frame.len(), "sending frame");
        self.wire.send(self.to, frame.to_string());
    }

    fn get_session_policy(&self, _session_id: &SessionId) -> Policy {
        self.policy
    }

    fn get_local_key_pair(&self, _session_id: &SessionId) -> LongTermKeyPair {
        self.identity.clone()
    }

    fn get_max_fragment_size(&self, _session_id: &SessionId) -> usize {
        // Large enough that the demo's short messages never fragment; see
        // the `otr-core` integration tests for the fragmentation path.
        4096
    }

    fn show_error(&self, _session_id: &SessionId, text: &str) {
        tracing::error!(host = self.name, "{text}");
    }

    fn show_alert(&self, _session_id: &SessionId, text: &str) {
        info!(host = self.name, "alert: {text}");
    }

    fn unencrypted_message_received(&self, _session_id: &SessionId, text: &str) {
        info!(host = self.name, "unencrypted message: {text:?}");
    }

    fn unreadable_message_received(&self, _session_id: &SessionId) {
        tracing::warn!(host = self.name, "unreadable message received");
    }

    fn finished_session_message(&self, _session_id: &SessionId) {
        info!(host = self.name, "session already finished, message dropped");
    }

    fn require_encrypted_message(&self, _session_id: &SessionId) {
        info!(host = self.name, "encryption required, AKE started");
    }

    fn message_from_another_instance_received(&self, _session_id: &SessionId) {
        tracing::warn!(host = self.name, "message addressed to a different instance");
    }

    fn multiple_instances_detected(&self, _session_id: &SessionId) {
        info!(host = self.name, "peer is online from more than one instance");
    }

    fn get_reply_for_unreadable_message(&self, _session_id: &SessionId) -> String {
        "The message you sent was unreadable.".to_string()
    }

    fn get_fallback_message(&self, _session_id: &SessionId) -> String {
        format!("{} is trying to start a private conversation.", self.name)
    }
}

struct Demo {
    wire: Arc<Wire>,
    alice: Arc<OtrEngine>,
    bob: Arc<OtrEngine>,
    alice_session_id: SessionId,
    bob_session_id: SessionId,
}

impl Demo {
    /// Drain the wire until empty, dispatching each frame to the addressed
    /// engine. A frame's processing may enqueue a reply, so this keeps
    /// looping rather than doing a single pass.
    fn drain(&self) -> Result<()> {
        while let Some((to, frame)) = self.wire.pop() {
            let delivered = match to {
                Side::Alice => self.alice.transform_receiving(&self.alice_session_id, &frame)?,
                Side::Bob => self.bob.transform_receiving(&self.bob_session_id, &frame)?,
            };
            if let Some(text) = delivered {
                info!(to = ?to, "delivered plaintext: {text:?}");
            }
        }
        Ok(())
    }
}

fn print_new_events(label: &str, rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => info!(who = label, ?event, "session event"),
            Err(_) => break,
        }
    }
}

async fn run_demo(config: Option<PathBuf>) -> Result<()> {
    let policy = load_policy(config.as_ref())?;
    let wire = Arc::new(Wire::new());

    let alice_session_id = SessionId::new("alice@example.com", "bob@example.com", "otr-demo");
    let bob_session_id = SessionId::new("bob@example.com", "alice@example.com", "otr-demo");

    let alice_host = DemoHost::new("alice", Side::Bob, policy, wire.clone());
    let bob_host = DemoHost::new("bob", Side::Alice, policy, wire.clone());

    let alice = Arc::new(OtrEngine::new(alice_host));
    let bob = Arc::new(OtrEngine::new(bob_host));

    let demo = Demo {
        wire,
        alice: alice.clone(),
        bob: bob.clone(),
        alice_session_id: alice_session_id.clone(),
        bob_session_id: bob_session_id.clone(),
    };

    let mut alice_events = alice.subscribe(&alice_session_id);
    let mut bob_events = bob.subscribe(&bob_session_id);

    info!("-- starting AKE --");
    alice.start_session(&alice_session_id)?;
    demo.drain()?;
    print_new_events("alice", &mut alice_events);
    print_new_events("bob", &mut bob_events);

    println!("alice status: {:?}", alice.get_session_status(&alice_session_id, None));
    println!("bob status:   {:?}", bob.get_session_status(&bob_session_id, None));

    info!("-- encrypted round trip --");
    for frame in alice.transform_sending(&alice_session_id, "hello, bob")? {
        demo.wire.send(Side::Bob, frame);
    }
    demo.drain()?;

    if let Some(fp) = alice.get_remote_public_key(&alice_session_id, None).map(|k| k.fingerprint()) {
        println!("alice sees bob's fingerprint:   {fp}");
    }
    if let Some(fp) = bob.get_remote_public_key(&bob_session_id, None).map(|k| k.fingerprint()) {
        println!("bob sees alice's fingerprint:   {fp}");
    }

    info!("-- SMP: verifying a shared secret --");
    alice.init_smp(&alice_session_id, None, Some("favourite colour?".to_string()), b"blue")?;
    demo.drain()?;
    bob.respond_smp(&bob_session_id, None, b"blue")?;
    demo.drain()?;

    println!("alice smp in progress: {}", alice.is_smp_in_progress(&alice_session_id, None));
    println!("bob smp in progress:   {}", bob.is_smp_in_progress(&bob_session_id, None));

    print_new_events("alice", &mut alice_events);
    print_new_events("bob", &mut bob_events);

    info!("-- ending the session --");
    alice.end_session(&alice_session_id)?;
    demo.drain()?;
    println!("alice status: {:?}", alice.get_session_status(&alice_session_id, None));
    println!("bob status:   {:?}", bob.get_session_status(&bob_session_id, None));

    Ok(())
}
