//! Session and instance identifiers.
//!
//! Grounded on `dl_crypto::session::Session::session_id` (a plain String key)
//! generalized to an opaque tuple per the core's multi-account/multi-peer
//! needs.

use rand::Rng;

/// The reserved instance tag meaning "any"/"not yet pinned".
pub const ZERO_TAG: u32 = 0;

/// Lowest value a freshly generated instance tag may take.
const MIN_GENERATED_TAG: u32 = 0x100;

/// Identifies one conversation: (account, peer, protocol name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub account: String,
    pub peer: String,
    pub protocol: String,
}

impl SessionId {
    pub fn new(account: impl Into<String>, peer: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            peer: peer.into(),
            protocol: protocol.into(),
        }
    }
}

/// A v3 instance tag (32-bit). Use [`InstanceTag::generate`] for a fresh
/// sender tag; inbound tags arrive over the wire and are constructed
/// directly from the raw `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceTag(pub u32);

impl InstanceTag {
    pub const ZERO: InstanceTag = InstanceTag(ZERO_TAG);

    /// Draw a fresh sender tag uniformly from `[0x100, 0xFFFFFFFF]`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        InstanceTag(rng.gen_range(MIN_GENERATED_TAG..=u32::MAX))
    }

    pub fn is_zero(self) -> bool {
        self.0 == ZERO_TAG
    }
}

impl From<u32> for InstanceTag {
    fn from(v: u32) -> Self {
        InstanceTag(v)
    }
}

impl From<InstanceTag> for u32 {
    fn from(t: InstanceTag) -> Self {
        t.0
    }
}
