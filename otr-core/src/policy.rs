//! Session policy and the status/offer enums it governs.
//!
//! Grounded on `guard_core::settings::GuardSettings` (a plain serde-able
//! configuration record consulted throughout the engine).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Policy {
    pub allow_v1: bool,
    pub allow_v2: bool,
    pub allow_v3: bool,
    pub require_encryption: bool,
    pub send_whitespace_tag: bool,
    pub whitespace_start_ake: bool,
    pub error_start_ake: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_v1: false,
            allow_v2: true,
            allow_v3: true,
            require_encryption: false,
            send_whitespace_tag: false,
            whitespace_start_ake: true,
            error_start_ake: true,
        }
    }
}

impl Policy {
    /// `allowV1` alone never opens a session (§4.2 step 1).
    pub fn any_version_enabled(&self) -> bool {
        self.allow_v2 || self.allow_v3
    }

    /// Versions this policy is willing to advertise/negotiate, highest
    /// priority first (v1 is never negotiated, only recognized on input).
    pub fn enabled_versions(&self) -> Vec<u8> {
        let mut versions = Vec::new();
        if self.allow_v3 {
            versions.push(3);
        }
        if self.allow_v2 {
            versions.push(2);
        }
        versions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Plaintext,
    Encrypted,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Idle,
    Sent,
    Accepted,
    Rejected,
}
