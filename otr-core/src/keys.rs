//! `SessionKeys` cells and the 2×2 `KeyMatrix` ratchet (§3.1, §4.3).
//!
//! Grounded on `dl_crypto::ratchet::RatchetSession` for the overall shape of
//! "mutable crypto state struct, mutated only through named ratchet
//! operations" — the actual ratchet algorithm here is OTR's four-cell matrix
//! rather than Double Ratchet's single-chain design.

use otr_crypto::dh::{DhKeypair, DhPublicKey};
use otr_crypto::kdf::{self, DirectionalKeys};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Previous = 0,
    Current = 1,
}

const SLOTS: [Slot; 2] = [Slot::Previous, Slot::Current];

struct LocalSlot {
    keypair: DhKeypair,
    key_id: u32,
}

struct RemoteSlot {
    public: DhPublicKey,
    key_id: u32,
}

#[derive(Default)]
struct CellState {
    sending: Option<DirectionalKeys>,
    receiving: Option<DirectionalKeys>,
    sending_counter: u64,
    /// `None` until the first inbound message against this cell; the
    /// counter invariant allows equality only on that first use.
    receiving_counter: Option<u64>,
    is_used_receiving_mac_key: bool,
}

/// The 2×2 ring of `SessionKeys` cells plus the pending old-MAC-key pool
/// (§3.1, §4.3).
pub struct KeyMatrix {
    locals: [LocalSlot; 2],
    remotes: [RemoteSlot; 2],
    cells: [[CellState; 2]; 2],
    we_are_low: bool,
    old_mac_pool: Vec<u8>,
}

impl KeyMatrix {
    /// Populate the matrix on entering Encrypted (§4.3's "Initial
    /// population"): the AKE's local pair becomes key id 1 at `Previous`, a
    /// freshly generated pair becomes key id 2 at `Current`; both share the
    /// single known remote public key at id 1.
    pub fn populate_from_ake(ake_local_pair: DhKeypair, ake_remote_public: DhPublicKey) -> Result<Self, CoreError> {
        let we_are_low = ake_local_pair.public() < ake_remote_public;
        let fresh_local = DhKeypair::generate()?;
        Ok(Self {
            locals: [
                LocalSlot { keypair: ake_local_pair, key_id: 1 },
                LocalSlot { keypair: fresh_local, key_id: 2 },
            ],
            remotes: [
                RemoteSlot { public: ake_remote_public.clone(), key_id: 1 },
                RemoteSlot { public: ake_remote_public, key_id: 1 },
            ],
            cells: Default::default(),
            we_are_low,
            old_mac_pool: Vec::new(),
        })
    }

    /// Key id of the local keypair at `Current` — "most recent" per §4.3.
    pub fn most_recent_local_key_id(&self) -> u32 {
        self.locals[Slot::Current as usize].key_id
    }

    /// Key id of the remote public key at `Current` — "most recent".
    pub fn most_recent_remote_key_id(&self) -> u32 {
        self.remotes[Slot::Current as usize].key_id
    }

    pub fn local_public(&self, slot: Slot) -> DhPublicKey {
        self.locals[slot as usize].keypair.public()
    }

    pub fn local_key_id(&self, slot: Slot) -> u32 {
        self.locals[slot as usize].key_id
    }

    pub fn remote_key_id(&self, slot: Slot) -> u32 {
        self.remotes[slot as usize].key_id
    }

    /// Find the `(local, remote)` slot pair whose ids equal
    /// `(recipient_key_id, sender_key_id)`, per §4.3's lookup rule.
    pub fn find_cell(&self, recipient_key_id: u32, sender_key_id: u32) -> Option<(Slot, Slot)> {
        for &l in &SLOTS {
            for &r in &SLOTS {
                if self.locals[l as usize].key_id == recipient_key_id && self.remotes[r as usize].key_id == sender_key_id {
                    return Some((l, r));
                }
            }
        }
        None
    }

    /// The encryption cell, `(Previous, Current)` per §4.3.
    pub fn encryption_slot() -> (Slot, Slot) {
        (Slot::Previous, Slot::Current)
    }

    fn derive(&mut self, l: Slot, r: Slot) -> Result<(), CoreError> {
        let cell = &self.cells[l as usize][r as usize];
        if cell.sending.is_some() {
            return Ok(());
        }
        let shared = self.locals[l as usize].keypair.shared_secret(&self.remotes[r as usize].public)?;
        let (sending, receiving) = kdf::derive_cell_keys(&shared, self.we_are_low)?;
        let cell = &mut self.cells[l as usize][r as usize];
        cell.sending = Some(sending);
        cell.receiving = Some(receiving);
        Ok(())
    }

    pub fn sending_key(&mut self, l: Slot, r: Slot) -> Result<DirectionalKeys, CoreError> {
        self.derive(l, r)?;
        Ok(self.cells[l as usize][r as usize].sending.unwrap())
    }

    pub fn receiving_key(&mut self, l: Slot, r: Slot) -> Result<DirectionalKeys, CoreError> {
        self.derive(l, r)?;
        Ok(self.cells[l as usize][r as usize].receiving.unwrap())
    }

    /// Increment and return this cell's sending counter (top half of the
    /// 128-bit CTR value, §4.5 step 2).
    pub fn next_sending_counter(&mut self, l: Slot, r: Slot) -> u64 {
        let cell = &mut self.cells[l as usize][r as usize];
        cell.sending_counter += 1;
        cell.sending_counter
    }

    /// Check and record an inbound counter against this cell's high-water
    /// mark. Strictly monotonic, except the first use of a freshly
    /// installed remote key may equal any value (§8 invariant).
    pub fn check_and_record_receiving_counter(&mut self, l: Slot, r: Slot, counter: u64) -> Result<(), CoreError> {
        let cell = &mut self.cells[l as usize][r as usize];
        if let Some(prev) = cell.receiving_counter {
            if counter <= prev {
                return Err(CoreError::CounterRegression);
            }
        }
        cell.receiving_counter = Some(counter);
        Ok(())
    }

    pub fn mark_receiving_mac_key_used(&mut self, l: Slot, r: Slot) {
        self.cells[l as usize][r as usize].is_used_receiving_mac_key = true;
    }

    fn reveal_stale(&mut self) {
        for &l in &SLOTS {
            let cell = &self.cells[l as usize][Slot::Previous as usize];
            if cell.is_used_receiving_mac_key {
                if let Some(keys) = &cell.receiving {
                    self.old_mac_pool.extend_from_slice(&keys.mac_key);
                }
            }
        }
    }

    /// Ratchet the remote axis: triggered when an inbound message's
    /// `senderKeyId` equals [`Self::most_recent_remote_key_id`] (§4.3).
    pub fn ratchet_remote(&mut self, new_remote_public: DhPublicKey) {
        self.reveal_stale();
        let new_key_id = self.remotes[Slot::Current as usize].key_id + 1;
        self.remotes[Slot::Previous as usize] = RemoteSlot {
            public: self.remotes[Slot::Current as usize].public.clone(),
            key_id: self.remotes[Slot::Current as usize].key_id,
        };
        self.remotes[Slot::Current as usize] = RemoteSlot { public: new_remote_public, key_id: new_key_id };
        // The old `Current` column becomes `Previous` under the new
        // labelling (same remote key, same counters/mac-used state); only
        // the brand-new `Current` column starts fresh.
        for l in SLOTS {
            let carried = std::mem::take(&mut self.cells[l as usize][Slot::Current as usize]);
            self.cells[l as usize][Slot::Previous as usize] = carried;
        }
    }

    /// Ratchet the local axis: triggered when an inbound message's
    /// `recipientKeyId` equals [`Self::most_recent_local_key_id`] (§4.3).
    pub fn ratchet_local(&mut self) -> Result<(), CoreError> {
        self.reveal_stale();
        let new_key_id = self.locals[Slot::Current as usize].key_id + 1;
        self.locals[Slot::Previous as usize] = LocalSlot {
            keypair: self.locals[Slot::Current as usize].keypair.clone(),
            key_id: self.locals[Slot::Current as usize].key_id,
        };
        self.locals[Slot::Current as usize] = LocalSlot { keypair: DhKeypair::generate()?, key_id: new_key_id };
        // Same reasoning as `ratchet_remote`, transposed: the old `Current`
        // row becomes `Previous`, and only the fresh `Current` row resets.
        for r in SLOTS {
            let carried = std::mem::take(&mut self.cells[Slot::Current as usize][r as usize]);
            self.cells[Slot::Previous as usize][r as usize] = carried;
        }
        Ok(())
    }

    /// Drain the old-MAC-key pool for an outbound data message's reveal
    /// field. Exactly once per message (§4.3).
    pub fn drain_old_mac_keys(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.old_mac_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> KeyMatrix {
        let alice_pair = DhKeypair::generate().unwrap();
        let bob_pair = DhKeypair::generate().unwrap();
        KeyMatrix::populate_from_ake(alice_pair, bob_pair.public()).unwrap()
    }

    #[test]
    fn encryption_cell_derives_complementary_keys() {
        let alice_pair = DhKeypair::generate().unwrap();
        let bob_pair = DhKeypair::generate().unwrap();
        let mut alice = KeyMatrix::populate_from_ake(alice_pair.clone(), bob_pair.public()).unwrap();
        let mut bob = KeyMatrix::populate_from_ake(bob_pair, alice_pair.public()).unwrap();

        let (l, r) = KeyMatrix::encryption_slot();
        let alice_send = alice.sending_key(l, r).unwrap().aes_key;
        // Bob's matching cell uses the same (local, remote) key-id pairing:
        // his Previous local slot holds the same keypair Alice's Current
        // remote slot points at, and vice versa, so (Previous, Current)
        // lands on the identical DH shared secret from his side.
        let bob_recv = bob.receiving_key(l, r).unwrap().aes_key;
        assert_eq!(alice_send, bob_recv);
    }

    #[test]
    fn counter_regression_is_rejected() {
        let mut matrix = sample_matrix();
        let (l, r) = KeyMatrix::encryption_slot();
        matrix.check_and_record_receiving_counter(l, r, 5).unwrap();
        assert!(matrix.check_and_record_receiving_counter(l, r, 5).is_err());
        assert!(matrix.check_and_record_receiving_counter(l, r, 4).is_err());
        assert!(matrix.check_and_record_receiving_counter(l, r, 6).is_ok());
    }

    #[test]
    fn ratchet_local_bumps_key_id_and_resets_cells() {
        let mut matrix = sample_matrix();
        let before = matrix.most_recent_local_key_id();
        matrix.ratchet_local().unwrap();
        assert_eq!(matrix.most_recent_local_key_id(), before + 1);
    }

    #[test]
    fn old_mac_keys_drain_once() {
        let mut matrix = sample_matrix();
        // reveal_stale() inspects the (L, Previous) cells; derive and mark
        // one of them used before triggering a ratchet.
        matrix.receiving_key(Slot::Current, Slot::Previous).unwrap();
        matrix.mark_receiving_mac_key_used(Slot::Current, Slot::Previous);

        let fresh_remote = DhKeypair::generate().unwrap().public();
        matrix.ratchet_remote(fresh_remote);

        let drained = matrix.drain_old_mac_keys();
        assert_eq!(drained.len(), 20);
        assert!(matrix.drain_old_mac_keys().is_empty());
    }
}
