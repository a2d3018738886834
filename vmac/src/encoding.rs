// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use pdb::{ChangeKind, ParticipantId, Prefix4, PrefixChange};
use pex_common::net::MacAddr;
use serde::{Deserialize, Serialize};

/// Field widths of the virtual MAC, most significant field first. The four
/// fields must cover the 48 bits exactly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmacLayout {
    pub superset_id_bits: u32,
    pub membership_bits: u32,
    pub participant_bits: u32,
    pub port_bits: u32,
}

impl Default for VmacLayout {
    fn default() -> Self {
        Self {
            superset_id_bits: crate::DEFAULT_SUPERSET_ID_BITS,
            membership_bits: crate::DEFAULT_MEMBERSHIP_BITS,
            participant_bits: crate::DEFAULT_PARTICIPANT_BITS,
            port_bits: crate::DEFAULT_PORT_BITS,
        }
    }
}

impl VmacLayout {
    pub fn validate(&self) -> Result<(), Error> {
        let sum = self.superset_id_bits
            + self.membership_bits
            + self.participant_bits
            + self.port_bits;
        if sum != MacAddr::BITS {
            return Err(Error::Layout(format!(
                "field widths cover {sum} bits, need {}",
                MacAddr::BITS
            )));
        }
        if self.superset_id_bits == 0
            || self.membership_bits == 0
            || self.participant_bits == 0
            || self.port_bits == 0
        {
            return Err(Error::Layout("zero-width field".to_string()));
        }
        if self.superset_id_bits > 16 {
            return Err(Error::Layout(
                "superset id field wider than 16 bits".to_string(),
            ));
        }
        Ok(())
    }

    /// Width of the exact-match next hop field (participant + port).
    pub fn next_hop_bits(&self) -> u32 {
        self.participant_bits + self.port_bits
    }

    pub(crate) fn id_shift(&self) -> u32 {
        MacAddr::BITS - self.superset_id_bits
    }

    pub(crate) fn id_field(&self) -> u64 {
        ((1u64 << self.superset_id_bits) - 1) << self.id_shift()
    }

    pub(crate) fn participant_field(&self) -> u64 {
        ((1u64 << self.participant_bits) - 1) << self.port_bits
    }

    pub(crate) fn port_field(&self) -> u64 {
        (1u64 << self.port_bits) - 1
    }

    pub fn max_supersets(&self) -> usize {
        1usize << self.superset_id_bits
    }

    pub fn slots_per_superset(&self) -> usize {
        self.membership_bits as usize
    }

    pub fn max_participant(&self) -> ParticipantId {
        let m = (1u64 << self.participant_bits) - 1;
        m.min(u32::MAX as u64) as u32
    }

    pub fn max_port(&self) -> u32 {
        self.port_field() as u32
    }

    pub(crate) fn superset_id_value(&self, superset: u16) -> u64 {
        (superset as u64) << self.id_shift()
    }

    pub(crate) fn membership_bit(&self, position: u8) -> u64 {
        1u64 << (self.next_hop_bits() + position as u32)
    }

    pub(crate) fn next_hop_value(&self, participant: ParticipantId, port: u32) -> u64 {
        ((participant as u64) << self.port_bits) | (port as u64 & self.port_field())
    }
}

/// One participant's place in the encoding: which superset, and which bit
/// of the membership field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    pub superset: u16,
    pub position: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SlotAssignment {
    pub participant: ParticipantId,
    pub slot: Slot,
}

/// The outcome of feeding a batch of routing changes to an encoder: either
/// an incremental list of added slots, or notice that the tables were
/// rebuilt and everything previously derived from them is stale.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub kind: ChangeKind,
    pub assignments: Vec<SlotAssignment>,
}

impl ChangeSet {
    pub fn is_rebuild(&self) -> bool {
        self.kind == ChangeKind::New
    }
}

/// An encoding scheme: how participants map onto slots and how the
/// match/mask/rewrite addresses are built from those slots. The superset
/// scheme is the one concrete implementation; the trait is the seam a
/// different packing strategy would plug into.
pub trait Encoder: Send {
    /// Place a participant, reusing any existing slot. Deterministic.
    fn assign(&mut self, participant: ParticipantId) -> Result<Slot, Error>;

    /// Fold a batch of routing changes into the tables. Returns the slot
    /// changes plus the prefixes from the batch whose membership bits
    /// changed as a result.
    fn update(
        &mut self,
        changes: &[PrefixChange],
    ) -> Result<(ChangeSet, Vec<Prefix4>), Error>;

    /// Every slot a participant currently occupies.
    fn memberships(&self, participant: ParticipantId) -> Vec<Slot>;

    /// Wildcard match selecting any address carrying this slot's
    /// membership bit within its superset: value and mask.
    fn outbound_match(&self, slot: Slot) -> (MacAddr, MacAddr);

    /// Exact match on the participant subfield selecting any address whose
    /// next hop is this participant, whatever the egress port.
    fn inbound_match(&self, participant: ParticipantId) -> (MacAddr, MacAddr);

    /// The fully qualified address for a participant and egress port,
    /// carrying the superset id and membership bit of the participant's
    /// slot. This is the address advertised for a VNH and written on
    /// traffic steered to a specific port.
    fn vmac_full(
        &self,
        participant: ParticipantId,
        port: u32,
    ) -> Result<MacAddr, Error>;
}
