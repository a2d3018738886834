// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The superset encoding scheme.
//!
//! Participants are packed into fixed-capacity groups ("supersets"), one
//! bit of the membership field per group member. An outbound rule then
//! needs only a masked match on (superset id, member bit) to select every
//! address advertised for that participant, keeping the installed rule
//! count sub-linear in participants times policies.
//!
//! Placement is incremental until the superset id space runs out. At that
//! point the tables are rebuilt: every known participant is repacked
//! densely, and the caller is told to discard and re-derive all state
//! built on the old slots. Incremental placement deliberately stops
//! filling a superset at a lower watermark than a rebuild does, so a
//! rebuild always reclaims id space when one is needed.

use crate::encoding::{
    ChangeSet, Encoder, Slot, SlotAssignment, VmacLayout,
};
use crate::error::Error;
use pdb::{ChangeKind, ParticipantId, Prefix4, PrefixChange};
use pex_common::net::MacAddr;
use slog::{debug, info, Logger};
use std::collections::{BTreeSet, HashMap};

enum Placement {
    Existing(Slot),
    Added(Slot),
    Overflow,
}

pub struct SupersetEncoder {
    layout: VmacLayout,

    /// Incremental fill watermark, strictly below the membership width.
    initial_fill: usize,

    /// Slot tables: outer index is the superset id, inner index the bit
    /// position of the member occupying it.
    supersets: Vec<Vec<ParticipantId>>,

    slots: HashMap<ParticipantId, Slot>,

    log: Logger,
}

impl SupersetEncoder {
    pub fn new(layout: VmacLayout, log: Logger) -> Result<Self, Error> {
        Self::with_initial_fill(layout, crate::DEFAULT_INITIAL_FILL, log)
    }

    pub fn with_initial_fill(
        layout: VmacLayout,
        initial_fill: u32,
        log: Logger,
    ) -> Result<Self, Error> {
        layout.validate()?;
        if initial_fill == 0 || initial_fill > layout.membership_bits {
            return Err(Error::Layout(format!(
                "initial fill {initial_fill} outside membership width {}",
                layout.membership_bits
            )));
        }
        Ok(Self {
            layout,
            initial_fill: initial_fill as usize,
            supersets: Vec::new(),
            slots: HashMap::new(),
            log,
        })
    }

    pub fn layout(&self) -> &VmacLayout {
        &self.layout
    }

    fn check_range(&self, participant: ParticipantId) -> Result<(), Error> {
        if participant > self.layout.max_participant() {
            return Err(Error::ParticipantRange(participant));
        }
        Ok(())
    }

    /// Incremental placement: reuse, else the first superset still below
    /// the fill watermark, else a fresh superset while id space remains.
    fn place(&mut self, participant: ParticipantId) -> Placement {
        if let Some(slot) = self.slots.get(&participant) {
            return Placement::Existing(*slot);
        }
        for (id, ss) in self.supersets.iter_mut().enumerate() {
            if ss.len() < self.initial_fill {
                let slot = Slot {
                    superset: id as u16,
                    position: ss.len() as u8,
                };
                ss.push(participant);
                self.slots.insert(participant, slot);
                return Placement::Added(slot);
            }
        }
        if self.supersets.len() < self.layout.max_supersets() {
            let slot = Slot {
                superset: self.supersets.len() as u16,
                position: 0,
            };
            self.supersets.push(vec![participant]);
            self.slots.insert(participant, slot);
            return Placement::Added(slot);
        }
        Placement::Overflow
    }

    /// Rebuild the tables from scratch, packing each superset to the full
    /// membership width. Every previously derived rule and advertised
    /// address is invalidated by this.
    fn repartition(
        &mut self,
        participants: BTreeSet<ParticipantId>,
    ) -> Result<Vec<SlotAssignment>, Error> {
        let capacity =
            self.layout.max_supersets() * self.layout.slots_per_superset();
        if participants.len() > capacity {
            return Err(Error::CapacityExceeded(
                participants.len(),
                capacity,
            ));
        }
        self.supersets.clear();
        self.slots.clear();
        let mut assignments = Vec::with_capacity(participants.len());
        for p in participants {
            let full = self
                .supersets
                .last()
                .map(|ss| ss.len() >= self.layout.slots_per_superset())
                .unwrap_or(true);
            if full {
                self.supersets.push(Vec::new());
            }
            let id = (self.supersets.len() - 1) as u16;
            let ss = self.supersets.last_mut().expect("superset exists");
            let slot = Slot {
                superset: id,
                position: ss.len() as u8,
            };
            ss.push(p);
            self.slots.insert(p, slot);
            assignments.push(SlotAssignment {
                participant: p,
                slot,
            });
        }
        info!(
            self.log,
            "rebuilt encoding tables: {} participants across {} supersets",
            self.slots.len(),
            self.supersets.len()
        );
        Ok(assignments)
    }
}

impl Encoder for SupersetEncoder {
    fn assign(
        &mut self,
        participant: ParticipantId,
    ) -> Result<Slot, Error> {
        self.check_range(participant)?;
        match self.place(participant) {
            Placement::Existing(slot) | Placement::Added(slot) => Ok(slot),
            Placement::Overflow => {
                let mut all: BTreeSet<ParticipantId> =
                    self.slots.keys().copied().collect();
                all.insert(participant);
                self.repartition(all)?;
                Ok(self.slots[&participant])
            }
        }
    }

    fn update(
        &mut self,
        changes: &[PrefixChange],
    ) -> Result<(ChangeSet, Vec<Prefix4>), Error> {
        let mut assignments = Vec::new();
        let mut added: BTreeSet<ParticipantId> = BTreeSet::new();
        for c in changes {
            self.check_range(c.participant)?;
            match self.place(c.participant) {
                Placement::Existing(_) => {}
                Placement::Added(slot) => {
                    debug!(
                        self.log,
                        "participant {} placed at superset {} bit {}",
                        c.participant,
                        slot.superset,
                        slot.position
                    );
                    assignments.push(SlotAssignment {
                        participant: c.participant,
                        slot,
                    });
                    added.insert(c.participant);
                }
                Placement::Overflow => {
                    let mut all: BTreeSet<ParticipantId> =
                        self.slots.keys().copied().collect();
                    all.extend(changes.iter().map(|c| c.participant));
                    let assignments = self.repartition(all)?;
                    let mut seen = BTreeSet::new();
                    let prefixes = changes
                        .iter()
                        .map(|c| c.prefix)
                        .filter(|p| seen.insert(*p))
                        .collect();
                    return Ok((
                        ChangeSet {
                            kind: ChangeKind::New,
                            assignments,
                        },
                        prefixes,
                    ));
                }
            }
        }
        let mut seen = BTreeSet::new();
        let changed_prefixes = changes
            .iter()
            .filter(|c| added.contains(&c.participant))
            .map(|c| c.prefix)
            .filter(|p| seen.insert(*p))
            .collect();
        Ok((
            ChangeSet {
                kind: ChangeKind::Change,
                assignments,
            },
            changed_prefixes,
        ))
    }

    fn memberships(&self, participant: ParticipantId) -> Vec<Slot> {
        self.slots
            .get(&participant)
            .map(|s| vec![*s])
            .unwrap_or_default()
    }

    fn outbound_match(&self, slot: Slot) -> (MacAddr, MacAddr) {
        let l = &self.layout;
        let bit = l.membership_bit(slot.position);
        let value = l.superset_id_value(slot.superset) | bit;
        let mask = l.id_field() | bit;
        (MacAddr::from_u64(value), MacAddr::from_u64(mask))
    }

    fn inbound_match(
        &self,
        participant: ParticipantId,
    ) -> (MacAddr, MacAddr) {
        let l = &self.layout;
        let value = l.next_hop_value(participant, 0) & l.participant_field();
        (MacAddr::from_u64(value), MacAddr::from_u64(l.participant_field()))
    }

    fn vmac_full(
        &self,
        participant: ParticipantId,
        port: u32,
    ) -> Result<MacAddr, Error> {
        let slot = self
            .slots
            .get(&participant)
            .ok_or(Error::Unassigned(participant))?;
        let l = &self.layout;
        let value = l.superset_id_value(slot.superset)
            | l.membership_bit(slot.position)
            | l.next_hop_value(participant, port);
        Ok(MacAddr::from_u64(value))
    }
}
