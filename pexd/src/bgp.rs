// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The route decision seam.
//!
//! The route server delivers already-parsed advertisements; the decision
//! process turns them into normalized per-prefix change records, tracks
//! which prefixes' selected routes actually moved, and produces the
//! announcements the exchange should relay onward with our virtual next
//! hops substituted for the real ones.

use pdb::{
    ParticipantId, Prefix4, PrefixChange, RouteAdvertisement, VnhAllocator,
};
use serde_json::json;
use slog::{debug, warn, Logger};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Best-path movement derived from one advertisement batch: prefixes whose
/// selected route changed, plus records to relay to the route server.
#[derive(Debug, Default)]
pub struct PeerUpdates {
    pub changed: Vec<Prefix4>,
    pub announcements: Vec<serde_json::Value>,
}

pub trait DecisionProcess: Send {
    /// Normalize an advertisement into per-prefix change records. Withdraws
    /// are folded into the table here; they produce no change records
    /// because a routeless prefix has nothing to encode.
    fn evaluate(&mut self, adv: &RouteAdvertisement) -> Vec<PrefixChange>;

    /// Apply the change records to the best-path table and report what
    /// moved. Announcements carry the prefix's virtual next hop, which is
    /// why the allocator is an input here.
    fn peer_updates(
        &mut self,
        changes: &[PrefixChange],
        vnhs: &VnhAllocator,
    ) -> PeerUpdates;

    /// The participant currently selected as the prefix's next hop.
    fn best_participant(&self, prefix: &Prefix4) -> Option<ParticipantId>;
}

/// The provided decision process: a flat best-path table keyed by prefix.
pub struct BestPathTable {
    nexthop_participants: HashMap<Ipv4Addr, ParticipantId>,
    best: HashMap<Prefix4, PrefixChange>,
    withdrawn: Vec<Prefix4>,
    log: Logger,
}

impl BestPathTable {
    pub fn new(
        nexthop_participants: HashMap<Ipv4Addr, ParticipantId>,
        log: Logger,
    ) -> Self {
        Self {
            nexthop_participants,
            best: HashMap::new(),
            withdrawn: Vec::new(),
            log,
        }
    }
}

impl DecisionProcess for BestPathTable {
    fn evaluate(&mut self, adv: &RouteAdvertisement) -> Vec<PrefixChange> {
        for w in &adv.withdraw {
            if self.best.remove(w).is_some() {
                debug!(self.log, "route for {w} withdrawn");
                self.withdrawn.push(*w);
            }
        }
        adv.announce
            .iter()
            .filter_map(|r| {
                let Some(participant) =
                    self.nexthop_participants.get(&r.next_hop)
                else {
                    warn!(
                        self.log,
                        "dropping announcement for {} via unknown next \
                         hop {}",
                        r.prefix,
                        r.next_hop
                    );
                    return None;
                };
                Some(PrefixChange {
                    prefix: r.prefix,
                    participant: *participant,
                    next_hop: r.next_hop,
                })
            })
            .collect()
    }

    fn peer_updates(
        &mut self,
        changes: &[PrefixChange],
        vnhs: &VnhAllocator,
    ) -> PeerUpdates {
        let mut out = PeerUpdates::default();
        for w in self.withdrawn.drain(..) {
            out.announcements.push(json!({ "withdraw": { "prefix": w } }));
        }
        for c in changes {
            let moved = self
                .best
                .get(&c.prefix)
                .map(|prev| prev.next_hop != c.next_hop)
                .unwrap_or(true);
            if !moved {
                continue;
            }
            self.best.insert(c.prefix, *c);
            out.changed.push(c.prefix);
            let Some(vnh) = vnhs.prefix_to_vnh(&c.prefix) else {
                warn!(
                    self.log,
                    "no vnh bound to {} at announcement time", c.prefix
                );
                continue;
            };
            out.announcements.push(json!({
                "announce": { "prefix": c.prefix, "next_hop": vnh }
            }));
        }
        out
    }

    fn best_participant(&self, prefix: &Prefix4) -> Option<ParticipantId> {
        self.best.get(prefix).map(|c| c.participant)
    }
}
