// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flow-rule synthesis.
//!
//! Pure translation from (policies, slot assignments) to flow mods. The
//! outbound stage matches coarsely on a superset and rewrites toward the
//! target's next hop address; the inbound stage matches that next hop
//! exactly and steers to a specific egress port. Nothing here touches the
//! network or holds state.

use crate::error::Error;
use itertools::Itertools;
use pdb::{
    Action, ChangeKind, FlowMod, ForwardTarget, ModType, ParticipantId,
    Policy, PolicyAction, PolicySet, RuleType,
};
use pex_common::net::MacAddr;
use vmac::encoding::Encoder;
use vmac::ChangeSet;

// Rule priorities. 0 is table miss.
pub const FLOW_MISS_PRIORITY: u16 = 0;
pub const OUTBOUND_HIT_PRIORITY: u16 = 1;
pub const INBOUND_HIT_PRIORITY: u16 = 2;
pub const INBOUND_MISS_PRIORITY: u16 = 1;

/// Cookie carried by rules that no policy owns (the inbound miss rule).
pub const DEFAULT_RULE_COOKIE: u64 = 0;

/// A batch of synthesized rule changes. `New` means everything previously
/// installed for the covered direction is stale and the batch replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDelta {
    pub kind: ChangeKind,
    pub mods: Vec<FlowMod>,
}

fn forward_target(p: &Policy) -> Option<u32> {
    match p.action {
        PolicyAction::Fwd(target) => Some(target),
        PolicyAction::Drop => None,
    }
}

/// Map outbound policies by the participant they forward to.
fn by_target(
    policies: &[Policy],
) -> std::collections::HashMap<ParticipantId, Vec<&Policy>> {
    policies
        .iter()
        .filter_map(|p| forward_target(p).map(|t| (t, p)))
        .into_group_map()
}

fn outbound_rule(
    policy: &Policy,
    slot: vmac::Slot,
    target: ParticipantId,
    encoder: &dyn Encoder,
    tagging_mac: MacAddr,
) -> FlowMod {
    let (value, mask) = encoder.outbound_match(slot);
    let (next_hop, _) = encoder.inbound_match(target);
    let mut match_fields = policy.match_fields.clone();
    match_fields.set_eth_dst(value, mask);
    match_fields.set_eth_src(tagging_mac);
    FlowMod {
        rule_type: RuleType::Outbound,
        priority: OUTBOUND_HIT_PRIORITY,
        match_fields,
        action: Action::rewrite(next_hop, ForwardTarget::Inbound),
        mod_type: ModType::Insert,
        cookie: policy.cookie,
    }
}

/// One inbound rule per forwarding policy: match traffic whose next hop is
/// this participant, rewrite to the port-qualified address and hand off to
/// the main stage. Forward targets beyond the port range fall back to
/// port 0.
pub fn build_inbound_rules(
    participant: ParticipantId,
    policies: &[Policy],
    encoder: &dyn Encoder,
    port_count: u32,
) -> Result<Vec<FlowMod>, Error> {
    let mut rules = Vec::new();
    let (value, mask) = encoder.inbound_match(participant);
    for policy in policies {
        let Some(mut port) = forward_target(policy) else {
            continue;
        };
        if port >= port_count {
            port = 0;
        }
        let mut match_fields = policy.match_fields.clone();
        match_fields.set_eth_dst(value, mask);
        let port_vmac = encoder.vmac_full(participant, port)?;
        rules.push(FlowMod {
            rule_type: RuleType::Inbound,
            priority: INBOUND_HIT_PRIORITY,
            match_fields,
            action: Action::rewrite(port_vmac, ForwardTarget::Main),
            mod_type: ModType::Insert,
            cookie: policy.cookie,
        });
    }
    Ok(rules)
}

/// Outbound rules for the full policy set against the current tables: one
/// rule per (policy, membership) pair, so a target present in k supersets
/// yields k rules per policy that forwards to it.
pub fn build_outbound_rules(
    policies: &[Policy],
    encoder: &dyn Encoder,
    tagging_mac: MacAddr,
) -> Vec<FlowMod> {
    let mut rules = Vec::new();
    for policy in policies {
        let Some(target) = forward_target(policy) else {
            continue;
        };
        for slot in encoder.memberships(target) {
            rules.push(outbound_rule(
                policy,
                slot,
                target,
                encoder,
                tagging_mac,
            ));
        }
    }
    rules
}

/// Outbound rules for exactly the slot assignments in a change set. The
/// change kind is propagated so a consumer knows whether a wipe of the
/// previously installed rules must precede this delta.
pub fn update_outbound_rules(
    change_set: &ChangeSet,
    policies: &[Policy],
    encoder: &dyn Encoder,
    tagging_mac: MacAddr,
) -> RuleDelta {
    let targets = by_target(policies);
    let mut mods = Vec::new();
    for a in &change_set.assignments {
        let Some(relevant) = targets.get(&a.participant) else {
            continue;
        };
        for policy in relevant {
            mods.push(outbound_rule(
                policy,
                a.slot,
                a.participant,
                encoder,
                tagging_mac,
            ));
        }
    }
    RuleDelta {
        kind: change_set.kind,
        mods,
    }
}

/// Removal mods for every outbound pattern the given policies installed.
/// Issued ahead of a full rebuild.
pub fn clear_all_outbound(
    policies: &[Policy],
    tagging_mac: MacAddr,
) -> Vec<FlowMod> {
    policies
        .iter()
        .filter(|p| forward_target(p).is_some())
        .map(|policy| {
            let mut match_fields = policy.match_fields.clone();
            match_fields.set_eth_src(tagging_mac);
            FlowMod {
                rule_type: RuleType::Outbound,
                priority: OUTBOUND_HIT_PRIORITY,
                match_fields,
                action: Action::default(),
                mod_type: ModType::Remove,
                cookie: policy.cookie,
            }
        })
        .collect()
}

/// Removal mods for specific withdrawn policies, both directions.
pub fn removal_rules(
    inbound: &[Policy],
    outbound: &[Policy],
    tagging_mac: MacAddr,
) -> Vec<FlowMod> {
    let mut mods: Vec<FlowMod> = inbound
        .iter()
        .map(|policy| FlowMod {
            rule_type: RuleType::Inbound,
            priority: INBOUND_HIT_PRIORITY,
            match_fields: policy.match_fields.clone(),
            action: Action::default(),
            mod_type: ModType::Remove,
            cookie: policy.cookie,
        })
        .collect();
    mods.extend(clear_all_outbound(outbound, tagging_mac));
    mods
}

/// The startup rule set: inbound rules for the loaded policies plus the
/// inbound miss rule steering unmatched traffic to the default port.
pub fn build_init_inbound(
    participant: ParticipantId,
    policies: &PolicySet,
    encoder: &dyn Encoder,
    port_count: u32,
) -> Result<RuleDelta, Error> {
    let mut mods = build_inbound_rules(
        participant,
        &policies.inbound,
        encoder,
        port_count,
    )?;

    let (value, mask) = encoder.inbound_match(participant);
    let mut miss_match = pdb::Match::default();
    miss_match.set_eth_dst(value, mask);
    let default_vmac = encoder.vmac_full(participant, 0)?;
    mods.push(FlowMod {
        rule_type: RuleType::Inbound,
        priority: INBOUND_MISS_PRIORITY,
        match_fields: miss_match,
        action: Action::rewrite(default_vmac, ForwardTarget::Main),
        mod_type: ModType::Insert,
        cookie: DEFAULT_RULE_COOKIE,
    });

    Ok(RuleDelta {
        kind: ChangeKind::New,
        mods,
    })
}
