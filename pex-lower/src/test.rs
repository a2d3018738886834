// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::queue::FlowModQueue;
use crate::refmon::{ChannelDataplane, Dataplane};
use crate::rules::*;
use pdb::{
    ChangeKind, FlowMod, Match, ModType, Policy, PolicyAction, PolicySet,
    RuleType,
};
use pex_common::net::MacAddr;
use pretty_assertions::assert_eq;
use slog::{o, Discard, Logger};
use vmac::encoding::Encoder;
use vmac::{SupersetEncoder, VmacLayout};

const ME: u32 = 1;

fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

fn tagging_mac() -> MacAddr {
    "08:00:27:89:3b:9f".parse().unwrap()
}

fn policy(cookie: u64, action: PolicyAction) -> Policy {
    let mut m = Match::default();
    m.0.insert("tcp_dst".into(), serde_json::json!(80 + cookie));
    Policy {
        cookie,
        match_fields: m,
        action,
    }
}

/// An encoder with ourselves and participants 2 and 3 placed.
fn encoder() -> SupersetEncoder {
    let mut enc =
        SupersetEncoder::new(VmacLayout::default(), test_logger()).unwrap();
    for p in [ME, 2, 3] {
        enc.assign(p).unwrap();
    }
    enc
}

#[test]
fn inbound_rules_clamp_out_of_range_ports() {
    let enc = encoder();
    let policies =
        vec![policy(1, PolicyAction::Fwd(5)), policy(2, PolicyAction::Fwd(1))];
    let rules = build_inbound_rules(ME, &policies, &enc, 2).unwrap();
    assert_eq!(rules.len(), 2);
    // fwd=5 with 2 ports falls back to port 0
    assert_eq!(
        rules[0].action.set_eth_dst,
        Some(enc.vmac_full(ME, 0).unwrap())
    );
    assert_eq!(
        rules[1].action.set_eth_dst,
        Some(enc.vmac_full(ME, 1).unwrap())
    );
    for r in &rules {
        assert_eq!(r.rule_type, RuleType::Inbound);
        assert_eq!(r.priority, INBOUND_HIT_PRIORITY);
        assert_eq!(r.mod_type, ModType::Insert);
    }
}

#[test]
fn inbound_rules_match_the_next_hop_field() {
    let enc = encoder();
    let policies = vec![policy(1, PolicyAction::Fwd(0))];
    let rules = build_inbound_rules(ME, &policies, &enc, 2).unwrap();
    let (value, mask) = enc.inbound_match(ME);
    let m = &rules[0].match_fields.0;
    assert_eq!(m["eth_dst"], serde_json::json!([value, mask]));
    // the policy predicate rides along untouched
    assert_eq!(m["tcp_dst"], serde_json::json!(81));
}

#[test]
fn drop_policies_produce_no_rules() {
    let enc = encoder();
    let policies = vec![policy(1, PolicyAction::Drop)];
    assert!(build_inbound_rules(ME, &policies, &enc, 2)
        .unwrap()
        .is_empty());
    assert!(build_outbound_rules(&policies, &enc, tagging_mac()).is_empty());
}

#[test]
fn outbound_rules_per_policy_and_membership() {
    let enc = encoder();
    let policies =
        vec![policy(1, PolicyAction::Fwd(2)), policy(2, PolicyAction::Fwd(3))];
    let rules = build_outbound_rules(&policies, &enc, tagging_mac());
    // each target holds one slot, so one rule per policy
    assert_eq!(rules.len(), 2);
    for (rule, target) in rules.iter().zip([2u32, 3u32]) {
        assert_eq!(rule.rule_type, RuleType::Outbound);
        assert_eq!(rule.priority, OUTBOUND_HIT_PRIORITY);
        let slot = enc.memberships(target)[0];
        let (value, mask) = enc.outbound_match(slot);
        assert_eq!(
            rule.match_fields.0["eth_dst"],
            serde_json::json!([value, mask])
        );
        assert_eq!(
            rule.match_fields.0["eth_src"],
            serde_json::json!(tagging_mac())
        );
        assert_eq!(
            rule.action.set_eth_dst,
            Some(enc.inbound_match(target).0)
        );
    }
}

#[test]
fn update_covers_only_listed_participants() {
    let mut enc = encoder();
    let policies = vec![
        policy(1, PolicyAction::Fwd(2)),
        policy(2, PolicyAction::Fwd(3)),
        policy(3, PolicyAction::Fwd(4)),
    ];
    // participant 4 is new; 2 and 3 are already placed
    let (cs, _) = enc
        .update(&[pdb::PrefixChange {
            prefix: "100.0.4.0/24".parse().unwrap(),
            participant: 4,
            next_hop: "172.0.0.4".parse().unwrap(),
        }])
        .unwrap();
    assert_eq!(cs.kind, ChangeKind::Change);
    let delta = update_outbound_rules(&cs, &policies, &enc, tagging_mac());
    assert_eq!(delta.kind, ChangeKind::Change);
    // only the policy forwarding to participant 4 is re-synthesized
    assert_eq!(delta.mods.len(), 1);
    assert_eq!(delta.mods[0].cookie, 3);
}

#[test]
fn rebuild_kind_propagates_to_the_delta() {
    let enc = encoder();
    let policies = vec![policy(1, PolicyAction::Fwd(2))];
    let cs = vmac::ChangeSet {
        kind: ChangeKind::New,
        assignments: vec![vmac::SlotAssignment {
            participant: 2,
            slot: enc.memberships(2)[0],
        }],
    };
    let delta = update_outbound_rules(&cs, &policies, &enc, tagging_mac());
    assert_eq!(delta.kind, ChangeKind::New);
    assert_eq!(delta.mods.len(), 1);
}

#[test]
fn clear_all_outbound_removes_every_pattern() {
    let policies = vec![
        policy(1, PolicyAction::Fwd(2)),
        policy(2, PolicyAction::Drop),
        policy(3, PolicyAction::Fwd(3)),
    ];
    let wipe = clear_all_outbound(&policies, tagging_mac());
    // drop policies installed nothing, so nothing to remove
    assert_eq!(wipe.len(), 2);
    for w in &wipe {
        assert_eq!(w.mod_type, ModType::Remove);
        assert_eq!(w.rule_type, RuleType::Outbound);
    }
    assert_eq!(wipe[0].cookie, 1);
    assert_eq!(wipe[1].cookie, 3);
}

#[test]
fn init_delta_ends_with_the_miss_rule() {
    let enc = encoder();
    let mut set = PolicySet::default();
    set.inbound.push(policy(1, PolicyAction::Fwd(1)));
    let delta = build_init_inbound(ME, &set, &enc, 2).unwrap();
    assert_eq!(delta.kind, ChangeKind::New);
    assert_eq!(delta.mods.len(), 2);
    let miss = delta.mods.last().unwrap();
    assert_eq!(miss.priority, INBOUND_MISS_PRIORITY);
    assert_eq!(miss.cookie, DEFAULT_RULE_COOKIE);
    assert_eq!(
        miss.action.set_eth_dst,
        Some(enc.vmac_full(ME, 0).unwrap())
    );
}

#[test]
fn flush_preserves_insertion_order() {
    let enc = encoder();
    let mut queue = FlowModQueue::new(test_logger());
    let first = build_outbound_rules(
        &[policy(1, PolicyAction::Fwd(2))],
        &enc,
        tagging_mac(),
    );
    let second = build_outbound_rules(
        &[policy(2, PolicyAction::Fwd(3))],
        &enc,
        tagging_mac(),
    );
    queue.enqueue(first.clone());
    queue.enqueue(second.clone());

    let (mut dp, rx) = ChannelDataplane::new();
    let n = queue.flush(&mut dp).unwrap();
    assert_eq!(n, 2);
    let batch = rx.recv().unwrap();
    let mut expected = first;
    expected.extend(second);
    assert_eq!(batch, expected);
    assert!(queue.pending().is_empty());
    assert_eq!(queue.pushed(), &expected[..]);
}

#[test]
fn empty_flush_sends_nothing() {
    let mut queue = FlowModQueue::new(test_logger());
    let (mut dp, rx) = ChannelDataplane::new();
    assert_eq!(queue.flush(&mut dp).unwrap(), 0);
    assert!(rx.try_recv().is_err());
}

struct RejectingDataplane;

impl Dataplane for RejectingDataplane {
    fn apply(&mut self, _batch: &[FlowMod]) -> Result<(), Error> {
        Err(Error::DataplaneUnreachable("test".to_string()))
    }
}

#[test]
fn failed_flush_restores_pending() {
    let enc = encoder();
    let mut queue = FlowModQueue::new(test_logger());
    let mods = build_outbound_rules(
        &[policy(1, PolicyAction::Fwd(2))],
        &enc,
        tagging_mac(),
    );
    queue.enqueue(mods.clone());
    assert!(queue.flush(&mut RejectingDataplane).is_err());
    assert_eq!(queue.pending(), &mods[..]);
    assert!(queue.pushed().is_empty());
}
