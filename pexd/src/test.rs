// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::bgp::BestPathTable;
use crate::clients::{ArpResponse, ChannelArpSink, ChannelRouteServerSink};
use crate::config::Config;
use crate::dispatcher::{Dispatcher, EVENT_ACK};
use crate::reactor::Reactor;
use pdb::{
    Event, FlowMod, ModType, PolicyDoc, Prefix4, RouteAdvertisement,
    RouteRecord, RuleType,
};
use pex_lower::refmon::ChannelDataplane;
use pretty_assertions::assert_eq;
use slog::{o, Discard, Logger};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use vmac::{SupersetEncoder, VmacLayout};

fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

fn pfx(s: &str) -> Prefix4 {
    s.parse().unwrap()
}

fn test_config(layout: VmacLayout, initial_fill: u32) -> Config {
    let mut nexthop_participants = HashMap::new();
    for p in 2..=12u32 {
        nexthop_participants
            .insert(Ipv4Addr::new(172, 0, 0, p as u8), p);
    }
    Config {
        id: 1,
        listen: "127.0.0.1:0".to_string(),
        ports: vec![
            pdb::Port {
                ip: Ipv4Addr::new(172, 0, 0, 101),
                mac: "08:00:27:89:3b:9f".parse().unwrap(),
            },
            pdb::Port {
                ip: Ipv4Addr::new(172, 0, 0, 102),
                mac: "08:00:27:92:18:1f".parse().unwrap(),
            },
        ],
        vnh_block: pfx("172.0.1.0/24"),
        refmon: "127.0.0.1:1".parse().unwrap(),
        arp_proxy: "127.0.0.1:1".parse().unwrap(),
        route_server: "127.0.0.1:1".parse().unwrap(),
        nexthop_participants,
        vmac: layout,
        superset_initial_fill: initial_fill,
    }
}

fn test_policies() -> PolicyDoc {
    serde_json::from_value(serde_json::json!({
        "inbound": [
            {"match": {"tcp_dst": 4321}, "action": {"fwd": 1}}
        ],
        "outbound": [
            {"match": {"tcp_dst": 80}, "action": {"fwd": 2}},
            {"match": {"tcp_dst": 443}, "action": {"fwd": 3}}
        ]
    }))
    .unwrap()
}

struct Harness {
    reactor: Reactor,
    dp_rx: Receiver<Vec<FlowMod>>,
    arp_rx: Receiver<ArpResponse>,
    xrs_rx: Receiver<serde_json::Value>,
}

fn harness(layout: VmacLayout, initial_fill: u32) -> Harness {
    let log = test_logger();
    let cfg = test_config(layout, initial_fill);
    let encoder =
        SupersetEncoder::with_initial_fill(layout, initial_fill, log.clone())
            .unwrap();
    let decision = BestPathTable::new(
        cfg.nexthop_participants.clone(),
        log.clone(),
    );
    let (dataplane, dp_rx) = ChannelDataplane::new();
    let (arp, arp_rx) = ChannelArpSink::new();
    let (route_server, xrs_rx) = ChannelRouteServerSink::new();
    // handlers are driven directly; the event channel stays unused
    let (_tx, rx) = channel();
    let reactor = Reactor::new(
        cfg,
        test_policies(),
        Box::new(encoder),
        Box::new(decision),
        Box::new(dataplane),
        Box::new(arp),
        Box::new(route_server),
        rx,
        log,
    )
    .unwrap();
    Harness {
        reactor,
        dp_rx,
        arp_rx,
        xrs_rx,
    }
}

fn default_harness() -> Harness {
    harness(VmacLayout::default(), vmac::DEFAULT_INITIAL_FILL)
}

/// 4 supersets of 4 slots, watermark 2: saturates after 8 participants.
fn tiny_harness() -> Harness {
    let layout = VmacLayout {
        superset_id_bits: 2,
        membership_bits: 4,
        participant_bits: 39,
        port_bits: 3,
    };
    harness(layout, 2)
}

fn announce(prefix: &str, next_hop: Ipv4Addr) -> RouteAdvertisement {
    RouteAdvertisement {
        announce: vec![RouteRecord {
            prefix: pfx(prefix),
            next_hop,
        }],
        withdraw: vec![],
    }
}

fn withdraw(prefix: &str) -> RouteAdvertisement {
    RouteAdvertisement {
        announce: vec![],
        withdraw: vec![pfx(prefix)],
    }
}

fn drain<T>(rx: &Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

#[test]
fn initialization_installs_inbound_rules_and_miss() {
    let mut h = default_harness();
    h.reactor.initialize_dataplane().unwrap();
    let batch = h.dp_rx.recv().unwrap();
    // one policy rule plus the miss rule
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|m| m.rule_type == RuleType::Inbound));
    assert_eq!(
        batch[0].priority,
        pex_lower::rules::INBOUND_HIT_PRIORITY
    );
    assert_eq!(
        batch[1].priority,
        pex_lower::rules::INBOUND_MISS_PRIORITY
    );
    // the ledger retains what was sent; nothing is left pending
    assert_eq!(h.reactor.queue().pushed().len(), 2);
    assert!(h.reactor.queue().pending().is_empty());
}

#[test]
fn repeated_announcement_allocates_one_vnh() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    assert_eq!(h.reactor.vnh_allocator().len(), 1);
}

#[test]
fn incremental_update_synthesizes_only_affected_rules() {
    let mut h = default_harness();
    let nh2 = Ipv4Addr::new(172, 0, 0, 2);
    let nh3 = Ipv4Addr::new(172, 0, 0, 3);

    h.reactor.handle_bgp(announce("100.0.0.0/24", nh2)).unwrap();
    let batch = h.dp_rx.recv().unwrap();
    // participant 2 is newly placed; only the policy forwarding to it
    // produces a rule
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].mod_type, ModType::Insert);
    assert_eq!(batch[0].cookie, 2);

    h.reactor.handle_bgp(announce("100.0.1.0/24", nh3)).unwrap();
    let batch = h.dp_rx.recv().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].cookie, 3);

    // a known participant re-announcing produces no rule churn at all
    h.reactor.handle_bgp(announce("100.0.2.0/24", nh2)).unwrap();
    assert!(drain(&h.dp_rx).is_empty());
}

#[test]
fn bgp_update_advertises_changed_vnhs_on_every_port() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    let responses = drain(&h.arp_rx);
    // one changed prefix, two ports
    assert_eq!(responses.len(), 2);
    let vnh = h
        .reactor
        .vnh_allocator()
        .prefix_to_vnh(&pfx("100.0.0.0/24"))
        .unwrap();
    assert!(responses.iter().all(|r| r.vnhip == vnh));
    assert!(responses.iter().all(|r| r.vmac_addr == responses[0].vmac_addr));
    assert_eq!(responses[0].dstip, Ipv4Addr::new(172, 0, 0, 101));
    assert_eq!(responses[1].dstip, Ipv4Addr::new(172, 0, 0, 102));
}

#[test]
fn arp_event_fans_out_per_port_with_one_address() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    let vnh = h
        .reactor
        .vnh_allocator()
        .prefix_to_vnh(&pfx("100.0.0.0/24"))
        .unwrap();
    drain(&h.arp_rx);

    h.reactor.handle_arp(vnh).unwrap();
    let responses = drain(&h.arp_rx);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].vmac_addr, responses[1].vmac_addr);
    assert_eq!(responses[0].vnhip, vnh);
}

#[test]
fn arp_for_unknown_vnh_is_silent() {
    let mut h = default_harness();
    h.reactor.handle_arp(Ipv4Addr::new(172, 0, 1, 77)).unwrap();
    assert!(drain(&h.arp_rx).is_empty());
}

#[test]
fn withdrawn_prefix_keeps_vnh_but_stops_answering() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    let vnh = h
        .reactor
        .vnh_allocator()
        .prefix_to_vnh(&pfx("100.0.0.0/24"))
        .unwrap();
    drain(&h.arp_rx);

    h.reactor.handle_bgp(withdraw("100.0.0.0/24")).unwrap();
    // the binding is permanent even though the route is gone
    assert_eq!(h.reactor.vnh_allocator().len(), 1);
    h.reactor.handle_arp(vnh).unwrap();
    assert!(drain(&h.arp_rx).is_empty());
}

#[test]
fn announcements_carry_the_virtual_next_hop() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    let vnh = h
        .reactor
        .vnh_allocator()
        .prefix_to_vnh(&pfx("100.0.0.0/24"))
        .unwrap();
    let records = drain(&h.xrs_rx);
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0],
        serde_json::json!({
            "announce": {
                "prefix": "100.0.0.0/24",
                "next_hop": vnh.to_string(),
            }
        })
    );
}

#[test]
fn withdraw_is_relayed_to_the_route_server() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    drain(&h.xrs_rx);
    h.reactor.handle_bgp(withdraw("100.0.0.0/24")).unwrap();
    let records = drain(&h.xrs_rx);
    assert_eq!(
        records,
        vec![serde_json::json!({
            "withdraw": { "prefix": "100.0.0.0/24" }
        })]
    );
}

#[test]
fn table_rebuild_wipes_and_readvertises_everything() {
    let mut h = tiny_harness();
    // our own id occupies one slot; seven more saturate the incremental
    // capacity of 4 supersets at watermark 2
    for p in 2..=8u32 {
        let prefix = format!("100.0.{p}.0/24");
        h.reactor
            .handle_bgp(announce(&prefix, Ipv4Addr::new(172, 0, 0, p as u8)))
            .unwrap();
    }
    drain(&h.dp_rx);
    drain(&h.arp_rx);

    // the ninth participant overflows and forces a rebuild
    h.reactor
        .handle_bgp(announce("100.0.9.0/24", Ipv4Addr::new(172, 0, 0, 9)))
        .unwrap();

    let batch = h.dp_rx.recv().unwrap();
    // the batch leads with a removal for every forwarding outbound policy
    let removes: Vec<&FlowMod> = batch
        .iter()
        .take_while(|m| m.mod_type == ModType::Remove)
        .collect();
    assert_eq!(removes.len(), 2);
    assert!(removes.iter().all(|m| m.rule_type == RuleType::Outbound));
    // then re-synthesizes every policy with a placed target
    let inserts: Vec<&FlowMod> = batch
        .iter()
        .filter(|m| m.mod_type == ModType::Insert)
        .collect();
    assert_eq!(inserts.len(), 2);

    // every known vnh is re-advertised on every port
    let responses = drain(&h.arp_rx);
    assert_eq!(responses.len(), 8 * 2);
}

#[test]
fn policy_change_tears_down_and_installs() {
    let mut h = default_harness();
    let nh = Ipv4Addr::new(172, 0, 0, 2);
    h.reactor.handle_bgp(announce("100.0.0.0/24", nh)).unwrap();
    drain(&h.dp_rx);

    // cookie 2 is the outbound policy forwarding to participant 2
    let change: pdb::PolicyChange = serde_json::from_value(serde_json::json!({
        "removal_cookies": [2],
        "new_policies": {
            "outbound": [
                {"match": {"tcp_dst": 8080}, "action": {"fwd": 2}}
            ]
        }
    }))
    .unwrap();
    h.reactor.handle_policy(change).unwrap();

    let batch = h.dp_rx.recv().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].mod_type, ModType::Remove);
    assert_eq!(batch[0].cookie, 2);
    assert_eq!(batch[1].mod_type, ModType::Insert);
    assert_eq!(
        batch[1].match_fields.0["tcp_dst"],
        serde_json::json!(8080)
    );
}

#[test]
fn dispatcher_acks_and_survives_malformed_events() {
    let log = test_logger();
    let (tx, rx) = channel();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Dispatcher::new(addr.to_string(), tx, log);
    std::thread::spawn(move || {
        let _ = dispatcher.serve(listener);
    });

    // garbage: logged, dropped, no ack, no dispatch
    let mut bad = TcpStream::connect(addr).unwrap();
    bad.write_all(b"not json at all\n").unwrap();
    bad.flush().unwrap();
    let mut end = String::new();
    BufReader::new(&bad).read_line(&mut end).unwrap();
    assert!(end.is_empty());
    assert!(rx
        .recv_timeout(Duration::from_millis(100))
        .is_err());

    // a valid event is acked and queued
    let mut good = TcpStream::connect(addr).unwrap();
    good.write_all(b"{\"arp\": \"172.0.1.5\"}\n").unwrap();
    good.flush().unwrap();
    let mut ack = String::new();
    BufReader::new(&good).read_line(&mut ack).unwrap();
    assert_eq!(ack, EVENT_ACK);
    match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
        Event::Arp(vnh) => assert_eq!(vnh, Ipv4Addr::new(172, 0, 1, 5)),
        other => panic!("expected arp event, got {other:?}"),
    }
}
