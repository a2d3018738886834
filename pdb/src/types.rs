// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use pex_common::net::MacAddr;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Identifies one exchange participant. Ids are allocated by the exchange
/// operator and must fit the participant subfield of the VMAC layout.
pub type ParticipantId = u32;

/// An IPv4 prefix in CIDR form. Serialized on every wire surface as the
/// string `addr/len`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix4 {
    pub value: Ipv4Addr,
    pub length: u8,
}

impl Prefix4 {
    pub fn new(value: Ipv4Addr, length: u8) -> Self {
        Self { value, length }
    }

    /// The network address with host bits cleared.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.value) & self.mask())
    }

    pub fn mask(&self) -> u32 {
        if self.length == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.length))
        }
    }

    /// Number of usable host addresses when this prefix names a pool block.
    pub fn host_count(&self) -> u32 {
        if self.length >= 31 {
            return 0;
        }
        if self.length == 0 {
            return u32::MAX - 1;
        }
        (1u32 << (32 - u32::from(self.length))) - 2
    }

    /// The `i`th usable host address of the block, zero indexed.
    pub fn host(&self, i: u32) -> Option<Ipv4Addr> {
        if i >= self.host_count() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network()) + 1 + i))
    }
}

impl Display for Prefix4 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.length)
    }
}

impl FromStr for Prefix4 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, length) = s
            .split_once('/')
            .ok_or("expected CIDR representation <addr>/<len>".to_string())?;
        let value: Ipv4Addr =
            value.parse().map_err(|_| "malformed ip addr".to_string())?;
        let length: u8 =
            length.parse().map_err(|_| "malformed length".to_string())?;
        if length > 32 {
            return Err(format!("invalid prefix length {length}"));
        }
        Ok(Self { value, length })
    }
}

impl Serialize for Prefix4 {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Prefix4 {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// One participant-facing router attachment. Ports are indexed 0..N; port 0
/// is the tagging port whose MAC marks outbound rules as ours.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// Whether a slot-assignment or rule delta is an incremental change or a
/// full recomputation that invalidates everything previously installed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Full recomputation: every previously installed outbound rule is
    /// stale and every known VNH must be re-advertised.
    New,
    /// Incremental: only the carried assignments changed.
    Change,
}

/// A normalized per-prefix routing change: the prefix now reaches the named
/// participant via `next_hop`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrefixChange {
    pub prefix: Prefix4,
    pub participant: ParticipantId,
    pub next_hop: Ipv4Addr,
}

/// An already-parsed route-server advertisement as delivered on the event
/// channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteAdvertisement {
    #[serde(default)]
    pub announce: Vec<RouteRecord>,
    #[serde(default)]
    pub withdraw: Vec<Prefix4>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub prefix: Prefix4,
    pub next_hop: Ipv4Addr,
}

/// A policy edit delivered on the event channel: cookies to withdraw plus a
/// policy document of additions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyChange {
    #[serde(default)]
    pub removal_cookies: Vec<u64>,
    #[serde(default)]
    pub new_policies: PolicyDoc,
}

/// The policy file schema: match/action entries partitioned by direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDoc {
    #[serde(default)]
    pub inbound: Vec<PolicyEntry>,
    #[serde(default)]
    pub outbound: Vec<PolicyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(rename = "match", default)]
    pub match_fields: Match,
    pub action: Option<PolicyAction>,
}

/// A policy action: forward to a port index (inbound) or a participant id
/// (outbound), or drop.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Fwd(u32),
    Drop,
}

/// A loaded policy with its process-unique cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub cookie: u64,
    #[serde(rename = "match")]
    pub match_fields: Match,
    pub action: PolicyAction,
}

/// A flow-rule match. The policy-supplied predicate is carried opaquely;
/// the encoding layer adds the ethernet fields it owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Match(pub serde_json::Map<String, serde_json::Value>);

impl Match {
    /// Masked destination match, serialized as a `[value, mask]` pair.
    pub fn set_eth_dst(&mut self, value: MacAddr, mask: MacAddr) {
        self.0.insert(
            "eth_dst".to_string(),
            serde_json::json!([value, mask]),
        );
    }

    pub fn set_eth_src(&mut self, mac: MacAddr) {
        self.0
            .insert("eth_src".to_string(), serde_json::json!(mac));
    }
}

/// A flow-rule action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_eth_dst: Option<MacAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fwd: Option<ForwardTarget>,
}

impl Action {
    pub fn rewrite(vmac: MacAddr, fwd: ForwardTarget) -> Self {
        Self {
            set_eth_dst: Some(vmac),
            fwd: Some(fwd),
        }
    }
}

/// Dataplane stage a rule hands matched traffic to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardTarget {
    Inbound,
    Main,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Inbound,
    Outbound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModType {
    Insert,
    Remove,
}

/// One dataplane rule insertion or removal, in reference-monitor wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMod {
    pub rule_type: RuleType,
    pub priority: u16,
    #[serde(rename = "match")]
    pub match_fields: Match,
    pub action: Action,
    pub mod_type: ModType,
    pub cookie: u64,
}

/// An inbound network event. The wire form is a single-key JSON object
/// keyed by the event family; anything else fails decode and is dropped by
/// the dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Bgp(RouteAdvertisement),
    Policy(PolicyChange),
    Arp(Ipv4Addr),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Bgp(_) => "bgp",
            Event::Policy(_) => "policy",
            Event::Arp(_) => "arp",
        }
    }
}
