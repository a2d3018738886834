// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Context, Result};
use pdb::{ParticipantId, Port, Prefix4};
use pex_common::net::MacAddr;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use vmac::VmacLayout;

/// Per-participant controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Our participant id.
    pub id: ParticipantId,

    /// Event channel listen address.
    pub listen: String,

    /// Router attachments, port 0 first.
    pub ports: Vec<Port>,

    /// Pool block the virtual next hops are drawn from.
    pub vnh_block: Prefix4,

    pub refmon: SocketAddr,
    pub arp_proxy: SocketAddr,
    pub route_server: SocketAddr,

    /// Real next hop address to owning participant.
    pub nexthop_participants: HashMap<Ipv4Addr, ParticipantId>,

    #[serde(default)]
    pub vmac: VmacLayout,

    #[serde(default = "default_initial_fill")]
    pub superset_initial_fill: u32,
}

fn default_initial_fill() -> u32 {
    vmac::DEFAULT_INITIAL_FILL
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path)
            .with_context(|| format!("open config {}", path.display()))?;
        let cfg: Config = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(anyhow!("at least one port is required"));
        }
        self.vmac.validate()?;
        if self.id > self.vmac.max_participant() {
            return Err(anyhow!(
                "participant id {} does not fit the configured layout",
                self.id
            ));
        }
        for p in self.nexthop_participants.values() {
            if *p > self.vmac.max_participant() {
                return Err(anyhow!(
                    "next hop participant {p} does not fit the configured \
                     layout"
                ));
            }
        }
        if self.ports.len() as u64 > self.vmac.max_port() as u64 + 1 {
            return Err(anyhow!(
                "{} ports exceed the port field",
                self.ports.len()
            ));
        }
        Ok(())
    }

    /// MAC of port 0, the tag marking outbound rules as ours.
    pub fn tagging_mac(&self) -> MacAddr {
        self.ports[0].mac
    }

    pub fn port_count(&self) -> u32 {
        self.ports.len() as u32
    }
}
