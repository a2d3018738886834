// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The event reactor.
//!
//! Every handler that touches the allocator, the encoding tables or the
//! flow-mod queue runs here, one event at a time, fed by a channel from
//! the dispatcher. The acknowledgement a sender receives means its event
//! reached this queue, not that the dataplane has been updated.

use crate::bgp::DecisionProcess;
use crate::clients::{ArpResponse, ArpSink, RouteServerSink};
use crate::config::Config;
use anyhow::{Context, Result};
use pdb::{
    Event, PolicyChange, PolicySet, RouteAdvertisement, VnhAllocator,
};
use pex_lower::refmon::Dataplane;
use pex_lower::rules;
use pex_lower::FlowModQueue;
use slog::{debug, error, info, warn, Logger};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::mpsc::Receiver;
use vmac::encoding::Encoder;

pub struct Reactor {
    cfg: Config,
    vnhs: VnhAllocator,
    encoder: Box<dyn Encoder>,
    policies: PolicySet,
    queue: FlowModQueue,
    decision: Box<dyn DecisionProcess>,
    dataplane: Box<dyn Dataplane>,
    arp: Box<dyn ArpSink>,
    route_server: Box<dyn RouteServerSink>,
    rx: Receiver<Event>,
    log: Logger,
}

impl Reactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        policies: pdb::PolicyDoc,
        mut encoder: Box<dyn Encoder>,
        decision: Box<dyn DecisionProcess>,
        dataplane: Box<dyn Dataplane>,
        arp: Box<dyn ArpSink>,
        route_server: Box<dyn RouteServerSink>,
        rx: Receiver<Event>,
        log: Logger,
    ) -> Result<Self> {
        // we must always be encodable: our own inbound rules rewrite to our
        // fully qualified address
        encoder
            .assign(cfg.id)
            .context("placing our own participant id")?;
        let policies = PolicySet::from_doc(policies, cfg.port_count(), &log);
        let vnhs = VnhAllocator::new(cfg.vnh_block, log.clone());
        Ok(Self {
            queue: FlowModQueue::new(log.clone()),
            cfg,
            vnhs,
            encoder,
            policies,
            decision,
            dataplane,
            arp,
            route_server,
            rx,
            log,
        })
    }

    /// Install the startup inbound rule set.
    pub fn initialize_dataplane(&mut self) -> Result<()> {
        info!(self.log, "installing initial inbound rules");
        let delta = rules::build_init_inbound(
            self.cfg.id,
            &self.policies,
            self.encoder.as_ref(),
            self.cfg.port_count(),
        )?;
        self.queue.enqueue(delta.mods);
        self.queue.flush(self.dataplane.as_mut())?;
        Ok(())
    }

    /// Consume events until the channel closes. Handler errors are fatal:
    /// they mean either broken configuration or a collaborator that stayed
    /// unreachable past its retry budget.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let event = match self.rx.recv() {
                Ok(event) => event,
                Err(_) => {
                    info!(self.log, "event channel closed, reactor stopping");
                    return Ok(());
                }
            };
            debug!(self.log, "handling {} event", event.kind());
            if let Err(e) = self.handle(event) {
                error!(self.log, "event handling failed: {e}");
                return Err(e);
            }
        }
    }

    pub(crate) fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Bgp(adv) => self.handle_bgp(adv),
            Event::Policy(change) => self.handle_policy(change),
            Event::Arp(vnh) => self.handle_arp(vnh),
        }
    }

    /// One advertisement batch, start to finish: normalize, bind virtual
    /// next hops, fold into the encoding tables, synthesize and push the
    /// rule delta, re-advertise moved addresses, relay announcements.
    pub(crate) fn handle_bgp(
        &mut self,
        adv: RouteAdvertisement,
    ) -> Result<()> {
        let changes = self.decision.evaluate(&adv);

        for c in &changes {
            self.vnhs.assign(c.prefix)?;
        }

        let (change_set, changed_prefixes) =
            self.encoder.update(&changes)?;

        let mut garp_targets: BTreeSet<Ipv4Addr> =
            if change_set.is_rebuild() {
                // conservative path: every installed outbound rule is
                // stale and every bound address must be re-advertised
                self.queue.enqueue(rules::clear_all_outbound(
                    &self.policies.outbound,
                    self.cfg.tagging_mac(),
                ));
                self.vnhs.vnhs().into_iter().collect()
            } else {
                changed_prefixes
                    .iter()
                    .filter_map(|p| self.vnhs.prefix_to_vnh(p))
                    .collect()
            };

        let delta = rules::update_outbound_rules(
            &change_set,
            &self.policies.outbound,
            self.encoder.as_ref(),
            self.cfg.tagging_mac(),
        );
        self.queue.enqueue(delta.mods);
        self.queue.flush(self.dataplane.as_mut())?;

        let peer = self.decision.peer_updates(&changes, &self.vnhs);
        garp_targets.extend(
            peer.changed
                .iter()
                .filter_map(|p| self.vnhs.prefix_to_vnh(p)),
        );

        for vnh in garp_targets {
            self.advertise_vnh(vnh)?;
        }

        for record in &peer.announcements {
            self.route_server.announce(record)?;
        }
        Ok(())
    }

    /// Tear down rules for withdrawn cookies, install rules for added
    /// policies, push the batch.
    pub(crate) fn handle_policy(
        &mut self,
        change: PolicyChange,
    ) -> Result<()> {
        let (gone_in, gone_out) =
            self.policies.remove_cookies(&change.removal_cookies);
        info!(
            self.log,
            "policy change: -{} inbound -{} outbound",
            gone_in.len(),
            gone_out.len()
        );
        let mut mods = rules::removal_rules(
            &gone_in,
            &gone_out,
            self.cfg.tagging_mac(),
        );

        let (new_in, new_out) = self.policies.ingest(
            change.new_policies,
            self.cfg.port_count(),
            &self.log,
        );
        mods.extend(rules::build_inbound_rules(
            self.cfg.id,
            &new_in,
            self.encoder.as_ref(),
            self.cfg.port_count(),
        )?);
        mods.extend(rules::build_outbound_rules(
            &new_out,
            self.encoder.as_ref(),
            self.cfg.tagging_mac(),
        ));

        self.queue.enqueue(mods);
        self.queue.flush(self.dataplane.as_mut())?;
        Ok(())
    }

    /// Answer for one virtual next hop on every configured port.
    pub(crate) fn handle_arp(&mut self, vnh: Ipv4Addr) -> Result<()> {
        self.advertise_vnh(vnh)
    }

    fn advertise_vnh(&mut self, vnh: Ipv4Addr) -> Result<()> {
        let Some(prefix) = self.vnhs.vnh_to_prefix(vnh) else {
            warn!(self.log, "arp request for unknown vnh {vnh}");
            return Ok(());
        };
        let Some(participant) = self.decision.best_participant(&prefix)
        else {
            debug!(
                self.log,
                "no selected route for {prefix}, not answering for {vnh}"
            );
            return Ok(());
        };
        let vmac = match self.encoder.vmac_full(participant, 0) {
            Ok(vmac) => vmac,
            Err(e) => {
                error!(
                    self.log,
                    "no address for {vnh} owned by {participant}: {e}"
                );
                return Ok(());
            }
        };
        for port in &self.cfg.ports {
            self.arp.send(&ArpResponse {
                vnhip: vnh,
                vmac_addr: vmac,
                dstip: port.ip,
                dst_mac: port.mac,
            })?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &FlowModQueue {
        &self.queue
    }

    #[cfg(test)]
    pub(crate) fn vnh_allocator(&self) -> &VnhAllocator {
        &self.vnhs
    }
}
