use anyhow::Result;
use clap::Parser;
use pex_common::log::init_logger;
use slog::{error, info};
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::thread::spawn;

mod bgp;
mod clients;
mod config;
mod dispatcher;
mod reactor;

#[cfg(test)]
mod test;

/// Participant-side controller for a software defined internet exchange.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Controller configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Participant policy file.
    #[arg(short, long)]
    policy: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = init_logger();

    let cfg = config::Config::load(&cli.config)?;
    let policies = pdb::policy::load_policy_file(&cli.policy)?;
    info!(log, "starting controller for participant {}", cfg.id);

    let encoder = vmac::SupersetEncoder::with_initial_fill(
        cfg.vmac,
        cfg.superset_initial_fill,
        log.clone(),
    )?;
    let decision = bgp::BestPathTable::new(
        cfg.nexthop_participants.clone(),
        log.clone(),
    );
    let dataplane =
        pex_lower::RefmonClient::new(cfg.refmon, log.clone());
    let arp = clients::ArpClient::new(cfg.arp_proxy, log.clone());
    let route_server =
        clients::RouteServerClient::new(cfg.route_server, log.clone());

    let (tx, rx) = channel();
    let mut reactor = reactor::Reactor::new(
        cfg.clone(),
        policies,
        Box::new(encoder),
        Box::new(decision),
        Box::new(dataplane),
        Box::new(arp),
        Box::new(route_server),
        rx,
        log.clone(),
    )?;
    reactor.initialize_dataplane()?;

    let worker_log = log.clone();
    spawn(move || {
        if let Err(e) = reactor.run() {
            error!(worker_log, "reactor failed: {e}");
            std::process::exit(1);
        }
    });

    let dispatcher =
        dispatcher::Dispatcher::new(cfg.listen.clone(), tx, log);
    dispatcher.run()
}
