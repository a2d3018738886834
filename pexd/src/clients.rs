// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborator sinks: the ARP proxy and the route server.
//!
//! Both take one JSON object per connection, like the reference monitor.
//! Sends retry with bounded backoff and then fail loudly; a swallowed ARP
//! response would leave a peer resolving a dead address.

use pex_common::net::MacAddr;
use serde::Serialize;
use slog::{warn, Logger};
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} unreachable: {1}")]
    Unreachable(&'static str, String),

    #[error("channel send: {0}")]
    ChannelSend(String),
}

/// One ARP answer, addressed to one of our router ports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArpResponse {
    pub vnhip: Ipv4Addr,
    pub vmac_addr: MacAddr,
    pub dstip: Ipv4Addr,
    pub dst_mac: MacAddr,
}

pub trait ArpSink: Send {
    fn send(&mut self, response: &ArpResponse) -> Result<(), Error>;
}

pub trait RouteServerSink: Send {
    fn announce(&mut self, record: &serde_json::Value) -> Result<(), Error>;
}

fn send_with_retry(
    name: &'static str,
    addr: SocketAddr,
    payload: &str,
    log: &Logger,
) -> Result<(), Error> {
    let policy = backoff::ExponentialBackoff {
        max_elapsed_time: Some(DEFAULT_RETRY_BUDGET),
        ..Default::default()
    };
    backoff::retry(policy, || {
        send_json_line(addr, DEFAULT_SEND_TIMEOUT, payload).map_err(|e| {
            warn!(log, "{name} send to {addr} failed, retrying: {e}");
            backoff::Error::transient(e)
        })
    })
    .map_err(|e| Error::Unreachable(name, format!("{addr}: {e}")))
}

fn send_json_line(
    addr: SocketAddr,
    timeout: Duration,
    payload: &str,
) -> std::io::Result<()> {
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(payload.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

pub struct ArpClient {
    addr: SocketAddr,
    log: Logger,
}

impl ArpClient {
    pub fn new(addr: SocketAddr, log: Logger) -> Self {
        Self { addr, log }
    }
}

impl ArpSink for ArpClient {
    fn send(&mut self, response: &ArpResponse) -> Result<(), Error> {
        let payload = serde_json::to_string(response)?;
        send_with_retry("arp proxy", self.addr, &payload, &self.log)
    }
}

pub struct RouteServerClient {
    addr: SocketAddr,
    log: Logger,
}

impl RouteServerClient {
    pub fn new(addr: SocketAddr, log: Logger) -> Self {
        Self { addr, log }
    }
}

impl RouteServerSink for RouteServerClient {
    fn announce(&mut self, record: &serde_json::Value) -> Result<(), Error> {
        // records pass through exactly as the decision process produced them
        let payload = serde_json::to_string(record)?;
        send_with_retry("route server", self.addr, &payload, &self.log)
    }
}

/// Channel-backed sinks for exercising the reactor without a network.
pub struct ChannelArpSink {
    tx: Sender<ArpResponse>,
}

impl ChannelArpSink {
    pub fn new() -> (Self, Receiver<ArpResponse>) {
        let (tx, rx) = channel();
        (Self { tx }, rx)
    }
}

impl ArpSink for ChannelArpSink {
    fn send(&mut self, response: &ArpResponse) -> Result<(), Error> {
        self.tx
            .send(response.clone())
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }
}

pub struct ChannelRouteServerSink {
    tx: Sender<serde_json::Value>,
}

impl ChannelRouteServerSink {
    pub fn new() -> (Self, Receiver<serde_json::Value>) {
        let (tx, rx) = channel();
        (Self { tx }, rx)
    }
}

impl RouteServerSink for ChannelRouteServerSink {
    fn announce(&mut self, record: &serde_json::Value) -> Result<(), Error> {
        self.tx
            .send(record.clone())
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }
}
