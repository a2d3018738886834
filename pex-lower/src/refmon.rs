// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The reference monitor seam.
//!
//! A flushed batch travels as one JSON array on a fresh connection. The
//! TCP client retries with bounded exponential backoff; once the budget is
//! spent the error surfaces to the caller, because a dropped batch leaves
//! the dataplane out of sync with everything the controller believes it
//! has installed.

use crate::error::Error;
use pdb::FlowMod;
use slog::{debug, warn, Logger};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Total retry budget for one batch.
pub const DEFAULT_RETRY_BUDGET: Duration = Duration::from_secs(30);

/// Where flushed flow-mod batches go.
pub trait Dataplane: Send {
    fn apply(&mut self, batch: &[FlowMod]) -> Result<(), Error>;
}

/// TCP client for the reference monitor.
pub struct RefmonClient {
    addr: SocketAddr,
    timeout: Duration,
    retry_budget: Duration,
    log: Logger,
}

impl RefmonClient {
    pub fn new(addr: SocketAddr, log: Logger) -> Self {
        Self {
            addr,
            timeout: DEFAULT_SEND_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
            log,
        }
    }

    pub fn with_timeouts(
        mut self,
        timeout: Duration,
        retry_budget: Duration,
    ) -> Self {
        self.timeout = timeout;
        self.retry_budget = retry_budget;
        self
    }
}

impl Dataplane for RefmonClient {
    fn apply(&mut self, batch: &[FlowMod]) -> Result<(), Error> {
        let payload = serde_json::to_string(batch)?;
        let policy = backoff::ExponentialBackoff {
            max_elapsed_time: Some(self.retry_budget),
            ..Default::default()
        };
        backoff::retry(policy, || {
            send_json_line(self.addr, self.timeout, &payload).map_err(
                |e| {
                    warn!(
                        self.log,
                        "flow mod push to {} failed, retrying: {e}",
                        self.addr
                    );
                    backoff::Error::transient(e)
                },
            )
        })
        .map_err(|e| {
            Error::DataplaneUnreachable(format!("{}: {e}", self.addr))
        })?;
        debug!(self.log, "pushed {} flow mods to {}", batch.len(), self.addr);
        Ok(())
    }
}

pub(crate) fn send_json_line(
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

/// Channel-backed dataplane for exercising the queue and pipeline without
/// a network.
pub struct ChannelDataplane {
    tx: Sender<Vec<FlowMod>>,
}

impl ChannelDataplane {
    pub fn new() -> (Self, Receiver<Vec<FlowMod>>) {
        let (tx, rx) = channel();
        (Self { tx }, rx)
    }
}

impl Dataplane for ChannelDataplane {
    fn apply(&mut self, batch: &[FlowMod]) -> Result<(), Error> {
        self.tx
            .send(batch.to_vec())
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }
}
