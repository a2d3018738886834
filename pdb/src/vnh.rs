// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual next hop allocation.
//!
//! Every advertised prefix is bound to a synthetic next hop address drawn
//! from a configured pool block, so peers resolve a controller-owned
//! address instead of the real router. The binding is bidirectional and
//! permanent: a withdrawn prefix keeps its VNH for the lifetime of the
//! process, which keeps peers' caches stable across route flaps.

use crate::error::Error;
use crate::types::Prefix4;
use pex_common::lock;
use slog::{debug, Logger};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Allocator handle. Clones share state.
#[derive(Clone)]
pub struct VnhAllocator {
    inner: Arc<Mutex<Inner>>,
    log: Logger,
}

struct Inner {
    /// Pool block the synthetic addresses are drawn from.
    block: Prefix4,

    /// Number of addresses drawn so far.
    used: u32,

    prefix_to_vnh: HashMap<Prefix4, Ipv4Addr>,
    vnh_to_prefix: HashMap<Ipv4Addr, Prefix4>,
}

impl VnhAllocator {
    pub fn new(block: Prefix4, log: Logger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                block,
                used: 0,
                prefix_to_vnh: HashMap::new(),
                vnh_to_prefix: HashMap::new(),
            })),
            log,
        }
    }

    /// Bind `prefix` to a VNH. Idempotent: a prefix that already holds a
    /// binding gets the same address back. An exhausted pool is a
    /// configuration error, not a recoverable condition.
    pub fn assign(&self, prefix: Prefix4) -> Result<Ipv4Addr, Error> {
        let mut inner = lock!(self.inner);
        if let Some(vnh) = inner.prefix_to_vnh.get(&prefix) {
            return Ok(*vnh);
        }
        let vnh = inner
            .block
            .host(inner.used)
            .ok_or(Error::VnhPoolExhausted(inner.used))?;
        inner.used += 1;
        inner.prefix_to_vnh.insert(prefix, vnh);
        inner.vnh_to_prefix.insert(vnh, prefix);
        debug!(self.log, "assigned vnh {vnh} to {prefix}");
        Ok(vnh)
    }

    pub fn prefix_to_vnh(&self, prefix: &Prefix4) -> Option<Ipv4Addr> {
        lock!(self.inner).prefix_to_vnh.get(prefix).copied()
    }

    pub fn vnh_to_prefix(&self, vnh: Ipv4Addr) -> Option<Prefix4> {
        lock!(self.inner).vnh_to_prefix.get(&vnh).copied()
    }

    /// Every VNH handed out so far, in no particular order.
    pub fn vnhs(&self) -> Vec<Ipv4Addr> {
        lock!(self.inner).vnh_to_prefix.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock!(self.inner).prefix_to_vnh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
