// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// A 48-bit Ethernet address. Used both for physical port addresses and for
/// the virtual addresses synthesized by the encoding engine, which are built
/// with the `to_u64`/`from_u64` conversions.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BITS: u32 = 48;

    /// All 48 bits set. Masking against this is a full exact match.
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The address as the low 48 bits of a u64.
    pub fn to_u64(self) -> u64 {
        let o = self.0;
        (o[0] as u64) << 40
            | (o[1] as u64) << 32
            | (o[2] as u64) << 24
            | (o[3] as u64) << 16
            | (o[4] as u64) << 8
            | (o[5] as u64)
    }

    /// Build an address from the low 48 bits of `v`. Higher bits are
    /// discarded.
    pub fn from_u64(v: u64) -> Self {
        Self([
            (v >> 40) as u8,
            (v >> 32) as u8,
            (v >> 24) as u8,
            (v >> 16) as u8,
            (v >> 8) as u8,
            v as u8,
        ])
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

#[derive(Debug, Error)]
pub enum MacParseError {
    #[error("expected six colon separated octets")]
    Form,

    #[error("octet parse error: {0}")]
    Octet(#[from] ParseIntError),
}

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError::Form);
        }
        let mut octets = [0u8; 6];
        for (i, p) in parts.iter().enumerate() {
            octets[i] = u8::from_str_radix(p, 16)?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(|e| D::Error::custom(format!("{e}")))
    }
}
