// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual MAC encoding.
//!
//! The exchange packs forwarding identity into 48-bit virtual MAC
//! addresses so that one wildcarded dataplane rule can select traffic for
//! a whole group of participants. This crate owns the address layout, the
//! grouping tables, and the decision between incremental growth and a full
//! recomputation of the grouping.

pub mod encoding;
pub mod error;
pub mod superset;

pub use encoding::{ChangeSet, Encoder, Slot, SlotAssignment, VmacLayout};
pub use superset::SupersetEncoder;

/// Default field widths, most significant first: superset id, membership
/// bitmask, participant id, egress port. They sum to the 48 bits of an
/// ethernet address.
pub const DEFAULT_SUPERSET_ID_BITS: u32 = 5;
pub const DEFAULT_MEMBERSHIP_BITS: u32 = 30;
pub const DEFAULT_PARTICIPANT_BITS: u32 = 10;
pub const DEFAULT_PORT_BITS: u32 = 3;

/// Incremental fill limit: a superset accepts incrementally placed
/// participants only while it holds fewer slots than this. A table rebuild
/// packs each superset to the full membership width instead, reclaiming id
/// space at the cost of rewriting every installed rule.
pub const DEFAULT_INITIAL_FILL: u32 = 10;
