// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The participant database (pdb).
//!
//! Volatile control-plane state for one exchange participant: the shared
//! type vocabulary (prefixes, ports, policies, flow mods, events), the
//! virtual next hop allocator, and the participant's policy sets. Nothing
//! here survives a restart; everything is initialized empty and mutated
//! only through event handlers.

pub mod error;
pub mod policy;
pub mod types;
pub mod vnh;

pub use policy::PolicySet;
pub use types::*;
pub use vnh::VnhAllocator;
