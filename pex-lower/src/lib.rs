// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lowering: from policies and encoding state to installed dataplane
//! rules.
//!
//! `rules` translates the participant's policies plus the current slot
//! assignments into concrete flow mods; `queue` buffers them in order and
//! hands complete batches to the reference monitor through the `Dataplane`
//! seam in `refmon`.

pub mod error;
pub mod queue;
pub mod refmon;
pub mod rules;

pub use queue::FlowModQueue;
pub use refmon::{ChannelDataplane, Dataplane, RefmonClient};
pub use rules::RuleDelta;

#[cfg(test)]
mod test;
