// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use pdb::ParticipantId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid vmac layout: {0}")]
    Layout(String),

    #[error("participant {0} does not fit the participant field")]
    ParticipantRange(ParticipantId),

    #[error("participant {0} holds no slot")]
    Unassigned(ParticipantId),

    #[error("{0} participants exceed the encoding capacity of {1}")]
    CapacityExceeded(usize, usize),
}
