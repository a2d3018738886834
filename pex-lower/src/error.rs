// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("encoder error: {0}")]
    Encoder(#[from] vmac::error::Error),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataplane unreachable: {0}")]
    DataplaneUnreachable(String),

    #[error("channel send: {0}")]
    ChannelSend(String),
}
