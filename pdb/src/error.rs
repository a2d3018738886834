// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("vnh pool exhausted after {0} assignments")]
    VnhPoolExhausted(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("policy structure error: {0}")]
    PolicyFormat(String),
}
