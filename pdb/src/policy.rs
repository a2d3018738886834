// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Participant policy sets.
//!
//! Policies arrive as match/action documents, either from the policy file
//! at startup or from policy-change events at runtime. Each accepted entry
//! is stamped with a process-unique cookie so later edits can withdraw the
//! exact rules it produced.

use crate::error::Error;
use crate::types::{Policy, PolicyAction, PolicyDoc, PolicyEntry};
use slog::{warn, Logger};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub fn load_policy_file<P: AsRef<Path>>(path: P) -> Result<PolicyDoc, Error> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

/// The participant's live policies, partitioned by direction.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub inbound: Vec<Policy>,
    pub outbound: Vec<Policy>,
    next_cookie: u64,
}

impl PolicySet {
    pub fn from_doc(doc: PolicyDoc, port_count: u32, log: &Logger) -> Self {
        let mut set = Self {
            inbound: Vec::new(),
            outbound: Vec::new(),
            next_cookie: 1,
        };
        set.ingest(doc, port_count, log);
        set
    }

    /// Accept a document of additions. Inbound forward targets beyond the
    /// port range are clamped to port 0 with a log line, matching the
    /// dataplane's treatment. Entries without an action are dropped.
    /// Returns copies of the accepted policies per direction.
    pub fn ingest(
        &mut self,
        doc: PolicyDoc,
        port_count: u32,
        log: &Logger,
    ) -> (Vec<Policy>, Vec<Policy>) {
        let added_in = self.ingest_dir(doc.inbound, Some(port_count), log);
        let added_out = self.ingest_dir(doc.outbound, None, log);
        self.inbound.extend(added_in.iter().cloned());
        self.outbound.extend(added_out.iter().cloned());
        (added_in, added_out)
    }

    fn ingest_dir(
        &mut self,
        entries: Vec<PolicyEntry>,
        clamp: Option<u32>,
        log: &Logger,
    ) -> Vec<Policy> {
        let mut out = Vec::new();
        for e in entries {
            let Some(mut action) = e.action else {
                warn!(log, "dropping policy entry without an action");
                continue;
            };
            if let (Some(port_count), PolicyAction::Fwd(port)) =
                (clamp, &mut action)
            {
                if *port >= port_count {
                    warn!(
                        log,
                        "inbound policy forward port {port} out of range, \
                         clamping to 0"
                    );
                    *port = 0;
                }
            }
            let cookie = self.next_cookie;
            self.next_cookie += 1;
            out.push(Policy {
                cookie,
                match_fields: e.match_fields,
                action,
            });
        }
        out
    }

    /// Withdraw the policies holding the given cookies. Returns the removed
    /// policies per direction, so their installed rules can be torn down.
    pub fn remove_cookies(
        &mut self,
        cookies: &[u64],
    ) -> (Vec<Policy>, Vec<Policy>) {
        let take = |list: &mut Vec<Policy>| {
            let (gone, keep): (Vec<Policy>, Vec<Policy>) = list
                .drain(..)
                .partition(|p| cookies.contains(&p.cookie));
            *list = keep;
            gone
        };
        (take(&mut self.inbound), take(&mut self.outbound))
    }
}
