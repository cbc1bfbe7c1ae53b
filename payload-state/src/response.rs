// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The slice of an update response that drives retry behavior.

use serde::{Deserialize, Serialize};

/// The fields of an update-check response that the payload state machine
/// cares about. The surrounding agent parses the full response; only these
/// fields participate in the fingerprint, so only changes to these fields
/// reset an in-progress attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Candidate payload URLs in server-preferred order. Earlier URLs are
    /// assumed cheaper (e.g. a LAN mirror before an internet origin).
    pub payload_urls: Vec<String>,
    pub payload_size: u64,
    pub payload_hash: String,
    pub metadata_size: u64,
    pub metadata_signature: String,
    pub is_delta: bool,
    /// Consecutive transient failures tolerated on one URL before rotating
    /// to the next.
    pub max_failures_per_url: u32,
    pub disable_backoff: bool,
}

impl UpdateResponse {
    /// Canonical fingerprint of this response.
    ///
    /// Two responses fingerprint identically iff an in-progress attempt may
    /// legitimately continue against the new one. The rendering is frozen:
    /// persisted fingerprints must compare equal across agent releases, so
    /// neither the field set nor the byte form here may change.
    pub fn fingerprint(&self) -> String {
        let mut out = format!("NumURLs = {}\n", self.payload_urls.len());
        for (i, url) in self.payload_urls.iter().enumerate() {
            out.push_str(&format!("Url{i} = {url}\n"));
        }
        out.push_str(&format!(
            "Payload Size = {}\n\
             Payload Sha256 Hash = {}\n\
             Metadata Size = {}\n\
             Metadata Signature = {}\n\
             Is Delta Payload = {}\n\
             Max Failure Count Per Url = {}\n\
             Disable Payload Backoff = {}\n",
            self.payload_size,
            self.payload_hash,
            self.metadata_size,
            self.metadata_signature,
            u8::from(self.is_delta),
            self.max_failures_per_url,
            u8::from(self.disable_backoff),
        ));
        out
    }
}
