// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport categories used to bucket download telemetry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where payload bytes came from, derived from the scheme of the URL being
/// downloaded. "No recognized source" is represented by `Option::None`, not
/// by a member, so that per-source tables never need a sentinel slot.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DownloadSource {
    HttpServer = 0,
    HttpsServer = 1,
}

impl DownloadSource {
    /// Every source, in bit order.
    pub const ALL: [DownloadSource; 2] =
        [DownloadSource::HttpServer, DownloadSource::HttpsServer];

    /// Classifies a URL by scheme, case-insensitively. Anything that isn't
    /// plain HTTP or HTTPS (including relative paths and exotic schemes) has
    /// no source.
    pub fn from_url(url: &str) -> Option<DownloadSource> {
        if url.get(..8).is_some_and(|p| p.eq_ignore_ascii_case("https://")) {
            Some(DownloadSource::HttpsServer)
        } else if url.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("http://")) {
            Some(DownloadSource::HttpServer)
        } else {
            None
        }
    }

    /// This source's bit in the `DownloadSourcesUsed` mask.
    pub fn bit(self) -> i64 {
        1 << (self as i64)
    }
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadSource::HttpServer => "HttpServer",
            DownloadSource::HttpsServer => "HttpsServer",
        };
        f.write_str(name)
    }
}
