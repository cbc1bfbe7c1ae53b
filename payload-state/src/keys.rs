// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Preference keys used by the payload state machine.
//!
//! These strings are part of the on-disk format: state written by one release
//! is read back by the next, so renaming a key silently discards the field it
//! held. Treat every constant here as frozen.

use crate::source::DownloadSource;

pub const CURRENT_RESPONSE_SIGNATURE: &str = "current-response-signature";
pub const PAYLOAD_ATTEMPT_NUMBER: &str = "payload-attempt-number";
pub const CURRENT_URL_INDEX: &str = "current-url-index";
pub const CURRENT_URL_FAILURE_COUNT: &str = "current-url-failure-count";
pub const URL_SWITCH_COUNT: &str = "url-switch-count";
pub const BACKOFF_EXPIRY_TIME: &str = "backoff-expiry-time";
pub const UPDATE_TIMESTAMP_START: &str = "update-timestamp-start";
pub const UPDATE_DURATION_UPTIME: &str = "update-duration-uptime";
pub const NUM_REBOOTS: &str = "num-reboots";

pub const CURRENT_BYTES_DOWNLOADED_PREFIX: &str = "current-bytes-downloaded";
pub const TOTAL_BYTES_DOWNLOADED_PREFIX: &str = "total-bytes-downloaded";

/// Key for a per-source byte counter, e.g.
/// `current-bytes-downloaded-from-HttpsServer`.
pub fn bytes_downloaded_key(prefix: &str, source: DownloadSource) -> String {
    format!("{prefix}-from-{source}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_source_keys_are_stable() {
        assert_eq!(
            bytes_downloaded_key(CURRENT_BYTES_DOWNLOADED_PREFIX, DownloadSource::HttpServer),
            "current-bytes-downloaded-from-HttpServer"
        );
        assert_eq!(
            bytes_downloaded_key(TOTAL_BYTES_DOWNLOADED_PREFIX, DownloadSource::HttpsServer),
            "total-bytes-downloaded-from-HttpsServer"
        );
    }
}
