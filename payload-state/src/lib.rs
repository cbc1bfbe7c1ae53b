// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Payload state machine for the update agent.
//!
//! An update attempt can outlive many processes: downloads fail and are
//! retried against other mirrors, the device reboots mid-download, the agent
//! crashes and restarts. [`PayloadState`] tracks a single in-progress update
//! across all of that. It decides which payload URL to try next, when a
//! failure should rotate to another URL versus merely penalize the current
//! one, and whether downloads should be deferred entirely under an
//! exponential backoff. Along the way it keeps per-source byte counters and
//! wall-clock/uptime durations, and turns a successful update into a set of
//! bucketed metric samples.
//!
//! The crate does no I/O of its own beyond the injected [`Prefs`] store:
//! downloading, payload verification, and post-install all live in the
//! surrounding agent, which reports their outcomes here as [`ErrorCode`]s.
//!
//! [`Prefs`]: update_prefs::Prefs

mod accounting;
mod persist;

pub mod clock;
pub mod errors;
pub mod keys;
pub mod metrics;
pub mod response;
pub mod source;
pub mod state;
pub mod system;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use errors::{ErrorCode, FaultClass};
pub use metrics::{LoggingMetricsSink, MetricsSink};
pub use response::UpdateResponse;
pub use source::DownloadSource;
pub use state::{PayloadState, Services};
pub use system::{BuildKind, RandomSource, RebootDetector, ThreadRngSource};
