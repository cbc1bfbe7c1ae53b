// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Metric emission on update success.
//!
//! The agent reports a fixed set of named, bucketed histogram samples when
//! an update finally applies: how many megabytes moved per transport, how
//! much of that was overhead, how many URL switches and reboots the attempt
//! survived, and how long it all took. [`MetricsSink`] is the transport
//! boundary; emission is fire-and-forget and a lost sample is never an
//! error.

use std::time::Duration;

use chrono::TimeDelta;
use slog::{Logger, info, o};

use crate::accounting::DownloadAccounting;
use crate::persist::clamp_to_i64;
use crate::source::DownloadSource;

pub const SUCCESSFUL_MBS_PREFIX: &str = "Installer.SuccessfulMBsDownloadedFrom";
pub const TOTAL_MBS_PREFIX: &str = "Installer.TotalMBsDownloadedFrom";
pub const DOWNLOAD_SOURCES_USED: &str = "Installer.DownloadSourcesUsed";
pub const DOWNLOAD_OVERHEAD_PERCENTAGE: &str = "Installer.DownloadOverheadPercentage";
pub const UPDATE_URL_SWITCHES: &str = "Installer.UpdateURLSwitches";
pub const UPDATE_NUM_REBOOTS: &str = "Installer.UpdateNumReboots";
pub const UPDATE_DURATION_MINUTES: &str = "Installer.UpdateDurationMinutes";
pub const UPDATE_DURATION_UPTIME_MINUTES: &str = "Installer.UpdateDurationUptimeMinutes";

/// Default bucket count for exponential histograms.
pub const NUM_DEFAULT_BUCKETS: u32 = 50;

/// Byte counters are reported in MiB so the sample range stays useful;
/// anything above 10 GiB lands in the last bucket.
const MAX_MBS: i64 = 10240;

const MIB: u64 = 1 << 20;

/// Destination for histogram samples.
///
/// Implementations hand the sample to whatever telemetry system the platform
/// uses. Failures are the implementation's problem; callers never find out.
pub trait MetricsSink: Send + Sync {
    fn send_to_uma(&self, name: &str, sample: i64, min: i64, max: i64, buckets: u32);
}

/// A [`MetricsSink`] that just logs each sample. Useful on developer images
/// where no telemetry uploader runs.
pub struct LoggingMetricsSink {
    log: Logger,
}

impl LoggingMetricsSink {
    pub fn new(log: &Logger) -> LoggingMetricsSink {
        LoggingMetricsSink { log: log.new(o!("component" => "LoggingMetricsSink")) }
    }
}

impl MetricsSink for LoggingMetricsSink {
    fn send_to_uma(&self, name: &str, sample: i64, min: i64, max: i64, buckets: u32) {
        info!(
            self.log, "metric sample";
            "metric" => name,
            "sample" => sample,
            "min" => min,
            "max" => max,
            "buckets" => buckets,
        );
    }
}

/// Builds and emits the terminal metrics set.
pub(crate) struct MetricsReporter {
    log: Logger,
    sink: Box<dyn MetricsSink>,
}

impl MetricsReporter {
    pub fn new(log: &Logger, sink: Box<dyn MetricsSink>) -> MetricsReporter {
        MetricsReporter { log: log.clone(), sink }
    }

    /// Reports the per-source byte counters, the sources-used bitmask, and
    /// the overhead percentage, zeroing each counter as it is consumed.
    pub fn report_bytes_downloaded(&self, accounting: &mut DownloadAccounting) {
        let mut sources_used: i64 = 0;
        let mut successful_mbs: i64 = 0;
        let mut total_mbs: i64 = 0;

        for source in DownloadSource::ALL {
            let name = format!("{SUCCESSFUL_MBS_PREFIX}{source}");
            let mbs = (accounting.current(source) / MIB) as i64;
            // A source was "used" if it contributed whole MiBs to the
            // payload that finally applied.
            if mbs > 0 {
                sources_used |= source.bit();
            }
            successful_mbs += mbs;
            info!(self.log, "uploading metric"; "metric" => %name, "mbs" => mbs);
            self.sink.send_to_uma(&name, mbs, 0, MAX_MBS, NUM_DEFAULT_BUCKETS);
            accounting.set_current(source, 0, true);

            let name = format!("{TOTAL_MBS_PREFIX}{source}");
            let mbs = (accounting.total(source) / MIB) as i64;
            total_mbs += mbs;
            info!(self.log, "uploading metric"; "metric" => %name, "mbs" => mbs);
            self.sink.send_to_uma(&name, mbs, 0, MAX_MBS, NUM_DEFAULT_BUCKETS);
            accounting.set_total(source, 0, true);
        }

        let num_sources = DownloadSource::ALL.len() as u32;
        let max_mask = 1i64 << num_sources;
        info!(
            self.log, "uploading metric";
            "metric" => DOWNLOAD_SOURCES_USED,
            "mask" => format!("{sources_used:#x}"),
        );
        self.sink.send_to_uma(
            DOWNLOAD_SOURCES_USED,
            sources_used,
            0,
            max_mask,
            (max_mask as u32).min(NUM_DEFAULT_BUCKETS),
        );

        if successful_mbs > 0 {
            let overhead = (total_mbs - successful_mbs) * 100 / successful_mbs;
            info!(
                self.log, "uploading metric";
                "metric" => DOWNLOAD_OVERHEAD_PERCENTAGE,
                "percent" => overhead,
            );
            self.sink.send_to_uma(
                DOWNLOAD_OVERHEAD_PERCENTAGE,
                overhead,
                0,
                1000,
                NUM_DEFAULT_BUCKETS,
            );
        }
    }

    pub fn report_url_switches(&self, count: u64) {
        let sample = clamp_to_i64(count);
        info!(self.log, "uploading metric"; "metric" => UPDATE_URL_SWITCHES, "count" => sample);
        self.sink.send_to_uma(UPDATE_URL_SWITCHES, sample, 0, 100, NUM_DEFAULT_BUCKETS);
    }

    pub fn report_num_reboots(&self, count: u64) {
        let sample = clamp_to_i64(count);
        info!(self.log, "uploading metric"; "metric" => UPDATE_NUM_REBOOTS, "count" => sample);
        self.sink.send_to_uma(UPDATE_NUM_REBOOTS, sample, 0, 50, 25);
    }

    pub fn report_durations(&self, duration: TimeDelta, duration_uptime: Duration) {
        let minutes = duration.num_minutes();
        info!(
            self.log, "uploading metric";
            "metric" => UPDATE_DURATION_MINUTES,
            "minutes" => minutes,
        );
        // Max is a year of minutes; month of minutes for uptime.
        self.sink.send_to_uma(
            UPDATE_DURATION_MINUTES,
            minutes,
            1,
            365 * 24 * 60,
            NUM_DEFAULT_BUCKETS,
        );

        let uptime_minutes = clamp_to_i64(duration_uptime.as_secs() / 60);
        info!(
            self.log, "uploading metric";
            "metric" => UPDATE_DURATION_UPTIME_MINUTES,
            "minutes" => uptime_minutes,
        );
        self.sink.send_to_uma(
            UPDATE_DURATION_UPTIME_MINUTES,
            uptime_minutes,
            1,
            30 * 24 * 60,
            NUM_DEFAULT_BUCKETS,
        );
    }
}
