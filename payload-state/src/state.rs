// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The payload state machine.
//!
//! [`PayloadState`] owns every durable fact about the in-progress update
//! attempt: which URL is current, how many times it has failed, how many
//! completed payload attempts lie behind us (and therefore how long to back
//! off), byte counters per download source, and the attempt's wall-clock and
//! uptime durations. Each field persists individually through [`Prefs`], so
//! a crash between writes loses at most one increment.
//!
//! Persisted state is never trusted on load: negative counters clamp to
//! zero, timestamps from the future reset to now, and a URL index that
//! doesn't fit the response it claims to belong to wipes the lot.

use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use slog::{Logger, error, info, o, warn};
use update_prefs::Prefs;

use crate::accounting::DownloadAccounting;
use crate::clock::Clock;
use crate::errors::{ErrorCode, FaultClass};
use crate::keys;
use crate::metrics::{MetricsReporter, MetricsSink};
use crate::persist;
use crate::response::UpdateResponse;
use crate::source::DownloadSource;
use crate::system::{BuildKind, RandomSource, RebootDetector};

/// Backoffs are bounded above at 16 days.
const MAX_BACKOFF_DAYS: u32 = 16;

/// The backoff shift is capped well inside the operand width so large
/// attempt numbers cannot overflow it.
const MAX_BACKOFF_SHIFT: u64 = 30;

/// Post-backoff retries are spread over +/- 6 hours so a fleet does not
/// hit the servers at the same instant.
const BACKOFF_FUZZ_MINUTES: i64 = 12 * 60;

const DURATION_SLACK_SECONDS: i64 = 600;

/// Tolerance for clock skew when validating persisted timestamps.
fn duration_slack() -> TimeDelta {
    TimeDelta::seconds(DURATION_SLACK_SECONDS)
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// The services [`PayloadState`] consumes, injected at construction.
pub struct Services {
    pub prefs: Arc<dyn Prefs>,
    pub clock: Box<dyn Clock>,
    pub random: Box<dyn RandomSource>,
    pub metrics: Box<dyn MetricsSink>,
    pub build: Box<dyn BuildKind>,
    pub reboot: Box<dyn RebootDetector>,
}

/// State machine tracking a single update attempt across process restarts
/// and reboots. See the crate docs for the big picture and the module docs
/// for the persistence posture.
pub struct PayloadState {
    log: Logger,
    prefs: Arc<dyn Prefs>,
    clock: Box<dyn Clock>,
    random: Box<dyn RandomSource>,
    build: Box<dyn BuildKind>,
    reboot: Box<dyn RebootDetector>,
    reporter: MetricsReporter,
    accounting: DownloadAccounting,

    /// The latest response the agent handed us. Empty until the first
    /// `set_response`, which gates all failure handling.
    response: UpdateResponse,
    response_signature: String,
    payload_attempt_number: u64,
    url_index: usize,
    url_failure_count: u64,
    url_switch_count: u64,
    backoff_expiry: Option<DateTime<Utc>>,
    update_timestamp_start: DateTime<Utc>,
    /// Set on success; `update_duration()` stops advancing once it is.
    update_timestamp_end: Option<DateTime<Utc>>,
    update_duration_uptime: Duration,
    /// Monotonic reading at the last uptime accumulation.
    uptime_anchor: Duration,
    num_reboots: u64,
    current_download_source: Option<DownloadSource>,
}

impl PayloadState {
    pub fn new(log: &Logger, services: Services) -> PayloadState {
        let log = log.new(o!("component" => "PayloadState"));
        let Services { prefs, clock, random, metrics, build, reboot } = services;
        let accounting = DownloadAccounting::new(&log, Arc::clone(&prefs));
        let reporter = MetricsReporter::new(&log, metrics);
        let update_timestamp_start = clock.wallclock_now();
        let uptime_anchor = clock.monotonic_now();
        PayloadState {
            log,
            prefs,
            clock,
            random,
            build,
            reboot,
            reporter,
            accounting,
            response: UpdateResponse::default(),
            response_signature: String::new(),
            payload_attempt_number: 0,
            url_index: 0,
            url_failure_count: 0,
            url_switch_count: 0,
            backoff_expiry: None,
            update_timestamp_start,
            update_timestamp_end: None,
            update_duration_uptime: Duration::ZERO,
            uptime_anchor,
            num_reboots: 0,
            current_download_source: None,
        }
    }

    /// Loads all persisted fields, repairing anything out of range.
    pub fn initialize(&mut self) {
        self.load_response_signature();
        self.load_payload_attempt_number();
        self.load_url_index();
        self.load_url_failure_count();
        self.load_url_switch_count();
        self.load_backoff_expiry();
        self.load_update_timestamp_start();
        // The uptime check compares against the wall-clock duration, so the
        // start timestamp must be loaded first. Don't reorder.
        self.load_update_duration_uptime();
        self.accounting.load();
        self.load_num_reboots();
    }

    /// Accepts the latest update-check response.
    ///
    /// A response whose fingerprint differs from the stored one is a new
    /// update: all attempt state resets. A matching fingerprint continues
    /// the in-progress attempt, which is also the first point at which the
    /// loaded URL index can be validated against a real URL list.
    pub fn set_response(&mut self, response: UpdateResponse) {
        // Always keep the latest response; URL lookups go through it.
        self.response = response;

        let new_signature = self.response.fingerprint();
        if self.response_signature != new_signature {
            info!(self.log, "resetting all persisted state for a new response");
            self.set_response_signature(new_signature);
            self.reset_persisted_state();
            return;
        }

        if self.url_index >= self.num_urls() {
            info!(
                self.log,
                "resetting payload state; the url index appears to have been \
                 tampered with";
                "url_index" => self.url_index,
                "num_urls" => self.num_urls(),
            );
            self.reset_persisted_state();
            return;
        }

        self.update_current_download_source();
    }

    /// Accounts a byte delta reported by the downloader.
    pub fn download_progress(&mut self, count: u64) {
        if count == 0 {
            return;
        }

        self.calculate_update_duration_uptime();
        self.accounting.add(self.current_download_source, count);

        // The failure count penalizes consecutive failures only. Any bytes
        // at all mean the URL is delivering again, so its slate is wiped.
        if self.url_failure_count == 0 {
            return;
        }
        info!(
            self.log, "resetting url failure count; bytes received";
            "url_index" => self.url_index,
            "bytes" => count,
        );
        self.set_url_failure_count(0);
    }

    /// One payload download finished (which is not yet update success).
    pub fn download_complete(&mut self) {
        info!(self.log, "payload downloaded successfully");
        self.increment_payload_attempt_number();
    }

    /// The agent is resuming an update it had already started before this
    /// process came up.
    pub fn update_resumed(&mut self) {
        info!(self.log, "resuming a previously started update");
        self.maybe_increment_reboot_count();
    }

    /// The agent is starting a fresh update attempt from the beginning.
    pub fn update_restarted(&mut self) {
        info!(self.log, "starting a new update");
        self.accounting.reset_current_on_new_update();
        self.set_num_reboots(0);
    }

    /// The update applied. Emits the terminal metrics and drains the
    /// per-update counters and timing keys.
    pub fn update_succeeded(&mut self) {
        self.calculate_update_duration_uptime();
        self.set_update_timestamp_end(Some(self.clock.wallclock_now()));

        self.reporter.report_bytes_downloaded(&mut self.accounting);
        self.reporter.report_url_switches(self.url_switch_count);
        self.reporter.report_num_reboots(self.num_reboots);
        self.set_num_reboots(0);
        self.reporter
            .report_durations(self.update_duration(), self.update_duration_uptime);

        // The timing keys describe an update that no longer exists.
        persist::delete(&self.log, &*self.prefs, keys::UPDATE_TIMESTAMP_START);
        persist::delete(&self.log, &*self.prefs, keys::UPDATE_DURATION_UPTIME);
    }

    /// Classifies a reported failure and applies its recovery action.
    pub fn update_failed(&mut self, error: ErrorCode) {
        let class = error.classify();
        info!(
            self.log, "updating payload state for failure";
            "error" => ?error,
            "class" => ?class,
        );

        if self.num_urls() == 0 {
            // An error this early predates any valid response; there is no
            // URL state to charge it against.
            info!(self.log, "ignoring failures until a valid response is seen");
            return;
        }

        match class {
            FaultClass::PayloadFault => self.increment_url_index(),
            FaultClass::TransientFault => self.increment_failure_count(),
            FaultClass::NonUrlFault => {
                info!(
                    self.log,
                    "not incrementing url index or failure count for this error"
                );
            }
            FaultClass::Sentinel => {
                warn!(
                    self.log, "unexpected error code reported as a failure";
                    "error" => ?error,
                );
            }
        }
    }

    /// Whether the next download should be deferred under backoff.
    pub fn should_backoff_download(&self) -> bool {
        if self.response.disable_backoff {
            info!(self.log, "backoff disabled by the response; can proceed");
            return false;
        }
        if self.response.is_delta {
            // A failed delta should fall back to the full payload quickly;
            // an exponential wait would stall exactly that path.
            info!(self.log, "no backoff for delta payloads; can proceed");
            return false;
        }
        if !self.build.is_official_build() {
            info!(self.log, "no backoff on unofficial builds; can proceed");
            return false;
        }
        let Some(expiry) = self.backoff_expiry else {
            info!(self.log, "no backoff expiry set; can proceed");
            return false;
        };
        if expiry < self.clock.wallclock_now() {
            info!(
                self.log, "backoff expiry has elapsed; can proceed";
                "expiry" => %expiry,
            );
            return false;
        }
        info!(self.log, "download deferred under backoff"; "until" => %expiry);
        true
    }

    pub fn payload_attempt_number(&self) -> u64 {
        self.payload_attempt_number
    }

    pub fn url_index(&self) -> usize {
        self.url_index
    }

    pub fn url_failure_count(&self) -> u64 {
        self.url_failure_count
    }

    pub fn url_switch_count(&self) -> u64 {
        self.url_switch_count
    }

    pub fn num_reboots(&self) -> u64 {
        self.num_reboots
    }

    pub fn backoff_expiry(&self) -> Option<DateTime<Utc>> {
        self.backoff_expiry
    }

    pub fn current_url(&self) -> Option<&str> {
        self.response.payload_urls.get(self.url_index).map(String::as_str)
    }

    pub fn current_download_source(&self) -> Option<DownloadSource> {
        self.current_download_source
    }

    pub fn current_bytes_downloaded(&self, source: DownloadSource) -> u64 {
        self.accounting.current(source)
    }

    pub fn total_bytes_downloaded(&self, source: DownloadSource) -> u64 {
        self.accounting.total(source)
    }

    /// Wall-clock time spent on this update, up to now or to the success
    /// timestamp once there is one.
    pub fn update_duration(&self) -> TimeDelta {
        let end =
            self.update_timestamp_end.unwrap_or_else(|| self.clock.wallclock_now());
        end - self.update_timestamp_start
    }

    /// Monotonic uptime spent on this update, as of the last accumulation.
    pub fn update_duration_uptime(&self) -> Duration {
        self.update_duration_uptime
    }

    fn num_urls(&self) -> usize {
        self.response.payload_urls.len()
    }

    /// Counts one completed payload attempt and re-arms backoff.
    ///
    /// Delta payloads are exempt: their failures should fall back to full
    /// payloads fast, not stall under exponential waits.
    fn increment_payload_attempt_number(&mut self) {
        if self.response.is_delta {
            info!(self.log, "not incrementing the attempt number for a delta payload");
            return;
        }
        info!(self.log, "incrementing the payload attempt number");
        self.set_payload_attempt_number(self.payload_attempt_number + 1);
        self.update_backoff_expiry();
    }

    /// Moves to the next URL, wrapping (and counting a completed attempt)
    /// past the end of the list.
    fn increment_url_index(&mut self) {
        let next = self.url_index + 1;
        if next < self.num_urls() {
            info!(self.log, "incrementing the url index"; "url_index" => next);
            self.set_url_index(next);
        } else {
            info!(
                self.log, "wrapping the url index back to the first url";
                "num_urls" => self.num_urls(),
            );
            self.set_url_index(0);
            self.increment_payload_attempt_number();
        }

        if self.num_urls() > 1 {
            self.set_url_switch_count(self.url_switch_count + 1);
        }

        // The new URL starts with a clean slate.
        self.set_url_failure_count(0);
    }

    fn increment_failure_count(&mut self) {
        let next = self.url_failure_count + 1;
        if next < u64::from(self.response.max_failures_per_url) {
            info!(self.log, "incrementing the url failure count"; "failures" => next);
            self.set_url_failure_count(next);
        } else {
            info!(
                self.log, "reached the failure cap for the current url";
                "url_index" => self.url_index,
            );
            self.increment_url_index();
        }
    }

    fn update_backoff_expiry(&mut self) {
        if self.response.disable_backoff {
            info!(self.log, "clearing the backoff expiry; backoff is disabled");
            self.set_backoff_expiry(None);
            return;
        }

        if self.payload_attempt_number == 0 {
            self.set_backoff_expiry(None);
            return;
        }

        // 2^(attempts - 1) days, capped at MAX_BACKOFF_DAYS. The shift is
        // capped separately to stay within the operand width.
        let power = min(self.payload_attempt_number - 1, MAX_BACKOFF_SHIFT);
        let days = min(1u64 << power, u64::from(MAX_BACKOFF_DAYS));
        let fuzz_minutes =
            self.random.uniform(-BACKOFF_FUZZ_MINUTES / 2, BACKOFF_FUZZ_MINUTES / 2);
        let interval = TimeDelta::days(days as i64) + TimeDelta::minutes(fuzz_minutes);
        info!(
            self.log, "arming backoff";
            "interval_minutes" => interval.num_minutes(),
        );
        self.set_backoff_expiry(Some(self.clock.wallclock_now() + interval));
    }

    fn update_current_download_source(&mut self) {
        self.current_download_source = self
            .response
            .payload_urls
            .get(self.url_index)
            .and_then(|url| DownloadSource::from_url(url));
        info!(
            self.log, "current download source";
            "source" => ?self.current_download_source,
        );
    }

    fn maybe_increment_reboot_count(&mut self) {
        if !self.reboot.system_just_rebooted() {
            return;
        }
        self.set_num_reboots(self.num_reboots + 1);
    }

    /// Wipes everything scoped to a single response. Total byte counters
    /// survive; they span the whole update across attempts.
    fn reset_persisted_state(&mut self) {
        self.set_payload_attempt_number(0);
        self.set_url_index(0);
        self.set_url_failure_count(0);
        self.set_url_switch_count(0);
        // With the attempt number back at zero this clears the expiry.
        self.update_backoff_expiry();
        self.set_update_timestamp_start(self.clock.wallclock_now());
        self.set_update_timestamp_end(None);
        let anchor = self.clock.monotonic_now();
        self.set_update_duration_uptime(Duration::ZERO, anchor, true);
        self.accounting.reset_current_on_new_update();
    }

    /// Folds uptime since the last accumulation into the persisted total.
    /// Runs on every progress event, so the persist is unlogged.
    fn calculate_update_duration_uptime(&mut self) {
        let now = self.clock.monotonic_now();
        let since_last = now.saturating_sub(self.uptime_anchor);
        let updated = self.update_duration_uptime + since_last;
        self.set_update_duration_uptime(updated, now, false);
    }

    fn load_response_signature(&mut self) {
        if let Some(signature) = self.prefs.get_string(keys::CURRENT_RESPONSE_SIGNATURE)
        {
            self.set_response_signature(signature);
        }
    }

    fn set_response_signature(&mut self, signature: String) {
        info!(self.log, "current response signature"; "signature" => %signature);
        persist::write_string(
            &self.log,
            &*self.prefs,
            keys::CURRENT_RESPONSE_SIGNATURE,
            &signature,
        );
        self.response_signature = signature;
    }

    fn load_payload_attempt_number(&mut self) {
        let value =
            persist::read_counter(&self.log, &*self.prefs, keys::PAYLOAD_ATTEMPT_NUMBER);
        self.set_payload_attempt_number(value);
    }

    fn set_payload_attempt_number(&mut self, value: u64) {
        self.payload_attempt_number = value;
        info!(self.log, "payload attempt number"; "attempt" => value);
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::PAYLOAD_ATTEMPT_NUMBER,
            persist::clamp_to_i64(value),
        );
    }

    fn load_url_index(&mut self) {
        let value =
            persist::read_counter(&self.log, &*self.prefs, keys::CURRENT_URL_INDEX);
        self.set_url_index(value.try_into().unwrap_or(usize::MAX));
    }

    fn set_url_index(&mut self, value: usize) {
        self.url_index = value;
        info!(self.log, "current url index"; "url_index" => value);
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::CURRENT_URL_INDEX,
            persist::clamp_to_i64(value as u64),
        );
        // The download source depends only on the current URL.
        self.update_current_download_source();
    }

    fn load_url_failure_count(&mut self) {
        let value = persist::read_counter(
            &self.log,
            &*self.prefs,
            keys::CURRENT_URL_FAILURE_COUNT,
        );
        self.set_url_failure_count(value);
    }

    fn set_url_failure_count(&mut self, value: u64) {
        self.url_failure_count = value;
        info!(
            self.log, "url failure count";
            "url_index" => self.url_index,
            "failures" => value,
        );
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::CURRENT_URL_FAILURE_COUNT,
            persist::clamp_to_i64(value),
        );
    }

    fn load_url_switch_count(&mut self) {
        let value =
            persist::read_counter(&self.log, &*self.prefs, keys::URL_SWITCH_COUNT);
        self.set_url_switch_count(value);
    }

    fn set_url_switch_count(&mut self, value: u64) {
        self.url_switch_count = value;
        info!(self.log, "url switch count"; "switches" => value);
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::URL_SWITCH_COUNT,
            persist::clamp_to_i64(value),
        );
    }

    fn load_num_reboots(&mut self) {
        let value = persist::read_counter(&self.log, &*self.prefs, keys::NUM_REBOOTS);
        self.set_num_reboots(value);
    }

    fn set_num_reboots(&mut self, value: u64) {
        self.num_reboots = value;
        info!(self.log, "reboots during the current update"; "reboots" => value);
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::NUM_REBOOTS,
            persist::clamp_to_i64(value),
        );
    }

    fn load_backoff_expiry(&mut self) {
        if !self.prefs.exists(keys::BACKOFF_EXPIRY_TIME) {
            return;
        }
        let Some(stored) = self.prefs.get_i64(keys::BACKOFF_EXPIRY_TIME) else {
            return;
        };

        let expiry = if stored == 0 {
            None
        } else {
            match DateTime::from_timestamp_micros(stored) {
                Some(t) => Some(t),
                None => {
                    error!(
                        self.log,
                        "unrepresentable backoff expiry in persisted state; resetting";
                        "value" => stored,
                    );
                    None
                }
            }
        };

        // An expiry further out than the longest backoff we ever arm means
        // the value (or the clock that wrote it) was bad.
        let horizon =
            self.clock.wallclock_now() + TimeDelta::days(i64::from(MAX_BACKOFF_DAYS));
        let expiry = match expiry {
            Some(t) if t > horizon => {
                error!(
                    self.log,
                    "backoff expiry in persisted state is too far out; resetting";
                    "expiry" => %t,
                );
                None
            }
            other => other,
        };
        self.set_backoff_expiry(expiry);
    }

    fn set_backoff_expiry(&mut self, expiry: Option<DateTime<Utc>>) {
        self.backoff_expiry = expiry;
        info!(self.log, "backoff expiry time"; "expiry" => ?expiry);
        let stored = expiry.map_or(0, |t| t.timestamp_micros());
        persist::write_i64(&self.log, &*self.prefs, keys::BACKOFF_EXPIRY_TIME, stored);
    }

    fn load_update_timestamp_start(&mut self) {
        let now = self.clock.wallclock_now();

        let stored = if !self.prefs.exists(keys::UPDATE_TIMESTAMP_START) {
            // Missing is normal on a first run; the update starts now.
            now
        } else {
            match self
                .prefs
                .get_i64(keys::UPDATE_TIMESTAMP_START)
                .and_then(DateTime::from_timestamp_micros)
            {
                Some(t) => t,
                None => {
                    error!(
                        self.log,
                        "invalid update start timestamp in persisted state; resetting"
                    );
                    now
                }
            }
        };

        // A start time in the future (beyond NTP-drift slack) means the
        // clock has gone backwards since it was written.
        let stored = if stored > now + duration_slack() {
            error!(
                self.log,
                "persisted update start timestamp is in the future; resetting";
                "stored" => %stored,
            );
            now
        } else {
            stored
        };

        self.set_update_timestamp_start(stored);
    }

    fn set_update_timestamp_start(&mut self, value: DateTime<Utc>) {
        self.update_timestamp_start = value;
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::UPDATE_TIMESTAMP_START,
            value.timestamp_micros(),
        );
        info!(self.log, "update timestamp start"; "start" => %value);
    }

    fn set_update_timestamp_end(&mut self, value: Option<DateTime<Utc>>) {
        self.update_timestamp_end = value;
        info!(self.log, "update timestamp end"; "end" => ?value);
    }

    fn load_update_duration_uptime(&mut self) {
        let stored = if !self.prefs.exists(keys::UPDATE_DURATION_UPTIME) {
            Duration::ZERO
        } else {
            match self.prefs.get_i64(keys::UPDATE_DURATION_UPTIME) {
                Some(v) if v >= 0 => Duration::from_micros(v as u64),
                Some(v) => {
                    error!(
                        self.log,
                        "negative uptime duration in persisted state; resetting";
                        "value" => v,
                    );
                    Duration::ZERO
                }
                None => {
                    error!(
                        self.log,
                        "invalid uptime duration in persisted state; resetting"
                    );
                    Duration::ZERO
                }
            }
        };

        // Uptime spent on the update can never exceed the wall-clock span
        // (modulo slack). If it does, a previous boot's monotonic clock has
        // leaked in; fall back to the wall-clock duration.
        let wallclock = self.update_duration();
        let stored = if to_delta(stored) > wallclock + duration_slack() {
            error!(
                self.log,
                "persisted uptime duration exceeds the wall-clock duration; \
                 resetting";
                "uptime_seconds" => stored.as_secs(),
                "wallclock_seconds" => wallclock.num_seconds(),
            );
            wallclock.to_std().unwrap_or(Duration::ZERO)
        } else {
            stored
        };

        let anchor = self.clock.monotonic_now();
        self.set_update_duration_uptime(stored, anchor, true);
    }

    fn set_update_duration_uptime(
        &mut self,
        value: Duration,
        anchor: Duration,
        log_it: bool,
    ) {
        self.update_duration_uptime = value;
        self.uptime_anchor = anchor;
        persist::write_i64(
            &self.log,
            &*self.prefs,
            keys::UPDATE_DURATION_UPTIME,
            duration_micros(value),
        );
        if log_it {
            info!(
                self.log, "update duration uptime";
                "seconds" => value.as_secs(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        CapturingSink, FakeBuild, FakeClock, FakeRebootDetector, FixedRandom,
        test_logger,
    };
    use update_prefs::MemPrefs;

    struct Fixture {
        state: PayloadState,
        clock: FakeClock,
        prefs: Arc<MemPrefs>,
        reboot: FakeRebootDetector,
    }

    fn fixture_with(official: bool, fuzz_minutes: i64) -> Fixture {
        let prefs = Arc::new(MemPrefs::new());
        let clock =
            FakeClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let reboot = FakeRebootDetector::new();
        let services = Services {
            prefs: Arc::clone(&prefs) as Arc<dyn Prefs>,
            clock: Box::new(clock.clone()),
            random: Box::new(FixedRandom(fuzz_minutes)),
            metrics: Box::new(CapturingSink::new()),
            build: Box::new(FakeBuild { official }),
            reboot: Box::new(reboot.clone()),
        };
        let mut state = PayloadState::new(&test_logger(), services);
        state.initialize();
        Fixture { state, clock, prefs, reboot }
    }

    fn fixture() -> Fixture {
        fixture_with(true, 0)
    }

    fn response(urls: &[&str]) -> UpdateResponse {
        UpdateResponse {
            payload_urls: urls.iter().map(|u| u.to_string()).collect(),
            payload_size: 1000,
            payload_hash: "abc".to_string(),
            metadata_size: 10,
            metadata_signature: "sig".to_string(),
            is_delta: false,
            max_failures_per_url: 3,
            disable_backoff: false,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));

        for expected_days in [1, 2, 4, 8, 16, 16, 16] {
            f.state.download_complete();
            let expected =
                f.clock.wallclock_now() + TimeDelta::days(expected_days);
            assert_eq!(f.state.backoff_expiry(), Some(expected));
        }
    }

    #[test]
    fn backoff_fuzz_shifts_the_expiry() {
        for (fuzz, offset_minutes) in [(360, 360), (-360, -360), (720, 360)] {
            let mut f = fixture_with(true, fuzz);
            f.state.set_response(response(&["https://a"]));
            f.state.download_complete();
            let expected = f.clock.wallclock_now()
                + TimeDelta::days(1)
                + TimeDelta::minutes(offset_minutes);
            assert_eq!(f.state.backoff_expiry(), Some(expected), "fuzz {fuzz}");
        }
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        for _ in 0..1000 {
            f.state.download_complete();
        }
        assert_eq!(f.state.payload_attempt_number(), 1000);
        let expected = f.clock.wallclock_now() + TimeDelta::days(16);
        assert_eq!(f.state.backoff_expiry(), Some(expected));
    }

    #[test]
    fn should_backoff_requires_an_armed_official_full_payload() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        assert!(!f.state.should_backoff_download(), "nothing armed yet");

        f.state.download_complete();
        assert!(f.state.should_backoff_download());

        // Once the expiry passes, downloads may proceed again.
        f.clock.advance(Duration::from_secs(2 * 24 * 3600));
        assert!(!f.state.should_backoff_download());
    }

    #[test]
    fn no_backoff_when_response_disables_it() {
        let mut f = fixture();
        let mut r = response(&["https://a"]);
        r.disable_backoff = true;
        f.state.set_response(r);
        f.state.download_complete();
        assert_eq!(f.state.backoff_expiry(), None);
        assert!(!f.state.should_backoff_download());
    }

    #[test]
    fn no_backoff_on_unofficial_builds() {
        let mut f = fixture_with(false, 0);
        f.state.set_response(response(&["https://a"]));
        f.state.download_complete();
        // The expiry is still armed; the build gate just ignores it.
        assert!(f.state.backoff_expiry().is_some());
        assert!(!f.state.should_backoff_download());
    }

    #[test]
    fn delta_payloads_never_arm_backoff() {
        let mut f = fixture();
        let mut r = response(&["https://a"]);
        r.is_delta = true;
        f.state.set_response(r);
        f.state.download_complete();
        f.state.download_complete();
        assert_eq!(f.state.payload_attempt_number(), 0);
        assert_eq!(f.state.backoff_expiry(), None);
        assert!(!f.state.should_backoff_download());
    }

    #[test]
    fn reset_twice_is_idempotent() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a", "http://b"]));
        f.state.update_failed(ErrorCode::DownloadTransfer);
        f.state.update_failed(ErrorCode::PayloadHashMismatch);
        f.state.download_complete();

        let snapshot = |state: &PayloadState, prefs: &MemPrefs| {
            (
                state.payload_attempt_number(),
                state.url_index(),
                state.url_failure_count(),
                state.url_switch_count(),
                state.backoff_expiry(),
                state.update_duration_uptime(),
                prefs.get_i64(keys::PAYLOAD_ATTEMPT_NUMBER),
                prefs.get_i64(keys::CURRENT_URL_INDEX),
                prefs.get_i64(keys::BACKOFF_EXPIRY_TIME),
                prefs.get_i64(keys::UPDATE_TIMESTAMP_START),
            )
        };

        f.state.reset_persisted_state();
        let first = snapshot(&f.state, &f.prefs);
        f.state.reset_persisted_state();
        let second = snapshot(&f.state, &f.prefs);
        assert_eq!(first, second);
        assert_eq!(f.state.payload_attempt_number(), 0);
        assert_eq!(f.state.backoff_expiry(), None);
    }

    #[test]
    fn failures_before_any_response_are_ignored() {
        let mut f = fixture();
        f.state.update_failed(ErrorCode::PayloadHashMismatch);
        f.state.update_failed(ErrorCode::DownloadTransfer);
        assert_eq!(f.state.url_index(), 0);
        assert_eq!(f.state.url_failure_count(), 0);
        assert_eq!(f.state.url_switch_count(), 0);
    }

    #[test]
    fn non_url_faults_leave_url_state_alone() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a", "http://b"]));
        f.state.update_failed(ErrorCode::PostinstallRunner);
        f.state.update_failed(ErrorCode::OmahaUpdateDeferredPerPolicy);
        f.state.update_failed(ErrorCode::Success);
        assert_eq!(f.state.url_index(), 0);
        assert_eq!(f.state.url_failure_count(), 0);
    }

    #[test]
    fn bytes_revive_a_failing_url() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        f.state.update_failed(ErrorCode::DownloadTransfer);
        assert_eq!(f.state.url_failure_count(), 1);

        f.state.download_progress(1);
        assert_eq!(f.state.url_failure_count(), 0);
    }

    #[test]
    fn zero_byte_progress_is_a_no_op() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        f.state.update_failed(ErrorCode::DownloadTransfer);
        f.clock.advance(Duration::from_secs(30));
        f.state.download_progress(0);
        assert_eq!(f.state.url_failure_count(), 1);
        assert_eq!(f.state.update_duration_uptime(), Duration::ZERO);
    }

    #[test]
    fn uptime_accumulates_on_progress() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        f.clock.advance(Duration::from_secs(40));
        f.state.download_progress(100);
        f.clock.advance(Duration::from_secs(20));
        f.state.download_progress(100);
        assert_eq!(f.state.update_duration_uptime(), Duration::from_secs(60));
        assert_eq!(
            f.state.current_bytes_downloaded(DownloadSource::HttpsServer),
            200
        );
    }

    #[test]
    fn reboots_count_once_per_boot() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));

        f.reboot.arm();
        f.state.update_resumed();
        assert_eq!(f.state.num_reboots(), 1);

        // Same boot: resuming again must not double-count.
        f.state.update_resumed();
        assert_eq!(f.state.num_reboots(), 1);

        f.reboot.arm();
        f.state.update_resumed();
        assert_eq!(f.state.num_reboots(), 2);
    }

    #[test]
    fn restart_clears_current_bytes_and_reboots_only() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        f.state.download_progress(5000);
        f.reboot.arm();
        f.state.update_resumed();

        f.state.update_restarted();
        assert_eq!(
            f.state.current_bytes_downloaded(DownloadSource::HttpsServer),
            0
        );
        assert_eq!(
            f.state.total_bytes_downloaded(DownloadSource::HttpsServer),
            5000
        );
        assert_eq!(f.state.num_reboots(), 0);
    }

    #[test]
    fn bytes_on_unrecognized_schemes_are_unattributed() {
        let mut f = fixture();
        f.state.set_response(response(&["ftp://weird.example.com/p"]));
        assert_eq!(f.state.current_download_source(), None);
        f.state.download_progress(4096);
        for source in DownloadSource::ALL {
            assert_eq!(f.state.current_bytes_downloaded(source), 0);
            assert_eq!(f.state.total_bytes_downloaded(source), 0);
        }
    }

    #[test]
    fn stale_backoff_expiry_is_rejected_on_load() {
        let f = fixture();
        let way_out = f.clock.wallclock_now() + TimeDelta::days(400);
        f.prefs
            .set_i64(keys::BACKOFF_EXPIRY_TIME, way_out.timestamp_micros())
            .unwrap();

        let mut restarted = fixture_reusing(&f);
        restarted.state.initialize();
        assert_eq!(restarted.state.backoff_expiry(), None);
    }

    #[test]
    fn persisted_backoff_expiry_survives_a_restart() {
        let mut f = fixture();
        f.state.set_response(response(&["https://a"]));
        f.state.download_complete();
        let expiry = f.state.backoff_expiry().unwrap();

        let mut restarted = fixture_reusing(&f);
        restarted.state.initialize();
        assert_eq!(restarted.state.backoff_expiry(), Some(expiry));
    }

    /// A fresh `PayloadState` over the same prefs and clock, as a process
    /// restart would produce.
    fn fixture_reusing(f: &Fixture) -> Fixture {
        let services = Services {
            prefs: Arc::clone(&f.prefs) as Arc<dyn Prefs>,
            clock: Box::new(f.clock.clone()),
            random: Box::new(FixedRandom(0)),
            metrics: Box::new(CapturingSink::new()),
            build: Box::new(FakeBuild { official: true }),
            reboot: Box::new(f.reboot.clone()),
        };
        Fixture {
            state: PayloadState::new(&test_logger(), services),
            clock: f.clock.clone(),
            prefs: Arc::clone(&f.prefs),
            reboot: f.reboot.clone(),
        }
    }
}
