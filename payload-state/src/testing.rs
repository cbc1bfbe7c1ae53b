// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test doubles for the collaborator traits.
//!
//! Everything here clones cheaply and shares state through an inner `Arc`,
//! so a test can keep a handle while the state machine owns the boxed
//! trait object.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use slog::{Discard, Logger, o};

use crate::clock::Clock;
use crate::metrics::MetricsSink;
use crate::system::{BuildKind, RandomSource, RebootDetector};

pub fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

#[derive(Debug)]
struct Hands {
    wall: DateTime<Utc>,
    mono: Duration,
}

/// A clock whose hands only move when told to.
#[derive(Clone, Debug)]
pub struct FakeClock {
    inner: Arc<Mutex<Hands>>,
}

impl FakeClock {
    pub fn new(wall: DateTime<Utc>) -> FakeClock {
        FakeClock { inner: Arc::new(Mutex::new(Hands { wall, mono: Duration::ZERO })) }
    }

    /// Advances both hands together, as real time passing would.
    pub fn advance(&self, delta: Duration) {
        let mut hands = self.inner.lock().unwrap();
        hands.wall += TimeDelta::from_std(delta).unwrap();
        hands.mono += delta;
    }

    /// Moves only the wall clock, like an NTP step.
    pub fn step_wallclock(&self, delta: TimeDelta) {
        self.inner.lock().unwrap().wall += delta;
    }

    pub fn set_wallclock(&self, wall: DateTime<Utc>) {
        self.inner.lock().unwrap().wall = wall;
    }
}

impl Clock for FakeClock {
    fn wallclock_now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().wall
    }

    fn monotonic_now(&self) -> Duration {
        self.inner.lock().unwrap().mono
    }
}

/// Returns its fixed value, clamped into the requested range.
#[derive(Clone, Copy, Debug)]
pub struct FixedRandom(pub i64);

impl RandomSource for FixedRandom {
    fn uniform(&self, lo: i64, hi: i64) -> i64 {
        self.0.clamp(lo, hi)
    }
}

/// One captured histogram sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UmaSample {
    pub name: String,
    pub sample: i64,
    pub min: i64,
    pub max: i64,
    pub buckets: u32,
}

/// A [`MetricsSink`] that records every sample for later inspection.
#[derive(Clone, Debug, Default)]
pub struct CapturingSink {
    samples: Arc<Mutex<Vec<UmaSample>>>,
}

impl CapturingSink {
    pub fn new() -> CapturingSink {
        CapturingSink::default()
    }

    pub fn samples(&self) -> Vec<UmaSample> {
        self.samples.lock().unwrap().clone()
    }

    /// The most recent sample with the given name.
    pub fn find(&self, name: &str) -> Option<UmaSample> {
        self.samples.lock().unwrap().iter().rev().find(|s| s.name == name).cloned()
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }
}

impl MetricsSink for CapturingSink {
    fn send_to_uma(&self, name: &str, sample: i64, min: i64, max: i64, buckets: u32) {
        self.samples.lock().unwrap().push(UmaSample {
            name: name.to_string(),
            sample,
            min,
            max,
            buckets,
        });
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FakeBuild {
    pub official: bool,
}

impl BuildKind for FakeBuild {
    fn is_official_build(&self) -> bool {
        self.official
    }
}

/// Single-shot reboot signal: `arm()` makes the next query (and only that
/// one) report a reboot.
#[derive(Clone, Debug, Default)]
pub struct FakeRebootDetector {
    pending: Arc<Mutex<bool>>,
}

impl FakeRebootDetector {
    pub fn new() -> FakeRebootDetector {
        FakeRebootDetector::default()
    }

    pub fn arm(&self) {
        *self.pending.lock().unwrap() = true;
    }
}

impl RebootDetector for FakeRebootDetector {
    fn system_just_rebooted(&self) -> bool {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }
}
