// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared harness for the integration tests: a [`PayloadState`] wired to
//! fakes, with handles kept so tests can drive the clock, seed the store,
//! and inspect emitted metrics.

use std::sync::Arc;

use chrono::DateTime;
use payload_state::testing::{
    CapturingSink, FakeBuild, FakeClock, FakeRebootDetector, FixedRandom,
    test_logger,
};
use payload_state::{PayloadState, Services, UpdateResponse};
use update_prefs::{MemPrefs, Prefs};

pub struct Harness {
    pub state: PayloadState,
    pub clock: FakeClock,
    pub prefs: Arc<MemPrefs>,
    pub sink: CapturingSink,
    pub reboot: FakeRebootDetector,
}

/// A freshly initialized state machine on an official build with the
/// backoff fuzz pinned to zero.
pub fn harness() -> Harness {
    let prefs = Arc::new(MemPrefs::new());
    let clock = FakeClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
    let sink = CapturingSink::new();
    let reboot = FakeRebootDetector::new();
    let mut harness = assemble(prefs, clock, sink, reboot);
    harness.state.initialize();
    harness
}

/// Simulates a process restart: a brand-new `PayloadState` over the same
/// store, clock, and reboot detector, freshly initialized.
pub fn restart(harness: &Harness) -> Harness {
    let mut restarted = assemble(
        Arc::clone(&harness.prefs),
        harness.clock.clone(),
        CapturingSink::new(),
        harness.reboot.clone(),
    );
    restarted.state.initialize();
    restarted
}

fn assemble(
    prefs: Arc<MemPrefs>,
    clock: FakeClock,
    sink: CapturingSink,
    reboot: FakeRebootDetector,
) -> Harness {
    let services = Services {
        prefs: Arc::clone(&prefs) as Arc<dyn Prefs>,
        clock: Box::new(clock.clone()),
        random: Box::new(FixedRandom(0)),
        metrics: Box::new(sink.clone()),
        build: Box::new(FakeBuild { official: true }),
        reboot: Box::new(reboot.clone()),
    };
    let state = PayloadState::new(&test_logger(), services);
    Harness { state, clock, prefs, sink, reboot }
}

pub fn response(urls: &[&str], max_failures_per_url: u32) -> UpdateResponse {
    UpdateResponse {
        payload_urls: urls.iter().map(|u| u.to_string()).collect(),
        payload_size: 523_456_789,
        payload_hash: "3d49f49db6b2a09c1e4e0e2a1f3e5b70".to_string(),
        metadata_size: 58_123,
        metadata_signature: "c2lnbmF0dXJl".to_string(),
        is_delta: false,
        max_failures_per_url,
        disable_backoff: false,
    }
}
