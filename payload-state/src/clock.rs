// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The two clocks the state machine reads.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Wall-clock and monotonic time, injected so tests can drive both hands.
///
/// The wall clock may jump (NTP sync, manual changes); persisted instants
/// derived from it are therefore validated on load rather than trusted. The
/// monotonic clock never jumps, but neither clock advances during deep
/// suspend, and the monotonic origin is arbitrary and per-boot.
pub trait Clock: Send + Sync {
    fn wallclock_now(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> Duration;
}

/// The real thing: `Utc::now()` plus an [`Instant`] origin captured at
/// construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> SystemClock {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn wallclock_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Duration {
        self.origin.elapsed()
    }
}
