// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform facts the state machine consumes but does not own.

use rand::Rng;

/// Whether this image is a production build.
///
/// Backoff is only armed on official builds; developer and test images
/// should never have an update stalled under a multi-day timer.
pub trait BuildKind: Send + Sync {
    fn is_official_build(&self) -> bool;
}

/// Reports whether the system has rebooted since the update attempt last
/// ran.
///
/// The contract is single-shot: within one boot, at most one call returns
/// `true`. Implementations typically compare a persisted boot ID against
/// the running kernel's and latch the answer.
pub trait RebootDetector: Send + Sync {
    fn system_just_rebooted(&self) -> bool;
}

/// Source of the backoff fuzz, injected so tests can pin it.
pub trait RandomSource: Send + Sync {
    /// Uniformly random value in `[lo, hi]`, both ends inclusive.
    fn uniform(&self, lo: i64, hi: i64) -> i64;
}

/// [`RandomSource`] backed by the thread-local generator.
#[derive(Debug, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn uniform(&self, lo: i64, hi: i64) -> i64 {
        rand::rng().random_range(lo..=hi)
    }
}
