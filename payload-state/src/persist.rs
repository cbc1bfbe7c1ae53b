// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Small helpers over [`Prefs`] with this crate's error policy baked in:
//! reads degrade to defaults, writes are logged on failure and never
//! propagate (the state machine cannot usefully recover from a failed
//! persist, and one lost increment costs at most one extra retry).

use slog::{Logger, error};
use update_prefs::Prefs;

/// Reads a non-negative counter. Absent and unparseable values are 0;
/// negative values are clamped to 0 with a logged error, since nothing in
/// this crate ever writes one.
pub(crate) fn read_counter(log: &Logger, prefs: &dyn Prefs, key: &str) -> u64 {
    let Some(value) = prefs.get_i64(key) else {
        return 0;
    };
    if value < 0 {
        error!(
            log, "invalid value in persisted state; defaulting to 0";
            "key" => key,
            "value" => value,
        );
        return 0;
    }
    value as u64
}

pub(crate) fn write_i64(log: &Logger, prefs: &dyn Prefs, key: &str, value: i64) {
    if let Err(err) = prefs.set_i64(key, value) {
        error!(log, "failed to persist preference"; "key" => key, "err" => %err);
    }
}

pub(crate) fn write_string(log: &Logger, prefs: &dyn Prefs, key: &str, value: &str) {
    if let Err(err) = prefs.set_string(key, value) {
        error!(log, "failed to persist preference"; "key" => key, "err" => %err);
    }
}

pub(crate) fn delete(log: &Logger, prefs: &dyn Prefs, key: &str) {
    if let Err(err) = prefs.delete(key) {
        error!(log, "failed to delete preference"; "key" => key, "err" => %err);
    }
}

/// Counters are held as `u64` in memory but stored as `i64`; a counter large
/// enough to clip has long since stopped meaning anything, so saturate.
pub(crate) fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
