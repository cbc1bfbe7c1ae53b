// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-source byte counters for the in-progress update.
//!
//! Two counters per download source: `current` holds bytes that went toward
//! the payload currently being applied, `total` holds every byte transferred
//! for this update including wasted attempts. `current` resets when a new
//! payload attempt starts; `total` survives until the update succeeds, so
//! the pair measures download overhead.

use std::collections::BTreeMap;
use std::sync::Arc;

use slog::{Logger, info};
use update_prefs::Prefs;

use crate::keys;
use crate::persist;
use crate::source::DownloadSource;

pub(crate) struct DownloadAccounting {
    log: Logger,
    prefs: Arc<dyn Prefs>,
    current: BTreeMap<DownloadSource, u64>,
    total: BTreeMap<DownloadSource, u64>,
}

impl DownloadAccounting {
    pub fn new(log: &Logger, prefs: Arc<dyn Prefs>) -> DownloadAccounting {
        let zeroed: BTreeMap<_, _> =
            DownloadSource::ALL.iter().map(|&s| (s, 0)).collect();
        DownloadAccounting {
            log: log.clone(),
            prefs,
            current: zeroed.clone(),
            total: zeroed,
        }
    }

    pub fn load(&mut self) {
        for source in DownloadSource::ALL {
            let key =
                keys::bytes_downloaded_key(keys::CURRENT_BYTES_DOWNLOADED_PREFIX, source);
            let value = persist::read_counter(&self.log, &*self.prefs, &key);
            self.set_current(source, value, true);

            let key =
                keys::bytes_downloaded_key(keys::TOTAL_BYTES_DOWNLOADED_PREFIX, source);
            let value = persist::read_counter(&self.log, &*self.prefs, &key);
            self.set_total(source, value, true);
        }
    }

    /// Attributes a byte delta to the given source. Bytes arriving while the
    /// current URL has no recognized source are dropped on the floor.
    pub fn add(&mut self, source: Option<DownloadSource>, count: u64) {
        let Some(source) = source else {
            return;
        };
        let current = self.current(source).saturating_add(count);
        let total = self.total(source).saturating_add(count);
        // Called for every chunk the downloader hands over; skip logging.
        self.set_current(source, current, false);
        self.set_total(source, total, false);
    }

    pub fn current(&self, source: DownloadSource) -> u64 {
        self.current.get(&source).copied().unwrap_or(0)
    }

    pub fn total(&self, source: DownloadSource) -> u64 {
        self.total.get(&source).copied().unwrap_or(0)
    }

    pub fn set_current(&mut self, source: DownloadSource, value: u64, log_it: bool) {
        self.current.insert(source, value);
        let key = keys::bytes_downloaded_key(keys::CURRENT_BYTES_DOWNLOADED_PREFIX, source);
        persist::write_i64(&self.log, &*self.prefs, &key, persist::clamp_to_i64(value));
        if log_it {
            info!(
                self.log, "current bytes downloaded";
                "source" => %source,
                "bytes" => value,
            );
        }
    }

    pub fn set_total(&mut self, source: DownloadSource, value: u64, log_it: bool) {
        self.total.insert(source, value);
        let key = keys::bytes_downloaded_key(keys::TOTAL_BYTES_DOWNLOADED_PREFIX, source);
        persist::write_i64(&self.log, &*self.prefs, &key, persist::clamp_to_i64(value));
        if log_it {
            info!(
                self.log, "total bytes downloaded";
                "source" => %source,
                "bytes" => value,
            );
        }
    }

    /// A new payload attempt is starting: the bytes of the previous attempt
    /// no longer count toward the applied payload. Totals keep accumulating
    /// until the update succeeds.
    pub fn reset_current_on_new_update(&mut self) {
        for source in DownloadSource::ALL {
            self.set_current(source, 0, true);
        }
    }
}
