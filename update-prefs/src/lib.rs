// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable typed key/value preferences for the update agent.
//!
//! The agent persists a handful of small values (counters, timestamps, a
//! response signature) that must survive crashes and reboots. [`Prefs`] is
//! the typed interface over that store; [`FilePrefs`] is the durable
//! one-file-per-key implementation and [`MemPrefs`] is an in-memory
//! implementation for tests and ephemeral runs.
//!
//! The store is single-writer by construction: exactly one agent process
//! owns a preferences directory at a time.

use std::collections::BTreeMap;
use std::io;
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::NamedUtf8TempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("invalid preference key {key:?}")]
    InvalidKey { key: String },

    #[error("failed to create preferences directory {path}")]
    CreateDir {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },

    #[error("failed to write preference {key:?}")]
    Write {
        key: String,
        #[source]
        err: io::Error,
    },

    #[error("failed to delete preference {key:?}")]
    Delete {
        key: String,
        #[source]
        err: io::Error,
    },
}

/// Typed access to the agent's crash-safe preference store.
///
/// Getters return `None` when the key is absent or its stored form cannot be
/// parsed; callers pick the appropriate default. Each setter is atomic and
/// durable before it returns: a reader never observes a partially written
/// value, and a crash leaves either the old value or the new one.
pub trait Prefs: Send + Sync {
    fn exists(&self, key: &str) -> bool;
    fn get_i64(&self, key: &str) -> Option<i64>;
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_i64(&self, key: &str, value: i64) -> Result<(), PrefsError>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError>;
    /// Removes the key. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), PrefsError>;
}

/// Keys name files on disk: alphanumerics plus `-`, `_`, and `.`, except
/// the path components `.` and `..`.
fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// Preference store keeping one file per key under a base directory.
///
/// Writes go to a temporary file in the same directory, are fsynced, then
/// renamed over the final path. Integer values are stored in their decimal
/// string form, so a preferences directory can be inspected and repaired
/// with ordinary shell tools.
#[derive(Debug)]
pub struct FilePrefs {
    dir: Utf8PathBuf,
}

impl FilePrefs {
    pub fn new(dir: impl AsRef<Utf8Path>) -> Result<FilePrefs, PrefsError> {
        let dir = dir.as_ref().to_owned();
        std::fs::create_dir_all(&dir)
            .map_err(|err| PrefsError::CreateDir { path: dir.clone(), err })?;
        Ok(FilePrefs { dir })
    }

    fn key_path(&self, key: &str) -> Option<Utf8PathBuf> {
        valid_key(key).then(|| self.dir.join(key))
    }

    fn read(&self, key: &str) -> Option<String> {
        let path = self.key_path(key)?;
        std::fs::read_to_string(path).ok()
    }
}

impl Prefs for FilePrefs {
    fn exists(&self, key: &str) -> bool {
        self.key_path(key).is_some_and(|path| path.exists())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.read(key)?.trim().parse().ok()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.read(key)
    }

    fn set_i64(&self, key: &str, value: i64) -> Result<(), PrefsError> {
        self.set_string(key, &value.to_string())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        let path = self
            .key_path(key)
            .ok_or_else(|| PrefsError::InvalidKey { key: key.to_string() })?;
        let write = || -> io::Result<()> {
            let mut tmp = NamedUtf8TempFile::new_in(&self.dir)?;
            tmp.write_all(value.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|err| err.error)?;
            Ok(())
        };
        write().map_err(|err| PrefsError::Write { key: key.to_string(), err })
    }

    fn delete(&self, key: &str) -> Result<(), PrefsError> {
        let path = self
            .key_path(key)
            .ok_or_else(|| PrefsError::InvalidKey { key: key.to_string() })?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PrefsError::Delete { key: key.to_string(), err }),
        }
    }
}

/// In-memory preference store with the same key discipline as [`FilePrefs`].
#[derive(Debug, Default)]
pub struct MemPrefs {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemPrefs {
    pub fn new() -> MemPrefs {
        MemPrefs::default()
    }
}

impl Prefs for MemPrefs {
    fn exists(&self, key: &str) -> bool {
        valid_key(key) && self.values.lock().unwrap().contains_key(key)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_string(key)?.trim().parse().ok()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        if !valid_key(key) {
            return None;
        }
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set_i64(&self, key: &str, value: i64) -> Result<(), PrefsError> {
        self.set_string(key, &value.to_string())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        if !valid_key(key) {
            return Err(PrefsError::InvalidKey { key: key.to_string() });
        }
        self.values.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PrefsError> {
        if !valid_key(key) {
            return Err(PrefsError::InvalidKey { key: key.to_string() });
        }
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
