//! The Flag Store (C1): a durable per-zone, per-flag key/value map.
//!
//! One file per `(zone, flag)` pair lives under a configured root
//! directory, named `<zone>.<flag>`. Presence is `true`; an empty file is
//! also `true`; a payload is the stored string with exactly one trailing
//! newline stripped on read. Writes go through [`util::write_file`]'s
//! write-to-temp-then-rename so concurrent readers never observe a partial
//! write.

use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

use crate::error::FatalError;
use crate::flag::{FlagName, FlagUpdate, FlagValue};
use crate::util;
use crate::zonename::ZoneName;

/// The result of a [`FlagStore::set_checked`] call.
#[derive(Copy, Clone, Debug)]
pub struct SetOutcome {
    /// Whether the re-read value matched what was written.
    pub matches: bool,
    /// Whether the value differs from what it was before the write.
    pub changed: bool,
}

#[derive(Clone, Debug)]
pub struct FlagStore {
    root: Utf8PathBuf,
}

impl FlagStore {
    /// Open a Flag Store rooted at `root`. The directory must already
    /// exist: a missing root is a fatal startup condition, not
    /// something silently created on first use.
    pub fn open(root: Utf8PathBuf) -> Result<Self, FatalError> {
        if !root.is_dir() {
            return Err(FatalError::MissingFlagDir {
                path: root.to_string(),
            });
        }
        Ok(FlagStore { root })
    }

    fn path(&self, zone: &ZoneName, flag: FlagName) -> Utf8PathBuf {
        self.root.join(format!("{zone}.{flag}"))
    }

    /// Read a flag's current value.
    pub fn get(&self, zone: &ZoneName, flag: FlagName) -> FlagValue {
        let path = self.path(zone, flag);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let trimmed = contents.strip_suffix('\n').unwrap_or(&contents);
                if trimmed.is_empty() {
                    FlagValue::Present
                } else {
                    FlagValue::Payload(trimmed.to_string())
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FlagValue::Absent,
            Err(err) => {
                warn!(%zone, %flag, %err, "failed to read flag; treating as absent");
                FlagValue::Absent
            }
        }
    }

    /// The flag file's mtime, used by the cluster consumer's last-writer-
    /// wins rule. `None` if the flag is absent.
    pub fn mtime(&self, zone: &ZoneName, flag: FlagName) -> Option<SystemTime> {
        fs::metadata(self.path(zone, flag)).and_then(|m| m.modified()).ok()
    }

    /// Write a flag's value. I/O failure is swallowed here —
    /// "failure semantics" deliberately do not raise it to the caller) —
    /// the caller is expected to use [`FlagStore::set_checked`] when it
    /// needs to notice a failed write.
    pub fn set(&self, zone: &ZoneName, flag: FlagName, update: &FlagUpdate) {
        let path = self.path(zone, flag);
        let result = match update {
            FlagUpdate::Clear => match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err),
            },
            FlagUpdate::Mark => util::write_file(&path, b""),
            FlagUpdate::Payload(s) => util::write_file(&path, format!("{s}\n").as_bytes()),
        };
        if let Err(err) = result {
            warn!(%zone, %flag, %err, "failed to write flag");
        }
    }

    /// Write a flag and immediately re-read it, reporting whether the
    /// observed value matches what was intended and whether it actually
    /// changed from before the write. A caller uses a mismatch to trigger
    /// the `invalid`-flag cascade; it uses `changed` to decide
    /// whether a cluster broadcast is warranted.
    pub fn set_checked(&self, zone: &ZoneName, flag: FlagName, update: FlagUpdate) -> SetOutcome {
        let old = self.get(zone, flag);
        self.set(zone, flag, &update);
        let observed = self.get(zone, flag);
        SetOutcome {
            matches: observed == update.expected(),
            changed: old != observed,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FlagStore) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = FlagStore::open(root).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_root_is_fatal() {
        let err = FlagStore::open(Utf8PathBuf::from("/nonexistent/zoneward-flags"));
        assert!(matches!(err, Err(FatalError::MissingFlagDir { .. })));
    }

    #[test]
    fn absent_flag_reads_as_absent() {
        let (_dir, store) = store();
        let zone = crate::zonename::normalize("example.org").unwrap();
        assert_eq!(store.get(&zone, FlagName::Signing), FlagValue::Absent);
    }

    #[test]
    fn mark_then_clear_round_trips() {
        let (_dir, store) = store();
        let zone = crate::zonename::normalize("example.org").unwrap();
        let outcome = store.set_checked(&zone, FlagName::Signing, FlagUpdate::Mark);
        assert!(outcome.matches && outcome.changed);
        assert_eq!(store.get(&zone, FlagName::Signing), FlagValue::Present);
        let outcome = store.set_checked(&zone, FlagName::Signing, FlagUpdate::Clear);
        assert!(outcome.matches && outcome.changed);
        assert_eq!(store.get(&zone, FlagName::Signing), FlagValue::Absent);
    }

    #[test]
    fn repeated_set_reports_unchanged() {
        let (_dir, store) = store();
        let zone = crate::zonename::normalize("example.org").unwrap();
        let first = store.set_checked(&zone, FlagName::Signing, FlagUpdate::Mark);
        let second = store.set_checked(&zone, FlagName::Signing, FlagUpdate::Mark);
        assert!(first.changed);
        assert!(!second.changed);
    }

    #[test]
    fn payload_strips_one_trailing_newline() {
        let (_dir, store) = store();
        let zone = crate::zonename::normalize("example.org").unwrap();
        let outcome = store.set_checked(&zone, FlagName::Signed, FlagUpdate::epoch(12345));
        assert!(outcome.matches);
        assert_eq!(
            store.get(&zone, FlagName::Signed),
            FlagValue::Payload("12345".to_string())
        );
    }

    #[test]
    fn mtime_advances_after_rewrite() {
        let (_dir, store) = store();
        let zone = crate::zonename::normalize("example.org").unwrap();
        store.set_checked(&zone, FlagName::Signing, FlagUpdate::Mark);
        assert!(store.mtime(&zone, FlagName::Signing).is_some());
    }
}
