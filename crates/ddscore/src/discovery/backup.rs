// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON backup files for the discovery database.
//!
//! Files are written to a sibling temporary path and renamed into place, so
//! a crash mid-write leaves the previous backup intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::discovery::database::{DatabaseSnapshot, SNAPSHOT_VERSION};
use crate::error::{Error, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write `snapshot` to `path`.
pub fn save(path: &Path, snapshot: &DatabaseSnapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    log::info!(
        "[DDB] Backup written to {} ({} entries)",
        path.display(),
        snapshot.entries.len()
    );
    Ok(())
}

/// Read a backup written by [`save`].
pub fn load(path: &Path) -> Result<DatabaseSnapshot> {
    let bytes = fs::read(path)?;
    let snapshot: DatabaseSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::Persistence(format!(
            "backup {} has version {}, expected {}",
            path.display(),
            snapshot.version,
            SNAPSHOT_VERSION
        )));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, Guid, SequenceNumber};
    use crate::discovery::database::DiscoveryDatabase;
    use crate::discovery::record::DiscoveryChangeRecord;
    use crate::proxy::{ParticipantKind, ProxyData};
    use crate::test_support::{participant_data, prefix};
    use std::time::Instant;

    #[test]
    fn test_save_and_load_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("discovery.json");
        let now = Instant::now();

        let mut db = DiscoveryDatabase::new(true);
        let record = DiscoveryChangeRecord::alive(
            Guid::new(prefix(1), EntityId::SPDP_WRITER),
            SequenceNumber::FIRST,
            ProxyData::Participant(participant_data(1, ParticipantKind::Client)),
        );
        db.update(&record, now);
        db.backup(&path).expect("backup");
        assert!(!db.backup_in_progress());
        assert!(!temp_path(&path).exists(), "temporary file renamed away");

        let snapshot = load(&path).expect("load");
        assert_eq!(snapshot, db.snapshot());
    }

    #[test]
    fn test_load_rejects_other_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("discovery.json");
        let snapshot = DatabaseSnapshot {
            version: SNAPSHOT_VERSION + 1,
            entries: Vec::new(),
            pending_relay: Vec::new(),
        };
        fs::write(&path, serde_json::to_vec(&snapshot).expect("json")).expect("write");
        assert!(matches!(load(&path), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(load(&dir.path().join("absent.json")), Err(Error::Io(_))));
    }
}
