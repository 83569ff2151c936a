// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Durable writer history and reader acknowledgment state.
//!
//! Writers with `Transient` or `Persistent` durability replay their history
//! and resume their sequence counter from this store when created, so
//! sequence numbers never regress across a restart. Durable readers persist
//! the next sequence number they expect from each writer.
//!
//! Entries are keyed by endpoint Guid; a participant that wants to find its
//! state again after a restart must be configured with a fixed Guid prefix.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{Guid, InstanceHandle, SequenceNumber};
use crate::error::{Error, Result};

/// One persisted writer history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChange {
    pub sequence: SequenceNumber,
    pub instance: InstanceHandle,
    pub related_request: Option<Guid>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Stored history of one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterState {
    pub changes: Vec<PersistedChange>,
    /// Next sequence number to assign; never decreases.
    pub next_sequence: SequenceNumber,
}

/// Persistence collaborator.
pub trait Persistence: Send + Sync {
    /// History and next sequence number of `writer` (empty for a new writer).
    fn load_writer_history(&self, writer: &Guid) -> Result<WriterState>;

    fn append_writer_change(&self, writer: &Guid, change: &PersistedChange) -> Result<()>;

    fn remove_writer_change(&self, writer: &Guid, sequence: SequenceNumber) -> Result<()>;

    /// Next expected sequence number per matched writer.
    fn load_reader_ack_state(&self, reader: &Guid) -> Result<HashMap<Guid, SequenceNumber>>;

    fn update_reader_ack_state(
        &self,
        reader: &Guid,
        writer: &Guid,
        next_expected: SequenceNumber,
    ) -> Result<()>;
}

fn append(state: &mut WriterState, change: &PersistedChange) {
    state.changes.retain(|c| c.sequence != change.sequence);
    state.changes.push(change.clone());
    state.changes.sort_by_key(|c| c.sequence);
    let next = change.sequence.next();
    if next > state.next_sequence {
        state.next_sequence = next;
    }
}

// ============================================================================
// IN MEMORY
// ============================================================================

/// Process-local store, useful for tests and for restarting endpoints inside
/// one process.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    writers: Mutex<HashMap<Guid, WriterState>>,
    readers: Mutex<HashMap<Guid, HashMap<Guid, SequenceNumber>>>,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn load_writer_history(&self, writer: &Guid) -> Result<WriterState> {
        Ok(self.writers.lock().get(writer).cloned().unwrap_or_default())
    }

    fn append_writer_change(&self, writer: &Guid, change: &PersistedChange) -> Result<()> {
        append(self.writers.lock().entry(*writer).or_default(), change);
        Ok(())
    }

    fn remove_writer_change(&self, writer: &Guid, sequence: SequenceNumber) -> Result<()> {
        if let Some(state) = self.writers.lock().get_mut(writer) {
            state.changes.retain(|c| c.sequence != sequence);
        }
        Ok(())
    }

    fn load_reader_ack_state(&self, reader: &Guid) -> Result<HashMap<Guid, SequenceNumber>> {
        Ok(self.readers.lock().get(reader).cloned().unwrap_or_default())
    }

    fn update_reader_ack_state(
        &self,
        reader: &Guid,
        writer: &Guid,
        next_expected: SequenceNumber,
    ) -> Result<()> {
        self.readers
            .lock()
            .entry(*reader)
            .or_default()
            .insert(*writer, next_expected);
        Ok(())
    }
}

// ============================================================================
// JSON FILES
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReaderFile {
    /// Keyed by writer Guid in hex.
    next_expected: BTreeMap<String, SequenceNumber>,
}

/// One JSON file per endpoint under a directory.
///
/// Files are rewritten atomically (temporary file, then rename) on every
/// change; this store favors simplicity over write throughput.
#[derive(Debug)]
pub struct JsonFilePersistence {
    dir: PathBuf,
    lock: Mutex<()>,
}

fn hex(guid: &Guid) -> String {
    guid.to_bytes().iter().map(|b| format!("{:02x}", b)).collect()
}

fn unhex(text: &str) -> Option<Guid> {
    if text.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(text.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(Guid::from_bytes(bytes))
}

impl JsonFilePersistence {
    /// Store rooted at `dir` (created if missing).
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn writer_path(&self, writer: &Guid) -> PathBuf {
        self.dir.join(format!("writer-{}.json", hex(writer)))
    }

    fn reader_path(&self, reader: &Guid) -> PathBuf {
        self.dir.join(format!("reader-{}.json", hex(reader)))
    }

    fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec(value)?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Persistence for JsonFilePersistence {
    fn load_writer_history(&self, writer: &Guid) -> Result<WriterState> {
        let _guard = self.lock.lock();
        Self::read_json(&self.writer_path(writer))
    }

    fn append_writer_change(&self, writer: &Guid, change: &PersistedChange) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.writer_path(writer);
        let mut state: WriterState = Self::read_json(&path)?;
        append(&mut state, change);
        Self::write_json(&path, &state)
    }

    fn remove_writer_change(&self, writer: &Guid, sequence: SequenceNumber) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.writer_path(writer);
        let mut state: WriterState = Self::read_json(&path)?;
        let before = state.changes.len();
        state.changes.retain(|c| c.sequence != sequence);
        if state.changes.len() == before {
            return Ok(());
        }
        Self::write_json(&path, &state)
    }

    fn load_reader_ack_state(&self, reader: &Guid) -> Result<HashMap<Guid, SequenceNumber>> {
        let _guard = self.lock.lock();
        let file: ReaderFile = Self::read_json(&self.reader_path(reader))?;
        Ok(file
            .next_expected
            .iter()
            .filter_map(|(k, v)| unhex(k).map(|g| (g, *v)))
            .collect())
    }

    fn update_reader_ack_state(
        &self,
        reader: &Guid,
        writer: &Guid,
        next_expected: SequenceNumber,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        let path = self.reader_path(reader);
        let mut file: ReaderFile = Self::read_json(&path)?;
        if file.next_expected.get(&hex(writer)) == Some(&next_expected) {
            return Ok(());
        }
        file.next_expected.insert(hex(writer), next_expected);
        Self::write_json(&path, &file)
    }
}
