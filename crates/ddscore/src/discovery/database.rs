// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery database: the authority the proxy cache is projected from.
//!
//! The database merges [`DiscoveryChangeRecord`]s so that every node converges
//! to the same state whatever the arrival order:
//!
//! - **Idempotence**: a record is applied at most once per `(writer, sequence)`;
//!   anything not newer than what was seen from that writer is stale.
//! - **Tombstone precedence**: a `Dispose`/`Unregister` wins over an `Alive`
//!   with a lower or equal sequence number from the same writer, and while a
//!   tombstone is retained no writer that has not been heard from before can
//!   resurrect the subject.
//! - **Locality**: participants are `Local` (heard directly) or `Relayed`
//!   (learned through servers). `Relayed` is promoted to `Local` when a direct
//!   announcement arrives, never demoted implicitly.
//!
//! Removal while a backup is in progress only marks entries as evicted; they
//! are purged by [`DiscoveryDatabase::finish_backup`].

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::{Guid, GuidPrefix, SequenceNumber};
use crate::discovery::backup;
use crate::discovery::record::{ChangeKind, DiscoveryChangeRecord, Origin};
use crate::error::Result;
use crate::proxy::{ParticipantProxyData, ProxyData};

/// Snapshot format version written in backup files.
pub const SNAPSHOT_VERSION: u32 = 1;

/// How a participant is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locality {
    /// Announces directly to us.
    Local,
    /// Learned only through servers.
    Relayed,
}

#[derive(Debug, Clone)]
struct AliveState {
    writer: Guid,
    sequence: SequenceNumber,
    data: ProxyData,
}

#[derive(Debug, Clone)]
struct Tombstone {
    writer: Guid,
    sequence: SequenceNumber,
    kind: ChangeKind,
    at: Instant,
}

#[derive(Debug, Default)]
struct InstanceEntry {
    /// Highest sequence number seen per writer.
    seen: HashMap<Guid, SequenceNumber>,
    alive: Option<AliveState>,
    tombstone: Option<Tombstone>,
    locality: Option<Locality>,
    relayed_via: BTreeSet<GuidPrefix>,
    acked_by: HashSet<GuidPrefix>,
    evicted: bool,
}

impl InstanceEntry {
    fn is_alive(&self) -> bool {
        !self.evicted && self.alive.is_some()
    }

    fn forget(&mut self) {
        self.seen.clear();
        self.alive = None;
        self.tombstone = None;
        self.locality = None;
        self.relayed_via.clear();
        self.acked_by.clear();
    }
}

/// Eventually-consistent store of discovery records.
#[derive(Debug)]
pub struct DiscoveryDatabase {
    entries: HashMap<Guid, InstanceEntry>,
    enabled: bool,
    relay_enabled: bool,
    relay_queue: VecDeque<DiscoveryChangeRecord>,
    updates: u64,
    backup_in_progress: bool,
}

impl DiscoveryDatabase {
    /// Empty database. `relay_enabled` queues applied records for relaying
    /// (server roles).
    #[must_use]
    pub fn new(relay_enabled: bool) -> Self {
        Self {
            entries: HashMap::new(),
            enabled: true,
            relay_enabled,
            relay_queue: VecDeque::new(),
            updates: 0,
            backup_in_progress: false,
        }
    }

    // ========================================================================
    // MERGE
    // ========================================================================

    /// Merge a record.
    ///
    /// Returns `true` when the database state changed (the record must be
    /// projected into the cache and possibly relayed), `false` for stale or
    /// duplicate records and while the database is disabled.
    pub fn update(&mut self, record: &DiscoveryChangeRecord, now: Instant) -> bool {
        if !self.enabled {
            log::debug!("[DDB] Disabled, ignoring {}", record);
            return false;
        }

        if record.kind.is_retraction() && record.writer.prefix != record.subject.prefix {
            return self.apply_foreign_retraction(record);
        }

        let entry = self.entries.entry(record.subject).or_default();
        let last = entry.seen.get(&record.writer).copied();

        let applied = match record.kind {
            ChangeKind::Alive => Self::apply_alive(entry, record, last),
            ChangeKind::Dispose | ChangeKind::Unregister => {
                Self::apply_retraction(entry, record, last, now)
            }
        };

        if !applied {
            return false;
        }

        entry.evicted = false;
        entry.acked_by.clear();
        if record.kind.is_retraction() && record.is_participant() {
            self.cascade_retraction(record, now);
        }
        self.updates += 1;
        if self.relay_enabled {
            self.relay_queue.push_back(record.clone());
        }
        log::debug!("[DDB] Applied {} ({:?})", record, record.origin);
        true
    }

    fn apply_alive(
        entry: &mut InstanceEntry,
        record: &DiscoveryChangeRecord,
        last: Option<SequenceNumber>,
    ) -> bool {
        let Some(data) = record.data.clone() else {
            return false;
        };

        if let Some(last) = last {
            if record.sequence <= last {
                // Same announcement heard directly: promote, never demote.
                let same = entry
                    .alive
                    .as_ref()
                    .is_some_and(|a| a.writer == record.writer && a.sequence == record.sequence);
                if same && record.is_participant() {
                    return Self::note_locality(entry, record.origin);
                }
                return false;
            }
        } else if entry.tombstone.is_some() {
            log::debug!(
                "[DDB] Tombstoned {}: ignoring alive from unknown writer {}",
                record.subject,
                record.writer
            );
            return false;
        }

        entry.seen.insert(record.writer, record.sequence);
        entry.alive = Some(AliveState {
            writer: record.writer,
            sequence: record.sequence,
            data,
        });
        entry.tombstone = None;
        if record.is_participant() {
            Self::note_locality(entry, record.origin);
        }
        true
    }

    fn apply_retraction(
        entry: &mut InstanceEntry,
        record: &DiscoveryChangeRecord,
        last: Option<SequenceNumber>,
        now: Instant,
    ) -> bool {
        if let Some(last) = last {
            let supersedes_alive = entry
                .alive
                .as_ref()
                .is_some_and(|a| a.writer == record.writer && a.sequence == record.sequence);
            let stale = record.sequence < last || (record.sequence == last && !supersedes_alive);
            if stale {
                return false;
            }
        }

        entry.seen.insert(record.writer, record.sequence);
        entry.alive = None;
        entry.locality = None;
        entry.relayed_via.clear();
        entry.tombstone = Some(Tombstone {
            writer: record.writer,
            sequence: record.sequence,
            kind: record.kind,
            at: now,
        });
        true
    }

    /// Retraction issued by a server on behalf of a participant it lost.
    ///
    /// The subject is forgotten rather than tombstoned: the subject's own
    /// announcements keep their sequence numbers, so a tombstone would block
    /// its rediscovery. Participants we hear directly follow their own lease.
    fn apply_foreign_retraction(&mut self, record: &DiscoveryChangeRecord) -> bool {
        let Some(entry) = self.entries.get(&record.subject) else {
            return false;
        };
        if !entry.is_alive() || entry.locality == Some(Locality::Local) {
            return false;
        }
        let prefix = record.subject.prefix;
        if record.is_participant() {
            self.remove_participant(&prefix);
        } else {
            self.forget_entity(&record.subject);
        }
        if self.relay_enabled {
            self.relay_queue.push_back(record.clone());
        }
        log::debug!("[DDB] Forgot {} on retraction by {}", record.subject, record.writer);
        true
    }

    fn forget_entity(&mut self, guid: &Guid) {
        if self.backup_in_progress {
            if let Some(entry) = self.entries.get_mut(guid) {
                entry.forget();
                entry.evicted = true;
            }
        } else {
            self.entries.remove(guid);
        }
        self.updates += 1;
    }

    /// Returns `true` when locality changed.
    fn note_locality(entry: &mut InstanceEntry, origin: Origin) -> bool {
        match origin {
            Origin::Local => {
                let promoted = entry.locality != Some(Locality::Local);
                entry.locality = Some(Locality::Local);
                promoted
            }
            Origin::Relayed { via } => {
                entry.relayed_via.insert(via);
                if entry.locality.is_none() {
                    entry.locality = Some(Locality::Relayed);
                }
                false
            }
        }
    }

    /// A participant retraction retracts its endpoints too.
    fn cascade_retraction(&mut self, record: &DiscoveryChangeRecord, now: Instant) {
        let prefix = record.subject.prefix;
        for (guid, entry) in &mut self.entries {
            if guid.prefix == prefix && !guid.is_participant() && entry.alive.is_some() {
                entry.alive = None;
                entry.tombstone = Some(Tombstone {
                    writer: record.writer,
                    sequence: record.sequence,
                    kind: record.kind,
                    at: now,
                });
            }
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// True when `guid` is known and alive.
    #[must_use]
    pub fn contains_alive(&self, guid: &Guid) -> bool {
        self.entries.get(guid).is_some_and(InstanceEntry::is_alive)
    }

    /// Current data of an alive entity.
    #[must_use]
    pub fn get(&self, guid: &Guid) -> Option<&ProxyData> {
        self.entries
            .get(guid)
            .filter(|e| e.is_alive())
            .and_then(|e| e.alive.as_ref())
            .map(|a| &a.data)
    }

    /// True when `record` is the alive record currently held for its subject.
    #[must_use]
    pub fn is_current(&self, record: &DiscoveryChangeRecord) -> bool {
        self.entries
            .get(&record.subject)
            .filter(|e| e.is_alive())
            .and_then(|e| e.alive.as_ref())
            .is_some_and(|a| a.writer == record.writer && a.sequence == record.sequence)
    }

    /// True when a retraction for `guid` is retained.
    #[must_use]
    pub fn is_tombstoned(&self, guid: &Guid) -> bool {
        self.entries.get(guid).is_some_and(|e| e.tombstone.is_some())
    }

    /// Highest sequence number seen from `writer` about `subject`.
    #[must_use]
    pub fn last_seen(&self, subject: &Guid, writer: &Guid) -> Option<SequenceNumber> {
        self.entries
            .get(subject)
            .and_then(|e| e.seen.get(writer).copied())
    }

    #[must_use]
    pub fn alive_participants(&self) -> Vec<&ParticipantProxyData> {
        self.entries
            .values()
            .filter(|e| e.is_alive())
            .filter_map(|e| e.alive.as_ref())
            .filter_map(|a| a.data.as_participant())
            .collect()
    }

    /// Alive endpoint Guids owned by `prefix`.
    #[must_use]
    pub fn endpoints_of(&self, prefix: &GuidPrefix) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self
            .entries
            .iter()
            .filter(|(g, e)| g.prefix == *prefix && !g.is_participant() && e.is_alive())
            .map(|(g, _)| *g)
            .collect();
        guids.sort();
        guids
    }

    /// Every alive entity (participants first).
    #[must_use]
    pub fn alive_entities(&self) -> Vec<&ProxyData> {
        let mut all: Vec<&ProxyData> = self
            .entries
            .values()
            .filter(|e| e.is_alive())
            .filter_map(|e| e.alive.as_ref().map(|a| &a.data))
            .collect();
        all.sort_by_key(|d| (!d.guid().is_participant(), d.guid()));
        all
    }

    #[must_use]
    pub fn locality(&self, prefix: &GuidPrefix) -> Option<Locality> {
        self.entries
            .get(&Guid::participant(*prefix))
            .filter(|e| e.is_alive())
            .and_then(|e| e.locality)
    }

    /// Participants heard directly.
    #[must_use]
    pub fn direct_participants(&self) -> Vec<GuidPrefix> {
        self.participants_with(Locality::Local)
    }

    /// Participants learned only through servers.
    #[must_use]
    pub fn relayed_participants(&self) -> Vec<GuidPrefix> {
        self.participants_with(Locality::Relayed)
    }

    fn participants_with(&self, locality: Locality) -> Vec<GuidPrefix> {
        let mut prefixes: Vec<GuidPrefix> = self
            .entries
            .iter()
            .filter(|(g, e)| g.is_participant() && e.is_alive() && e.locality == Some(locality))
            .map(|(g, _)| g.prefix)
            .collect();
        prefixes.sort();
        prefixes
    }

    /// Servers a relayed participant was learned through.
    #[must_use]
    pub fn relayed_via(&self, prefix: &GuidPrefix) -> Vec<GuidPrefix> {
        self.entries
            .get(&Guid::participant(*prefix))
            .map(|e| e.relayed_via.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| !e.evicted).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // REMOVAL
    // ========================================================================

    /// Forget a participant and its endpoints (lease expiry, relay loss).
    ///
    /// Unlike a dispose no tombstone is kept, so the same announcement is
    /// accepted again if the participant comes back after a partition.
    /// Returns the Guids that were alive.
    pub fn remove_participant(&mut self, prefix: &GuidPrefix) -> Vec<Guid> {
        let targets: Vec<Guid> = self
            .entries
            .keys()
            .filter(|g| g.prefix == *prefix)
            .copied()
            .collect();

        let mut removed = Vec::new();
        for guid in targets {
            let was_alive = self.contains_alive(&guid);
            self.forget_entity(&guid);
            if was_alive {
                removed.push(guid);
            }
        }
        removed.sort();
        if !removed.is_empty() {
            log::debug!("[DDB] Removed participant {} ({} entities)", prefix, removed.len());
        }
        removed
    }

    /// Forget one entity without a tombstone (rollback of a failed
    /// projection). Returns `true` if it was alive.
    pub fn remove_entity(&mut self, guid: &Guid) -> bool {
        let was_alive = self.contains_alive(guid);
        if self.entries.contains_key(guid) {
            self.forget_entity(guid);
        }
        was_alive
    }

    /// Drop `server` from every relayed participant's sources.
    ///
    /// Returns the participants left without any source; the caller removes
    /// them with [`DiscoveryDatabase::remove_participant`].
    pub fn drop_relay_source(&mut self, server: &GuidPrefix) -> Vec<GuidPrefix> {
        let mut orphans = Vec::new();
        for (guid, entry) in &mut self.entries {
            if !guid.is_participant() || !entry.relayed_via.remove(server) {
                continue;
            }
            if entry.is_alive()
                && entry.locality == Some(Locality::Relayed)
                && entry.relayed_via.is_empty()
            {
                orphans.push(guid.prefix);
            }
        }
        orphans.sort();
        orphans
    }

    /// Purge retained tombstones older than `retention`.
    ///
    /// With relaying enabled a tombstone is kept until every directly
    /// connected participant acknowledged it. Returns the number of entries
    /// purged or marked.
    pub fn collect_garbage(&mut self, now: Instant, retention: Duration) -> usize {
        let direct: HashSet<GuidPrefix> = self.direct_participants().into_iter().collect();
        let mut expired = Vec::new();
        for (guid, entry) in &self.entries {
            let Some(tomb) = &entry.tombstone else {
                continue;
            };
            if entry.evicted || now.saturating_duration_since(tomb.at) < retention {
                continue;
            }
            if self.relay_enabled && !Self::acked_by(entry, guid, &direct) {
                continue;
            }
            expired.push(*guid);
        }

        for guid in &expired {
            if self.backup_in_progress {
                if let Some(entry) = self.entries.get_mut(guid) {
                    entry.evicted = true;
                }
            } else {
                self.entries.remove(guid);
            }
        }
        if !expired.is_empty() {
            log::debug!("[DDB] Collected {} tombstones", expired.len());
        }
        expired.len()
    }

    // ========================================================================
    // RELAY / ACKS / COUNTERS
    // ========================================================================

    /// Records applied since the last drain, in application order.
    pub fn drain_relay_queue(&mut self) -> Vec<DiscoveryChangeRecord> {
        self.relay_queue.drain(..).collect()
    }

    /// Number of state changes since the previous call.
    pub fn updates_since_last_checked(&mut self) -> u64 {
        std::mem::take(&mut self.updates)
    }

    /// Stop (or resume) accepting records.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `participant` acknowledged the current record of `subject`.
    pub fn record_ack(&mut self, subject: &Guid, participant: GuidPrefix) {
        if let Some(entry) = self.entries.get_mut(subject) {
            entry.acked_by.insert(participant);
        }
    }

    /// True when every directly connected participant (other than the
    /// subject's own) acknowledged the current record of `subject`.
    #[must_use]
    pub fn acked_by_all(&self, subject: &Guid) -> bool {
        let direct: HashSet<GuidPrefix> = self.direct_participants().into_iter().collect();
        self.entries
            .get(subject)
            .is_some_and(|e| Self::acked_by(e, subject, &direct))
    }

    fn acked_by(entry: &InstanceEntry, subject: &Guid, direct: &HashSet<GuidPrefix>) -> bool {
        direct
            .iter()
            .filter(|p| **p != subject.prefix)
            .all(|p| entry.acked_by.contains(p))
    }

    // ========================================================================
    // BACKUP / RESTORE
    // ========================================================================

    /// Enter backup mode: removals only mark entries until `finish_backup`.
    pub fn start_backup(&mut self) {
        self.backup_in_progress = true;
    }

    #[must_use]
    pub fn backup_in_progress(&self) -> bool {
        self.backup_in_progress
    }

    /// Serializable image of every non-evicted entry and the relay queue.
    #[must_use]
    pub fn snapshot(&self) -> DatabaseSnapshot {
        let mut entries: Vec<SnapshotEntry> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.evicted)
            .map(|(subject, e)| SnapshotEntry {
                subject: *subject,
                seen: e.seen.iter().map(|(w, s)| (*w, *s)).collect(),
                alive: e.alive.as_ref().map(|a| SnapshotAlive {
                    writer: a.writer,
                    sequence: a.sequence,
                    data: a.data.clone(),
                }),
                tombstone: e.tombstone.as_ref().map(|t| SnapshotTombstone {
                    writer: t.writer,
                    sequence: t.sequence,
                    kind: t.kind,
                }),
                locality: e.locality,
                relayed_via: e.relayed_via.iter().copied().collect(),
            })
            .collect();
        entries.sort_by_key(|e| e.subject);
        DatabaseSnapshot {
            version: SNAPSHOT_VERSION,
            entries,
            pending_relay: self.relay_queue.iter().cloned().collect(),
        }
    }

    /// Leave backup mode and purge marked entries. Returns the purge count.
    pub fn finish_backup(&mut self) -> usize {
        self.backup_in_progress = false;
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.evicted);
        before - self.entries.len()
    }

    /// Atomically write a backup file.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        self.start_backup();
        let snapshot = self.snapshot();
        let result = backup::save(path, &snapshot);
        self.finish_backup();
        result
    }

    /// Replace the whole state with `snapshot`. Tombstone ages restart at `now`.
    pub fn restore(&mut self, snapshot: DatabaseSnapshot, now: Instant) {
        self.entries.clear();
        for item in snapshot.entries {
            let entry = InstanceEntry {
                seen: item.seen.into_iter().collect(),
                alive: item.alive.map(|a| AliveState {
                    writer: a.writer,
                    sequence: a.sequence,
                    data: a.data,
                }),
                tombstone: item.tombstone.map(|t| Tombstone {
                    writer: t.writer,
                    sequence: t.sequence,
                    kind: t.kind,
                    at: now,
                }),
                locality: item.locality,
                relayed_via: item.relayed_via.into_iter().collect(),
                acked_by: HashSet::new(),
                evicted: false,
            };
            self.entries.insert(item.subject, entry);
        }
        self.relay_queue = snapshot.pending_relay.into_iter().collect();
        self.updates += 1;
        log::info!("[DDB] Restored {} entries", self.entries.len());
    }
}

// ============================================================================
// SNAPSHOT TYPES
// ============================================================================

/// Serializable database image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: u32,
    pub entries: Vec<SnapshotEntry>,
    /// Records applied but not yet relayed.
    #[serde(default)]
    pub pending_relay: Vec<DiscoveryChangeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub subject: Guid,
    pub seen: Vec<(Guid, SequenceNumber)>,
    pub alive: Option<SnapshotAlive>,
    pub tombstone: Option<SnapshotTombstone>,
    pub locality: Option<Locality>,
    #[serde(default)]
    pub relayed_via: Vec<GuidPrefix>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotAlive {
    pub writer: Guid,
    pub sequence: SequenceNumber,
    pub data: ProxyData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTombstone {
    pub writer: Guid,
    pub sequence: SequenceNumber,
    pub kind: ChangeKind,
}
