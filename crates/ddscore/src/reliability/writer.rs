// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer side of the reliable protocol.
//!
//! One [`ReliableWriter`] per local writer (user or builtin). It owns the
//! history, assigns sequence numbers and keeps one [`WriterProxyState`] per
//! matched reader:
//!
//! - `write` stores the sample and pushes DATA to every matched reader
//!   (GAP to excluded participants)
//! - `heartbeat` announces the available range to readers with unacked data
//! - `on_acknack` records acknowledgments, resends what is still in history
//!   and GAPs the rest
//!
//! The writer never touches the network: every operation returns the
//! [`Outgoing`] messages for the caller to send once its locks are released.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::{Guid, GuidPrefix, InstanceHandle, LocatorList, SequenceNumber};
use crate::discovery::engine::MatchInfo;
use crate::error::{Error, Result};
use crate::payload_pool::PayloadPool;
use crate::persistence::{PersistedChange, Persistence};
use crate::qos::{Durability, History, QoS};
use crate::wire::{Outgoing, Submessage};

use super::history::{WriterHistory, WriterHistoryEntry};
use super::messages::{AckNackMsg, DataMsg, GapMsg, HeartbeatMsg};

/// Progress of one matched reader as seen by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterMatchState {
    Unmatched,
    /// Nothing the reader is entitled to has been written yet.
    MatchedNoData,
    /// Reader acknowledged everything (best-effort: everything was sent).
    InSync,
    /// Reader still misses samples.
    RecoveringGaps,
}

/// Writer-side state of one matched reader.
#[derive(Debug, Clone)]
pub struct WriterProxyState {
    pub remote: Guid,
    pub locators: LocatorList,
    pub reliable: bool,
    pub durability: Durability,
    /// Everything up to and including this sequence number is acknowledged.
    pub acked: u64,
    pub highest_sent: u64,
    /// Samples at or below this number predate the match and are never
    /// offered (volatile readers).
    pub baseline: u64,
    last_acknack_count: Option<u32>,
}

impl WriterProxyState {
    fn new(info: &MatchInfo, last_sn: u64) -> Self {
        let baseline = if info.durability.replays_history() {
            0
        } else {
            last_sn
        };
        Self {
            remote: info.remote,
            locators: info.remote_locators.clone(),
            reliable: info.reliable,
            durability: info.durability,
            acked: baseline,
            highest_sent: baseline,
            baseline,
            last_acknack_count: None,
        }
    }

    /// Match state given the writer's highest sequence number.
    #[must_use]
    pub fn state(&self, last_sn: u64) -> WriterMatchState {
        if last_sn <= self.baseline {
            WriterMatchState::MatchedNoData
        } else if self.reliable && self.acked < last_sn {
            WriterMatchState::RecoveringGaps
        } else if !self.reliable && self.highest_sent < last_sn {
            WriterMatchState::RecoveringGaps
        } else {
            WriterMatchState::InSync
        }
    }
}

/// Result of processing one ACKNACK.
#[derive(Debug, Default)]
pub struct AckNackOutcome {
    pub outgoing: Vec<Outgoing>,
    /// Samples newly acknowledged by this reader.
    pub acked: Vec<(SequenceNumber, InstanceHandle)>,
}

pub struct ReliableWriter {
    guid: Guid,
    qos: QoS,
    history: WriterHistory,
    pool: Arc<dyn PayloadPool>,
    last_sn: u64,
    readers: BTreeMap<Guid, WriterProxyState>,
    heartbeat_count: u32,
    persistence: Option<Arc<dyn Persistence>>,
}

impl std::fmt::Debug for ReliableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableWriter")
            .field("guid", &self.guid)
            .field("last_sn", &self.last_sn)
            .field("history", &self.history)
            .field("readers", &self.readers.len())
            .finish()
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ReliableWriter {
    /// Create a writer. Durable writers (`Transient` or stronger) with a
    /// persistence store reload their history and resume their sequence
    /// counter.
    pub fn new(
        guid: Guid,
        qos: QoS,
        pool: Arc<dyn PayloadPool>,
        persistence: Option<Arc<dyn Persistence>>,
    ) -> Result<Self> {
        let mut writer = Self {
            guid,
            history: WriterHistory::new(&qos, Arc::clone(&pool)),
            qos,
            pool,
            last_sn: 0,
            readers: BTreeMap::new(),
            heartbeat_count: 0,
            persistence: None,
        };
        if writer.qos.durability.is_durable() {
            if let Some(store) = persistence {
                writer.restore(store.as_ref())?;
                writer.persistence = Some(store);
            }
        }
        Ok(writer)
    }

    fn restore(&mut self, store: &dyn Persistence) -> Result<()> {
        let state = store.load_writer_history(&self.guid)?;
        let mut highest = state.next_sequence.to_linear().saturating_sub(1);
        let restored = state.changes.len();
        for change in state.changes {
            let handle = self.pool.store(&change.payload)?;
            let entry = WriterHistoryEntry {
                sequence: change.sequence,
                payload: handle,
                timestamp: UNIX_EPOCH + std::time::Duration::from_millis(change.timestamp_ms),
                related_request: change.related_request,
                instance: change.instance,
                exclude: Vec::new(),
            };
            highest = highest.max(change.sequence.to_linear());
            if let Err(e) = self.history.insert(entry) {
                self.pool.release(handle);
                return Err(e);
            }
        }
        self.last_sn = highest;
        log::debug!(
            "[RELIABLE] Writer {} restored {} samples, resuming after {}",
            self.guid,
            restored,
            highest
        );
        Ok(())
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[must_use]
    pub fn qos(&self) -> &QoS {
        &self.qos
    }

    #[must_use]
    pub fn history(&self) -> &WriterHistory {
        &self.history
    }

    /// Highest sequence number assigned (0 before the first write).
    #[must_use]
    pub fn last_sn(&self) -> SequenceNumber {
        SequenceNumber::from_linear(self.last_sn)
    }

    /// Store a sample and build DATA (or GAP, for readers on `exclude`
    /// participants) for every matched reader.
    ///
    /// Fails with `WouldBlock` when a `KeepAll` history is full and with
    /// `PoolExhausted` when no buffer is available. A durable writer fails
    /// with `Persistence` when the store rejects the sample. Nothing is
    /// stored or sent on failure.
    pub fn write(
        &mut self,
        payload: &[u8],
        instance: InstanceHandle,
        related_request: Option<Guid>,
        exclude: Vec<GuidPrefix>,
    ) -> Result<(SequenceNumber, Vec<Outgoing>)> {
        self.history.reserve(&instance)?;
        let handle = self.pool.store(payload)?;
        let seq = self.last_sn + 1;
        let sequence = SequenceNumber::from_linear(seq);
        let timestamp = SystemTime::now();
        let entry = WriterHistoryEntry {
            sequence,
            payload: handle,
            timestamp,
            related_request,
            instance,
            exclude,
        };
        if let Some(store) = &self.persistence {
            let change = PersistedChange {
                sequence,
                instance,
                related_request,
                timestamp_ms: unix_millis(timestamp),
                payload: payload.to_vec(),
            };
            if let Err(e) = store.append_writer_change(&self.guid, &change) {
                self.pool.release(handle);
                return Err(Error::Persistence(format!(
                    "writer {} sample {}: {}",
                    self.guid, seq, e
                )));
            }
        }

        let outgoing = self.outgoing_for_new(&entry, payload);
        let evicted = match self.history.insert(entry) {
            Ok(evicted) => evicted,
            Err(e) => {
                self.pool.release(handle);
                self.unpersist(&[sequence]);
                return Err(e);
            }
        };
        self.last_sn = seq;
        self.unpersist(&evicted);
        if !evicted.is_empty() {
            log::trace!("[RELIABLE] Writer {} evicted {:?}", self.guid, evicted);
        }
        for reader in self.readers.values_mut() {
            reader.highest_sent = seq;
        }
        Ok((sequence, outgoing))
    }

    fn outgoing_for_new(&self, entry: &WriterHistoryEntry, payload: &[u8]) -> Vec<Outgoing> {
        let mut out = Vec::with_capacity(self.readers.len());
        for reader in self.readers.values() {
            if entry.excludes(&reader.remote.prefix) {
                if reader.reliable {
                    out.extend(self.gaps_to(reader, &[entry.sequence.to_linear()]));
                }
                continue;
            }
            out.push(self.data_to(reader, entry, payload.to_vec()));
        }
        out
    }

    fn data_to(
        &self,
        reader: &WriterProxyState,
        entry: &WriterHistoryEntry,
        payload: Vec<u8>,
    ) -> Outgoing {
        Outgoing::new(
            reader.locators.clone(),
            Submessage::Data(DataMsg {
                writer: self.guid,
                reader: reader.remote,
                sequence: entry.sequence,
                instance: entry.instance,
                related_request: entry.related_request,
                payload,
            }),
        )
    }

    fn gaps_to(&self, reader: &WriterProxyState, sequences: &[u64]) -> Vec<Outgoing> {
        GapMsg::from_sequences(self.guid, reader.remote, sequences)
            .into_iter()
            .map(|gap| Outgoing::new(reader.locators.clone(), Submessage::Gap(gap)))
            .collect()
    }

    fn heartbeat_to(&mut self, remote: &Guid) -> Option<Outgoing> {
        let reader = self.readers.get(remote)?;
        let history_first = self
            .history
            .first_sn()
            .map_or(self.last_sn + 1, |s| s.to_linear());
        let first = history_first.max(reader.baseline + 1);
        let locators = reader.locators.clone();
        self.heartbeat_count = self.heartbeat_count.wrapping_add(1);
        Some(Outgoing::new(
            locators,
            Submessage::Heartbeat(HeartbeatMsg {
                writer: self.guid,
                reader: *remote,
                first_sn: SequenceNumber::from_linear(first),
                last_sn: SequenceNumber::from_linear(self.last_sn),
                count: self.heartbeat_count,
                final_flag: false,
            }),
        ))
    }

    /// Start (or refresh) delivery to a reader.
    ///
    /// A new reader receives the history above its baseline followed by a
    /// HEARTBEAT when reliable. A known reader only has its locators updated.
    pub fn match_reader(&mut self, info: &MatchInfo) -> Vec<Outgoing> {
        if let Some(existing) = self.readers.get_mut(&info.remote) {
            existing.locators = info.remote_locators.clone();
            return Vec::new();
        }
        let proxy = WriterProxyState::new(info, self.last_sn);
        log::debug!(
            "[RELIABLE] Writer {} matched reader {} (reliable={}, baseline={})",
            self.guid,
            info.remote,
            info.reliable,
            proxy.baseline
        );

        let mut out = Vec::new();
        let mut excluded = Vec::new();
        for entry in self.history.entries_after(proxy.baseline) {
            if entry.excludes(&proxy.remote.prefix) {
                excluded.push(entry.sequence.to_linear());
                continue;
            }
            if let Some(bytes) = self.history.payload(entry) {
                out.push(self.data_to(&proxy, entry, bytes.to_vec()));
            }
        }
        if proxy.reliable && !excluded.is_empty() {
            out.extend(self.gaps_to(&proxy, &excluded));
        }
        let reliable = proxy.reliable;
        let mut proxy = proxy;
        proxy.highest_sent = self.last_sn;
        self.readers.insert(info.remote, proxy);
        if reliable {
            out.extend(self.heartbeat_to(&info.remote));
        }
        out
    }

    /// Stop delivery to a reader. Returns false when it was not matched.
    pub fn unmatch_reader(&mut self, remote: &Guid) -> bool {
        let removed = self.readers.remove(remote).is_some();
        if removed {
            log::debug!("[RELIABLE] Writer {} unmatched reader {}", self.guid, remote);
        }
        removed
    }

    /// Unmatch every reader of a participant; returns their Guids.
    pub fn unmatch_participant(&mut self, prefix: &GuidPrefix) -> Vec<Guid> {
        let doomed: Vec<Guid> = self
            .readers
            .keys()
            .filter(|g| g.prefix == *prefix)
            .copied()
            .collect();
        for guid in &doomed {
            self.readers.remove(guid);
        }
        doomed
    }

    /// HEARTBEAT for every reliable reader that has not acknowledged
    /// everything.
    pub fn heartbeat(&mut self) -> Vec<Outgoing> {
        let last_sn = self.last_sn;
        let pending: Vec<Guid> = self
            .readers
            .values()
            .filter(|r| r.reliable && r.acked < last_sn && last_sn > r.baseline)
            .map(|r| r.remote)
            .collect();
        pending
            .iter()
            .filter_map(|remote| self.heartbeat_to(remote))
            .collect()
    }

    /// Process an ACKNACK: record the acknowledgment, resend requested
    /// samples still in history and GAP the ones that are gone.
    ///
    /// ACKNACKs from unknown readers and replays (count not above the last
    /// seen) are ignored.
    pub fn on_acknack(&mut self, msg: &AckNackMsg) -> AckNackOutcome {
        let mut outcome = AckNackOutcome::default();
        let last_sn = self.last_sn;
        let Some(reader) = self.readers.get_mut(&msg.reader) else {
            log::trace!("[RELIABLE] Writer {} ignoring ACKNACK from unknown {}", self.guid, msg.reader);
            return outcome;
        };
        if !reader.reliable {
            return outcome;
        }
        if reader.last_acknack_count.is_some_and(|c| msg.count <= c) {
            log::trace!(
                "[RELIABLE] Writer {} dropping stale ACKNACK #{} from {}",
                self.guid,
                msg.count,
                msg.reader
            );
            return outcome;
        }
        reader.last_acknack_count = Some(msg.count);

        let acked_up_to = msg.acked_up_to().min(last_sn);
        let previous = reader.acked;
        if acked_up_to > previous {
            reader.acked = acked_up_to;
        }
        let baseline = reader.baseline;
        let reader = reader.clone();

        if acked_up_to > previous {
            outcome.acked = self
                .history
                .entries_after(previous)
                .take_while(|e| e.sequence.to_linear() <= acked_up_to)
                .map(|e| (e.sequence, e.instance))
                .collect();
        }

        let mut gaps = Vec::new();
        for requested in msg.set.iter() {
            let seq = requested.to_linear();
            if seq == 0 || seq > last_sn {
                continue;
            }
            if seq <= baseline {
                gaps.push(seq);
                continue;
            }
            match self.history.get(requested) {
                Some(entry) if !entry.excludes(&reader.remote.prefix) => {
                    match self.history.payload(entry) {
                        Some(bytes) => outcome
                            .outgoing
                            .push(self.data_to(&reader, entry, bytes.to_vec())),
                        None => gaps.push(seq),
                    }
                }
                _ => gaps.push(seq),
            }
        }
        let resent = outcome.outgoing.len();
        if !gaps.is_empty() {
            outcome.outgoing.extend(self.gaps_to(&reader, &gaps));
        }
        if resent > 0 || !gaps.is_empty() {
            log::debug!(
                "[RELIABLE] Writer {} -> {}: resent {}, gapped {}",
                self.guid,
                reader.remote,
                resent,
                gaps.len()
            );
            outcome.outgoing.extend(self.heartbeat_to(&reader.remote));
        }
        outcome
    }

    /// Drop history entries every reliable reader acknowledged.
    ///
    /// Only `Volatile` and `KeepAll` writers do this: durable `KeepLast`
    /// writers keep samples for late joiners and evict by depth instead.
    /// Returns the number of entries removed.
    pub fn remove_acknowledged(&mut self) -> usize {
        let volatile = self.qos.durability == Durability::Volatile;
        let keep_all = self.history.history() == History::KeepAll;
        if !(volatile || keep_all) {
            return 0;
        }
        let bound = match self
            .readers
            .values()
            .filter(|r| r.reliable)
            .map(|r| r.acked)
            .min()
        {
            Some(min) => min,
            None if volatile => self.last_sn,
            None => return 0,
        };
        let removed = self
            .history
            .remove_where(|e| e.sequence.to_linear() <= bound);
        self.unpersist(&removed);
        removed.len()
    }

    /// Drop history entries whose instance matches `predicate` (subjects of
    /// a purged participant in builtin writers).
    pub fn remove_instances<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&InstanceHandle) -> bool,
    {
        let removed = self.history.remove_where(|e| predicate(&e.instance));
        self.unpersist(&removed);
        removed.len()
    }

    fn unpersist(&self, removed: &[SequenceNumber]) {
        let Some(store) = &self.persistence else {
            return;
        };
        for seq in removed {
            if let Err(e) = store.remove_writer_change(&self.guid, *seq) {
                log::warn!("[RELIABLE] Writer {} failed to unpersist {}: {}", self.guid, seq, e);
            }
        }
    }

    /// True when every reliable reader acknowledged `sequence`.
    #[must_use]
    pub fn is_acked_by_all(&self, sequence: SequenceNumber) -> bool {
        let seq = sequence.to_linear();
        self.readers
            .values()
            .filter(|r| r.reliable)
            .all(|r| r.acked >= seq || seq <= r.baseline)
    }

    #[must_use]
    pub fn reader_state(&self, remote: &Guid) -> Option<&WriterProxyState> {
        self.readers.get(remote)
    }

    #[must_use]
    pub fn match_state(&self, remote: &Guid) -> WriterMatchState {
        self.readers
            .get(remote)
            .map_or(WriterMatchState::Unmatched, |r| r.state(self.last_sn))
    }

    #[must_use]
    pub fn matched_readers(&self) -> Vec<Guid> {
        self.readers.keys().copied().collect()
    }

    #[must_use]
    pub fn is_matched(&self, remote: &Guid) -> bool {
        self.readers.contains_key(remote)
    }
}
