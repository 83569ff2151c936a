// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side history kept for retransmission and late joiners.
//!
//! Eviction follows the writer QoS:
//!
//! | History | Instance depth reached | `max_samples` reached |
//! |---------|------------------------|-----------------------|
//! | `KeepLast(n)` | drop the instance's oldest entry | drop the oldest entry |
//! | `KeepAll` | `WouldBlock` | `WouldBlock` |
//!
//! User topics are unkeyed, so `KeepLast(n)` bounds the whole writer. Builtin
//! discovery writers key entries by subject Guid and keep the latest record
//! of every subject.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::{Guid, GuidPrefix, InstanceHandle, SequenceNumber};
use crate::error::{Error, Result};
use crate::payload_pool::{BufferHandle, PayloadPool};
use crate::qos::{History, QoS};

/// One written sample.
#[derive(Debug, Clone)]
pub struct WriterHistoryEntry {
    pub sequence: SequenceNumber,
    pub payload: BufferHandle,
    pub timestamp: SystemTime,
    pub related_request: Option<Guid>,
    pub instance: InstanceHandle,
    /// Participants that must receive a GAP instead of this sample.
    pub exclude: Vec<GuidPrefix>,
}

impl WriterHistoryEntry {
    /// True when readers of `prefix` must not get this sample.
    #[must_use]
    pub fn excludes(&self, prefix: &GuidPrefix) -> bool {
        self.exclude.contains(prefix)
    }
}

/// Bounded, sequence-ordered sample store.
pub struct WriterHistory {
    entries: BTreeMap<u64, WriterHistoryEntry>,
    instances: HashMap<InstanceHandle, VecDeque<u64>>,
    history: History,
    depth: usize,
    max_samples: usize,
    max_instances: usize,
    pool: Arc<dyn PayloadPool>,
}

impl std::fmt::Debug for WriterHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHistory")
            .field("len", &self.entries.len())
            .field("history", &self.history)
            .field("depth", &self.depth)
            .finish()
    }
}

impl WriterHistory {
    #[must_use]
    pub fn new(qos: &QoS, pool: Arc<dyn PayloadPool>) -> Self {
        Self {
            entries: BTreeMap::new(),
            instances: HashMap::new(),
            history: qos.history,
            depth: qos.history_capacity().max(1),
            max_samples: qos.resource_limits.max_samples.max(1),
            max_instances: qos.resource_limits.max_instances.max(1),
            pool,
        }
    }

    /// Check that a sample of `instance` can be added. Call before
    /// acquiring its payload buffer.
    pub fn reserve(&self, instance: &InstanceHandle) -> Result<()> {
        let instance_len = self.instances.get(instance).map_or(0, VecDeque::len);
        if instance_len == 0 && self.instances.len() >= self.max_instances {
            return Err(Error::WouldBlock);
        }
        match self.history {
            History::KeepLast(_) => Ok(()),
            History::KeepAll => {
                if instance_len >= self.depth || self.entries.len() >= self.max_samples {
                    Err(Error::WouldBlock)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Add an entry. Returns the sequence numbers evicted to make room.
    pub fn insert(&mut self, entry: WriterHistoryEntry) -> Result<Vec<SequenceNumber>> {
        self.reserve(&entry.instance)?;
        let mut evicted = Vec::new();
        if let History::KeepLast(_) = self.history {
            let instance_len = self.instances.get(&entry.instance).map_or(0, VecDeque::len);
            if instance_len >= self.depth {
                let oldest = self
                    .instances
                    .get(&entry.instance)
                    .and_then(|q| q.front().copied());
                if let Some(seq) = oldest {
                    self.remove(SequenceNumber::from_linear(seq));
                    evicted.push(SequenceNumber::from_linear(seq));
                }
            }
            if self.entries.len() >= self.max_samples {
                if let Some(seq) = self.entries.keys().next().copied() {
                    self.remove(SequenceNumber::from_linear(seq));
                    evicted.push(SequenceNumber::from_linear(seq));
                }
            }
        }
        let seq = entry.sequence.to_linear();
        self.instances.entry(entry.instance).or_default().push_back(seq);
        self.entries.insert(seq, entry);
        Ok(evicted)
    }

    /// Drop one entry and release its buffer.
    pub fn remove(&mut self, sequence: SequenceNumber) -> Option<WriterHistoryEntry> {
        let seq = sequence.to_linear();
        let entry = self.entries.remove(&seq)?;
        if let Some(queue) = self.instances.get_mut(&entry.instance) {
            queue.retain(|s| *s != seq);
            if queue.is_empty() {
                self.instances.remove(&entry.instance);
            }
        }
        self.pool.release(entry.payload);
        Some(entry)
    }

    /// Drop every entry matching `predicate`; returns their sequence numbers.
    pub fn remove_where<F>(&mut self, predicate: F) -> Vec<SequenceNumber>
    where
        F: Fn(&WriterHistoryEntry) -> bool,
    {
        let doomed: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| predicate(e))
            .map(|(s, _)| *s)
            .collect();
        doomed
            .into_iter()
            .filter_map(|s| self.remove(SequenceNumber::from_linear(s)))
            .map(|e| e.sequence)
            .collect()
    }

    #[must_use]
    pub fn get(&self, sequence: SequenceNumber) -> Option<&WriterHistoryEntry> {
        self.entries.get(&sequence.to_linear())
    }

    /// Payload bytes of an entry.
    #[must_use]
    pub fn payload(&self, entry: &WriterHistoryEntry) -> Option<Arc<[u8]>> {
        self.pool.read(&entry.payload)
    }

    /// Lowest sequence number still held.
    #[must_use]
    pub fn first_sn(&self) -> Option<SequenceNumber> {
        self.entries.keys().next().map(|s| SequenceNumber::from_linear(*s))
    }

    /// Entries with a sequence number above `after`, ascending.
    pub fn entries_after(&self, after: u64) -> impl Iterator<Item = &WriterHistoryEntry> {
        self.entries
            .range(after.saturating_add(1)..)
            .map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriterHistoryEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn history(&self) -> History {
        self.history
    }

    /// Release every buffer.
    pub fn clear(&mut self) {
        for (_, entry) in std::mem::take(&mut self.entries) {
            self.pool.release(entry.payload);
        }
        self.instances.clear();
    }
}

impl Drop for WriterHistory {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;
    use crate::payload_pool::HeapPayloadPool;

    fn entry(pool: &HeapPayloadPool, seq: u64, instance: InstanceHandle) -> WriterHistoryEntry {
        WriterHistoryEntry {
            sequence: SequenceNumber::from_linear(seq),
            payload: pool.store(&[seq as u8]).expect("store"),
            timestamp: SystemTime::now(),
            related_request: None,
            instance,
            exclude: Vec::new(),
        }
    }

    #[test]
    fn test_keep_last_evicts_oldest() {
        let pool = Arc::new(HeapPayloadPool::unbounded());
        let mut history = WriterHistory::new(&QoS::reliable().keep_last(2), pool.clone());
        for seq in 1..=2 {
            let evicted = history
                .insert(entry(&pool, seq, InstanceHandle::UNKEYED))
                .expect("insert");
            assert!(evicted.is_empty());
        }
        let evicted = history
            .insert(entry(&pool, 3, InstanceHandle::UNKEYED))
            .expect("insert");
        assert_eq!(evicted, vec![SequenceNumber::from_linear(1)]);
        assert_eq!(history.first_sn(), Some(SequenceNumber::from_linear(2)));
        assert_eq!(pool.live_buffers(), 2, "evicted buffer released");
    }

    #[test]
    fn test_keep_last_is_per_instance() {
        let pool = Arc::new(HeapPayloadPool::unbounded());
        let mut history = WriterHistory::new(&QoS::builtin(), pool.clone());
        let a = InstanceHandle::from(Guid::new(GuidPrefix::new([1; 12]), EntityId::PARTICIPANT));
        let b = InstanceHandle::from(Guid::new(GuidPrefix::new([2; 12]), EntityId::PARTICIPANT));
        history.insert(entry(&pool, 1, a)).expect("insert");
        history.insert(entry(&pool, 2, b)).expect("insert");
        let evicted = history.insert(entry(&pool, 3, a)).expect("insert");
        assert_eq!(evicted, vec![SequenceNumber::from_linear(1)]);
        assert!(history.get(SequenceNumber::from_linear(2)).is_some());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_keep_all_blocks_when_full() {
        let pool = Arc::new(HeapPayloadPool::unbounded());
        let mut history = WriterHistory::new(&QoS::reliable().keep_all().max_samples(2), pool.clone());
        history.insert(entry(&pool, 1, InstanceHandle::UNKEYED)).expect("insert");
        history.insert(entry(&pool, 2, InstanceHandle::UNKEYED)).expect("insert");
        assert!(matches!(
            history.reserve(&InstanceHandle::UNKEYED),
            Err(Error::WouldBlock)
        ));
        history.remove(SequenceNumber::from_linear(1));
        assert!(history.reserve(&InstanceHandle::UNKEYED).is_ok());
    }

    #[test]
    fn test_remove_where_and_entries_after() {
        let pool = Arc::new(HeapPayloadPool::unbounded());
        let mut history = WriterHistory::new(&QoS::reliable().keep_last(10), pool.clone());
        for seq in 1..=4 {
            history.insert(entry(&pool, seq, InstanceHandle::UNKEYED)).expect("insert");
        }
        let after: Vec<u64> = history
            .entries_after(2)
            .map(|e| e.sequence.to_linear())
            .collect();
        assert_eq!(after, vec![3, 4]);
        let removed = history.remove_where(|e| e.sequence.to_linear() % 2 == 0);
        assert_eq!(removed.len(), 2);
        drop(history);
        assert_eq!(pool.live_buffers(), 0, "drop releases every buffer");
    }
}
