// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader side of the reliable protocol.
//!
//! One [`ReliableReader`] per local reader. Reliable writers get a
//! [`GapTracker`] each: samples are delivered in sequence order, missing
//! numbers are requested with ACKNACK after a randomized delay, GAPs and
//! HEARTBEATs move the window forward. Best-effort writers are delivered
//! as they arrive, dropping anything not newer than the last delivery.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{Guid, GuidPrefix, InstanceHandle, LocatorList, SequenceNumber};
use crate::error::{Error, Result};
use crate::listener::{DiscoveryEvent, SampleLostStatus};
use crate::persistence::Persistence;
use crate::qos::QoS;
use crate::wire::{Outgoing, Submessage};

use super::gap_tracker::GapTracker;
use super::messages::{AckNackMsg, DataMsg, GapMsg, HeartbeatMsg};

/// A delivered sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub writer: Guid,
    pub sequence: SequenceNumber,
    pub instance: InstanceHandle,
    pub related_request: Option<Guid>,
    pub payload: Vec<u8>,
}

impl From<DataMsg> for Sample {
    fn from(msg: DataMsg) -> Self {
        Self {
            writer: msg.writer,
            sequence: msg.sequence,
            instance: msg.instance,
            related_request: msg.related_request,
            payload: msg.payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMatchState {
    /// Neither data nor a heartbeat arrived yet.
    NothingReceived,
    Receiving,
    /// Samples announced by the writer are missing.
    RequestingResend,
}

/// Reader-side state of one matched writer.
#[derive(Debug)]
pub struct ReaderProxyState {
    pub remote: Guid,
    pub locators: LocatorList,
    pub reliable: bool,
    tracker: GapTracker,
    pending: BTreeMap<u64, Sample>,
    /// Highest sequence number the writer announced or sent.
    last_available: u64,
    /// A heartbeat was processed.
    synced: bool,
    received_any: bool,
    last_heartbeat_count: Option<u32>,
    nack_due: Option<Instant>,
    highest_best_effort: u64,
    persisted_next: u64,
}

impl ReaderProxyState {
    fn new(remote: Guid, locators: LocatorList, reliable: bool, next_expected: u64) -> Self {
        Self {
            remote,
            locators,
            reliable,
            tracker: GapTracker::starting_at(next_expected),
            pending: BTreeMap::new(),
            last_available: next_expected.saturating_sub(1),
            synced: false,
            received_any: false,
            last_heartbeat_count: None,
            nack_due: None,
            highest_best_effort: next_expected.saturating_sub(1),
            persisted_next: next_expected,
        }
    }

    #[must_use]
    pub fn next_expected(&self) -> SequenceNumber {
        SequenceNumber::from_linear(self.tracker.next_expected())
    }

    #[must_use]
    pub fn last_available(&self) -> SequenceNumber {
        SequenceNumber::from_linear(self.last_available)
    }

    /// Sequence numbers still missing from the announced range.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.tracker.total_missing(self.last_available)
    }

    #[must_use]
    pub fn state(&self) -> ReaderMatchState {
        if !self.received_any && !self.synced {
            ReaderMatchState::NothingReceived
        } else if self.reliable && self.synced && self.missing() > 0 {
            ReaderMatchState::RequestingResend
        } else {
            ReaderMatchState::Receiving
        }
    }

    fn drain_deliverable(&mut self, ready: &mut VecDeque<Sample>) -> usize {
        let deliverable = self.tracker.advance();
        let mut delivered = 0;
        for seq in deliverable {
            if let Some(sample) = self.pending.remove(&seq) {
                ready.push_back(sample);
                delivered += 1;
            }
        }
        // Anything skipped by a GAP or heartbeat is gone for good.
        let floor = self.tracker.next_expected();
        self.pending.retain(|seq, _| *seq >= floor);
        delivered
    }
}

pub struct ReliableReader {
    guid: Guid,
    qos: QoS,
    writers: BTreeMap<Guid, ReaderProxyState>,
    ready: VecDeque<Sample>,
    nack_response_max_delay: Duration,
    acknack_count: u32,
    lost: SampleLostStatus,
    persistence: Option<Arc<dyn Persistence>>,
    resume: HashMap<Guid, SequenceNumber>,
}

impl std::fmt::Debug for ReliableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableReader")
            .field("guid", &self.guid)
            .field("writers", &self.writers.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}

impl ReliableReader {
    /// Create a reader. Durable readers with a persistence store resume
    /// each writer at the sequence number they last acknowledged.
    pub fn new(
        guid: Guid,
        qos: QoS,
        nack_response_max_delay: Duration,
        persistence: Option<Arc<dyn Persistence>>,
    ) -> Result<Self> {
        let (persistence, resume) = match persistence {
            Some(store) if qos.durability.is_durable() => {
                let resume = store.load_reader_ack_state(&guid)?;
                (Some(store), resume)
            }
            _ => (None, HashMap::new()),
        };
        Ok(Self {
            guid,
            qos,
            writers: BTreeMap::new(),
            ready: VecDeque::new(),
            nack_response_max_delay,
            acknack_count: 0,
            lost: SampleLostStatus::default(),
            persistence,
            resume,
        })
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[must_use]
    pub fn qos(&self) -> &QoS {
        &self.qos
    }

    /// Start accepting samples from a writer. A known writer only has its
    /// locators updated.
    pub fn match_writer(&mut self, remote: Guid, locators: LocatorList, reliable: bool) {
        if let Some(existing) = self.writers.get_mut(&remote) {
            existing.locators = locators;
            return;
        }
        let next = self
            .resume
            .get(&remote)
            .map_or(1, |s| s.to_linear().max(1));
        log::debug!(
            "[RELIABLE] Reader {} matched writer {} (reliable={}, next={})",
            self.guid,
            remote,
            reliable,
            next
        );
        self.writers
            .insert(remote, ReaderProxyState::new(remote, locators, reliable, next));
    }

    /// Forget a writer; undelivered samples from it are dropped.
    pub fn unmatch_writer(&mut self, remote: &Guid) -> bool {
        let removed = self.writers.remove(remote).is_some();
        if removed {
            log::debug!("[RELIABLE] Reader {} unmatched writer {}", self.guid, remote);
        }
        removed
    }

    /// Unmatch every writer of a participant; returns their Guids.
    pub fn unmatch_participant(&mut self, prefix: &GuidPrefix) -> Vec<Guid> {
        let doomed: Vec<Guid> = self
            .writers
            .keys()
            .filter(|g| g.prefix == *prefix)
            .copied()
            .collect();
        for guid in &doomed {
            self.writers.remove(guid);
        }
        doomed
    }

    /// Accept a DATA submessage. Returns the number of samples that became
    /// available to [`ReliableReader::take`].
    pub fn on_data(&mut self, msg: DataMsg) -> usize {
        let Some(proxy) = self.writers.get_mut(&msg.writer) else {
            log::trace!("[RELIABLE] Reader {} ignoring DATA from unmatched {}", self.guid, msg.writer);
            return 0;
        };
        let seq = msg.sequence.to_linear();
        proxy.received_any = true;
        if !proxy.reliable {
            if seq <= proxy.highest_best_effort {
                return 0;
            }
            proxy.highest_best_effort = seq;
            self.ready.push_back(Sample::from(msg));
            return 1;
        }
        proxy.last_available = proxy.last_available.max(seq);
        if !proxy.tracker.on_receive(seq) {
            log::trace!("[RELIABLE] Reader {} duplicate {} from {}", self.guid, seq, msg.writer);
            return 0;
        }
        proxy.pending.insert(seq, Sample::from(msg));
        proxy.drain_deliverable(&mut self.ready)
    }

    /// Process a HEARTBEAT.
    ///
    /// The first heartbeat from a writer moves the window to its first
    /// available sample without counting anything as lost; later heartbeats
    /// that skip undelivered samples produce a `SampleLost` event. A
    /// heartbeat whose `last_sn` is below one already announced is a
    /// protocol violation.
    pub fn on_heartbeat(
        &mut self,
        msg: &HeartbeatMsg,
        now: Instant,
    ) -> Result<Option<DiscoveryEvent>> {
        let max_delay = self.nack_response_max_delay;
        let Some(proxy) = self.writers.get_mut(&msg.writer) else {
            return Ok(None);
        };
        if !proxy.reliable {
            return Ok(None);
        }
        if proxy.last_heartbeat_count.is_some_and(|c| msg.count <= c) {
            return Ok(None);
        }
        let last = msg.last_sn.to_linear();
        if proxy.synced && last < proxy.last_available {
            return Err(Error::ProtocolViolation {
                peer: msg.writer,
                reason: format!(
                    "heartbeat last_sn {} below previously announced {}",
                    last, proxy.last_available
                ),
            });
        }
        proxy.last_heartbeat_count = Some(msg.count);

        let first = msg.first_sn.to_linear();
        let skipped = proxy.tracker.skip_to(first);
        let lost = if proxy.synced { skipped } else { 0 };
        proxy.synced = true;
        proxy.last_available = proxy.last_available.max(last);
        proxy.drain_deliverable(&mut self.ready);

        if proxy.nack_due.is_none() && (!msg.final_flag || proxy.missing() > 0) {
            let jitter = fastrand::u64(0..=max_delay.as_micros() as u64);
            proxy.nack_due = Some(now + Duration::from_micros(jitter));
        }

        if lost == 0 {
            return Ok(None);
        }
        self.lost.total_count = self.lost.total_count.saturating_add(lost as u32);
        self.lost.total_count_change = lost as i32;
        log::debug!(
            "[RELIABLE] Reader {} lost {} samples from {}",
            self.guid,
            lost,
            msg.writer
        );
        Ok(Some(DiscoveryEvent::SampleLost {
            reader: self.guid,
            writer: msg.writer,
            status: self.lost.clone(),
        }))
    }

    /// Process a GAP. Returns the number of samples that became available.
    pub fn on_gap(&mut self, msg: &GapMsg) -> usize {
        let Some(proxy) = self.writers.get_mut(&msg.writer) else {
            return 0;
        };
        if !proxy.reliable {
            return 0;
        }
        for range in msg.lost_ranges() {
            proxy.last_available = proxy.last_available.max(range.end.saturating_sub(1));
            proxy.tracker.mark_irrelevant(range);
        }
        proxy.drain_deliverable(&mut self.ready)
    }

    /// ACKNACKs whose response delay elapsed.
    pub fn poll_acknacks(&mut self, now: Instant) -> Vec<Outgoing> {
        let mut out = Vec::new();
        for proxy in self.writers.values_mut() {
            match proxy.nack_due {
                Some(due) if due <= now => proxy.nack_due = None,
                _ => continue,
            }
            let set = proxy.tracker.missing_set(proxy.last_available);
            self.acknack_count = self.acknack_count.wrapping_add(1);
            log::trace!(
                "[RELIABLE] Reader {} ACKNACK #{} -> {} (base {}, {} missing)",
                self.guid,
                self.acknack_count,
                proxy.remote,
                set.base(),
                set.len()
            );
            out.push(Outgoing::new(
                proxy.locators.clone(),
                Submessage::AckNack(AckNackMsg {
                    reader: self.guid,
                    writer: proxy.remote,
                    set,
                    count: self.acknack_count,
                }),
            ));

            let next = proxy.tracker.next_expected();
            if let Some(store) = &self.persistence {
                if next != proxy.persisted_next {
                    match store.update_reader_ack_state(
                        &self.guid,
                        &proxy.remote,
                        SequenceNumber::from_linear(next),
                    ) {
                        Ok(()) => proxy.persisted_next = next,
                        Err(e) => log::warn!(
                            "[RELIABLE] Reader {} failed to persist ack state: {}",
                            self.guid,
                            e
                        ),
                    }
                }
            }
        }
        out
    }

    /// Earliest pending ACKNACK deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.writers.values().filter_map(|p| p.nack_due).min()
    }

    /// Remove and return every delivered sample, in delivery order.
    pub fn take(&mut self) -> Vec<Sample> {
        self.ready.drain(..).collect()
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.ready.len()
    }

    #[must_use]
    pub fn writer_state(&self, remote: &Guid) -> Option<&ReaderProxyState> {
        self.writers.get(remote)
    }

    #[must_use]
    pub fn match_state(&self, remote: &Guid) -> Option<ReaderMatchState> {
        self.writers.get(remote).map(ReaderProxyState::state)
    }

    #[must_use]
    pub fn matched_writers(&self) -> Vec<Guid> {
        self.writers.keys().copied().collect()
    }

    #[must_use]
    pub fn is_matched(&self, remote: &Guid) -> bool {
        self.writers.contains_key(remote)
    }

    #[must_use]
    pub fn sample_lost_status(&self) -> &SampleLostStatus {
        &self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, Locator};
    use crate::persistence::InMemoryPersistence;

    fn writer_guid() -> Guid {
        Guid::new(GuidPrefix::new([1; 12]), EntityId::user_writer(1))
    }

    fn reader_guid() -> Guid {
        Guid::new(GuidPrefix::new([2; 12]), EntityId::user_reader(1))
    }

    fn reader() -> ReliableReader {
        let mut r = ReliableReader::new(
            reader_guid(),
            QoS::reliable().keep_all(),
            Duration::ZERO,
            None,
        )
        .expect("reader");
        r.match_writer(writer_guid(), LocatorList::from(Locator::loopback(1)), true);
        r
    }

    fn data(seq: u64) -> DataMsg {
        DataMsg {
            writer: writer_guid(),
            reader: reader_guid(),
            sequence: SequenceNumber::from_linear(seq),
            instance: InstanceHandle::UNKEYED,
            related_request: None,
            payload: vec![seq as u8],
        }
    }

    fn heartbeat(first: u64, last: u64, count: u32) -> HeartbeatMsg {
        HeartbeatMsg {
            writer: writer_guid(),
            reader: reader_guid(),
            first_sn: SequenceNumber::from_linear(first),
            last_sn: SequenceNumber::from_linear(last),
            count,
            final_flag: false,
        }
    }

    fn sequences(samples: &[Sample]) -> Vec<u64> {
        samples.iter().map(|s| s.sequence.to_linear()).collect()
    }

    #[test]
    fn test_in_order_delivery_holds_back_out_of_order() {
        let mut r = reader();
        assert_eq!(r.on_data(data(1)), 1);
        assert_eq!(r.on_data(data(3)), 0);
        assert_eq!(r.on_data(data(3)), 0, "duplicate");
        assert_eq!(r.on_data(data(2)), 2);
        assert_eq!(sequences(&r.take()), vec![1, 2, 3]);
    }

    #[test]
    fn test_heartbeat_schedules_acknack_for_missing() {
        let mut r = reader();
        let now = Instant::now();
        r.on_data(data(2));
        assert!(r.on_heartbeat(&heartbeat(1, 3, 1), now).expect("hb").is_none());
        assert_eq!(r.match_state(&writer_guid()), Some(ReaderMatchState::RequestingResend));

        let out = r.poll_acknacks(now);
        assert_eq!(out.len(), 1);
        match &out[0].submessage {
            Submessage::AckNack(ack) => {
                assert_eq!(ack.set.base().to_linear(), 1);
                let missing: Vec<u64> = ack.set.iter().map(|s| s.to_linear()).collect();
                assert_eq!(missing, vec![1, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(r.poll_acknacks(now).is_empty(), "one response per heartbeat");
    }

    #[test]
    fn test_first_heartbeat_skips_without_loss() {
        let mut r = reader();
        let event = r.on_heartbeat(&heartbeat(5, 6, 1), Instant::now()).expect("hb");
        assert!(event.is_none(), "a late joiner has lost nothing");
        r.on_data(data(5));
        r.on_data(data(6));
        assert_eq!(sequences(&r.take()), vec![5, 6]);
    }

    #[test]
    fn test_later_skip_reports_sample_lost() {
        let mut r = reader();
        let now = Instant::now();
        r.on_heartbeat(&heartbeat(1, 2, 1), now).expect("hb");
        let event = r.on_heartbeat(&heartbeat(3, 4, 2), now).expect("hb");
        match event {
            Some(DiscoveryEvent::SampleLost { status, .. }) => {
                assert_eq!(status.total_count, 2);
                assert_eq!(status.total_count_change, 2);
            }
            other => panic!("expected SampleLost, got {:?}", other),
        }
    }

    #[test]
    fn test_gap_unblocks_and_is_not_loss() {
        let mut r = reader();
        r.on_data(data(3));
        let gap = GapMsg::contiguous(writer_guid(), reader_guid(), 1..3).expect("gap");
        assert_eq!(r.on_gap(&gap), 1);
        assert_eq!(sequences(&r.take()), vec![3]);
        assert_eq!(r.sample_lost_status().total_count, 0);
    }

    #[test]
    fn test_regressing_heartbeat_is_violation() {
        let mut r = reader();
        let now = Instant::now();
        r.on_heartbeat(&heartbeat(1, 5, 1), now).expect("hb");
        assert!(matches!(
            r.on_heartbeat(&heartbeat(1, 3, 2), now),
            Err(Error::ProtocolViolation { .. })
        ));
        assert!(
            r.on_heartbeat(&heartbeat(1, 3, 1), now).expect("replay").is_none(),
            "stale count ignored"
        );
    }

    #[test]
    fn test_best_effort_drops_old_samples() {
        let mut r = ReliableReader::new(reader_guid(), QoS::best_effort(), Duration::ZERO, None)
            .expect("reader");
        r.match_writer(writer_guid(), LocatorList::new(), false);
        assert_eq!(r.on_data(data(2)), 1);
        assert_eq!(r.on_data(data(1)), 0);
        assert_eq!(r.on_data(data(4)), 1);
        assert_eq!(sequences(&r.take()), vec![2, 4]);
    }

    #[test]
    fn test_unknown_writer_ignored() {
        let mut r = reader();
        let mut msg = data(1);
        msg.writer = Guid::new(GuidPrefix::new([9; 12]), EntityId::user_writer(1));
        assert_eq!(r.on_data(msg), 0);
        assert_eq!(r.available(), 0);
    }

    #[test]
    fn test_durable_reader_resumes() {
        let store: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        let qos = QoS::reliable().transient().keep_all();
        let now = Instant::now();
        {
            let mut r = ReliableReader::new(reader_guid(), qos.clone(), Duration::ZERO, Some(Arc::clone(&store)))
                .expect("reader");
            r.match_writer(writer_guid(), LocatorList::new(), true);
            r.on_data(data(1));
            r.on_data(data(2));
            r.on_heartbeat(&heartbeat(1, 2, 1), now).expect("hb");
            r.poll_acknacks(now);
        }
        let mut r = ReliableReader::new(reader_guid(), qos, Duration::ZERO, Some(store))
            .expect("reader");
        r.match_writer(writer_guid(), LocatorList::new(), true);
        assert_eq!(r.on_data(data(2)), 0, "already acknowledged before restart");
        assert_eq!(r.on_data(data(3)), 1);
    }
}
