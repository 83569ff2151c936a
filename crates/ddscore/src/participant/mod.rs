// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Participant
//!
//! The context object owning everything one participant needs: the
//! discovery engine, the builtin and user endpoints, the timer queue and the
//! collaborators (transport, codec, payload pool, persistence). It is built
//! explicitly with [`Participant::builder`] and torn down with
//! [`Participant::shutdown`]; nothing is process-global.
//!
//! ## Threading
//!
//! | Context | Entry point |
//! |---------|-------------|
//! | event thread (or the test driving the clock) | [`Participant::tick`], datagram processing |
//! | transport receive thread | [`Participant::on_receive`] |
//! | application threads | [`WriterHandle::write`], [`ReaderHandle::take`], create/delete |
//!
//! Locks are short and never held across a send. The discovery engine lock
//! is taken before endpoint locks, never after. Outgoing messages and
//! listener events are collected under the locks and flushed once they are
//! released.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --start--> Running --shutdown--> ShuttingDown --> Stopped
//!                       |
//!                       +-- invariant violation --> Failed
//! ```

mod builder;
mod endpoints;
mod event_loop;
pub mod timer;

pub use builder::ParticipantBuilder;
pub use endpoints::{ReaderHandle, WriterHandle};
pub use timer::{TimerKind, TimerQueue};

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::ParticipantConfig;
use crate::core::{EntityId, Guid, GuidPrefix, InstanceHandle, Locator, LocatorList};
use crate::discovery::{backup, DatabaseSnapshot, DiscoveryEngine, Effect, MatchInfo};
use crate::error::{Error, Result};
use crate::listener::{DiscoveryEvent, Listener, ListenerSet};
use crate::payload_pool::PayloadPool;
use crate::persistence::Persistence;
use crate::proxy::{EndpointProxyData, ParticipantKind, ParticipantProxyData, ProxyData};
use crate::qos::QoS;
use crate::reliability::{ReliableReader, ReliableWriter};
use crate::transport::{ReceiveHandler, Transport};
use crate::wire::{decode_record, encode_record, Codec, Envelope, Outgoing, Submessage};

use endpoints::{ReaderSlot, WriterSlot};
use event_loop::{EventLoop, Work};

/// Builtin writers and readers, in creation order.
const BUILTIN_WRITERS: [EntityId; 3] = [
    EntityId::SEDP_PUBLICATIONS_WRITER,
    EntityId::SEDP_SUBSCRIPTIONS_WRITER,
    EntityId::PDP_RELAY_WRITER,
];
const BUILTIN_READERS: [EntityId; 3] = [
    EntityId::SEDP_PUBLICATIONS_READER,
    EntityId::SEDP_SUBSCRIPTIONS_READER,
    EntityId::PDP_RELAY_READER,
];

/// Lifecycle state of a [`Participant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Created,
    Running,
    /// Dispose announced; no record is accepted anymore.
    ShuttingDown,
    Stopped,
    /// Aborted after an internal invariant violation.
    Failed,
}

/// Messages and events produced while locks were held.
#[derive(Default)]
struct Batch {
    outgoing: Vec<Outgoing>,
    events: Vec<DiscoveryEvent>,
}

pub struct Participant {
    config: ParticipantConfig,
    prefix: GuidPrefix,
    state: Mutex<ParticipantState>,
    engine: Mutex<DiscoveryEngine>,
    writers: DashMap<Guid, Arc<WriterSlot>>,
    readers: DashMap<Guid, Arc<ReaderSlot>>,
    timers: Mutex<TimerQueue>,
    /// Time of the latest `tick` when no event thread runs.
    clock: Mutex<Instant>,
    threaded: AtomicBool,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    pool: Arc<dyn PayloadPool>,
    persistence: Option<Arc<dyn Persistence>>,
    listeners: ListenerSet,
    unicast: LocatorList,
    next_entity_key: AtomicU32,
    /// Submessages addressed to our own locators.
    local_inbox: Mutex<VecDeque<Submessage>>,
    draining: AtomicBool,
    event_loop: Mutex<Option<EventLoop>>,
    pending_restore: Mutex<Option<DatabaseSnapshot>>,
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("name", &self.config.name)
            .field("prefix", &self.prefix)
            .field("state", &self.state())
            .field("writers", &self.writers.len())
            .field("readers", &self.readers.len())
            .finish_non_exhaustive()
    }
}

/// Transport callback; holds the participant weakly so the transport never
/// keeps it alive.
struct Inbound {
    participant: Weak<Participant>,
}

impl ReceiveHandler for Inbound {
    fn on_receive(&self, bytes: &[u8], source: Locator) {
        if let Some(participant) = self.participant.upgrade() {
            participant.on_receive(bytes, source);
        }
    }
}

impl Participant {
    /// Start configuring a participant called `name`.
    #[must_use]
    pub fn builder(name: &str) -> ParticipantBuilder {
        ParticipantBuilder::new(name)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: ParticipantConfig,
        local: ParticipantProxyData,
        multicast: LocatorList,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        pool: Arc<dyn PayloadPool>,
        persistence: Option<Arc<dyn Persistence>>,
        listeners: Vec<Arc<dyn Listener>>,
        restore: Option<DatabaseSnapshot>,
    ) -> Result<Arc<Self>> {
        let prefix = local.guid.prefix;
        let unicast = local.default_unicast.clone();
        let builtin = local.builtin_endpoints;
        let engine = DiscoveryEngine::new(&config, local, multicast, unicast.clone());

        let listener_set = ListenerSet::new();
        for listener in listeners {
            listener_set.add(listener);
        }

        let participant = Arc::new(Self {
            config,
            prefix,
            state: Mutex::new(ParticipantState::Created),
            engine: Mutex::new(engine),
            writers: DashMap::new(),
            readers: DashMap::new(),
            timers: Mutex::new(TimerQueue::new()),
            clock: Mutex::new(Instant::now()),
            threaded: AtomicBool::new(false),
            transport,
            codec,
            pool,
            persistence,
            listeners: listener_set,
            unicast,
            next_entity_key: AtomicU32::new(1),
            local_inbox: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            event_loop: Mutex::new(None),
            pending_restore: Mutex::new(restore),
        });

        for id in BUILTIN_WRITERS.into_iter().filter(|id| builtin.has(*id)) {
            let guid = Guid::new(prefix, id);
            let writer = ReliableWriter::new(guid, QoS::builtin(), Arc::clone(&participant.pool), None)?;
            participant
                .writers
                .insert(guid, Arc::new(WriterSlot::new(writer, "builtin")));
        }
        for id in BUILTIN_READERS.into_iter().filter(|id| builtin.has(*id)) {
            let guid = Guid::new(prefix, id);
            let reader = ReliableReader::new(
                guid,
                QoS::builtin(),
                participant.config.nack_response_max_delay,
                None,
            )?;
            participant
                .readers
                .insert(guid, Arc::new(ReaderSlot::new(reader, "builtin")));
        }

        participant.transport.set_receiver(Arc::new(Inbound {
            participant: Arc::downgrade(&participant),
        }));
        log::info!(
            "[PARTICIPANT] Created '{}' {} ({}) on {:?}",
            participant.config.name,
            prefix,
            participant.kind(),
            participant.unicast
        );
        Ok(participant)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    #[must_use]
    pub fn prefix(&self) -> GuidPrefix {
        self.prefix
    }

    #[must_use]
    pub fn guid(&self) -> Guid {
        Guid::participant(self.prefix)
    }

    #[must_use]
    pub fn kind(&self) -> ParticipantKind {
        self.config.role.kind()
    }

    #[must_use]
    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ParticipantState {
        *self.state.lock()
    }

    /// Locators our endpoints receive on.
    #[must_use]
    pub fn unicast_locators(&self) -> &LocatorList {
        &self.unicast
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.add(listener);
    }

    /// Proxy of a remote participant or endpoint.
    #[must_use]
    pub fn find_proxy(&self, guid: &Guid) -> Option<ProxyData> {
        self.engine.lock().find_proxy(guid)
    }

    /// True while the discovery database holds `guid` alive.
    #[must_use]
    pub fn contains_alive(&self, guid: &Guid) -> bool {
        self.engine.lock().contains_alive(guid)
    }

    /// Remote participants currently known.
    #[must_use]
    pub fn discovered_participants(&self) -> Vec<ParticipantProxyData> {
        self.engine.lock().cache().participants().cloned().collect()
    }

    /// Run `f` against the discovery engine under its lock.
    pub fn with_engine<R>(&self, f: impl FnOnce(&DiscoveryEngine) -> R) -> R {
        f(&self.engine.lock())
    }

    /// Earliest armed timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.lock().next_deadline()
    }

    fn now(&self) -> Instant {
        if self.threaded.load(Ordering::Acquire) {
            Instant::now()
        } else {
            *self.clock.lock()
        }
    }

    pub(crate) fn check_usable(&self) -> Result<()> {
        match self.state() {
            ParticipantState::Created | ParticipantState::Running => Ok(()),
            state => Err(Error::InvalidState(format!("participant is {:?}", state))),
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start discovery with `now` as the current time. Time then advances
    /// only through [`Participant::tick`].
    pub fn start(&self, now: Instant) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ParticipantState::Created {
                return Err(Error::InvalidState(format!("cannot start from {:?}", *state)));
            }
            *state = ParticipantState::Running;
        }
        *self.clock.lock() = now;

        let mut batch = Batch::default();
        {
            let mut engine = self.engine.lock();
            engine.start(now);
            if let Some(snapshot) = self.pending_restore.lock().take() {
                let effects = engine.restore(snapshot, now);
                self.apply_effects(effects, now, &mut batch);
            }
        }
        {
            let mut timers = self.timers.lock();
            timers.schedule(TimerKind::Announce, now);
            timers.schedule(TimerKind::LeaseCheck, now + self.config.lease_check_period);
            timers.schedule(TimerKind::GarbageCollect, now + self.gc_period());
        }
        log::info!("[PARTICIPANT] {} running as {}", self.prefix, self.kind());
        self.flush(batch);
        self.tick(now);
        Ok(())
    }

    /// Start and hand the clock to a background event thread.
    pub fn start_background(self: &Arc<Self>) -> Result<()> {
        self.threaded.store(true, Ordering::Release);
        if let Err(e) = self.start(Instant::now()) {
            self.threaded.store(false, Ordering::Release);
            return Err(e);
        }
        let event_loop = EventLoop::spawn(Arc::downgrade(self), &self.config.name)?;
        *self.event_loop.lock() = Some(event_loop);
        Ok(())
    }

    /// Fire every timer due at `now`.
    pub fn tick(&self, now: Instant) {
        if self.state() != ParticipantState::Running {
            return;
        }
        {
            let mut clock = self.clock.lock();
            if now > *clock {
                *clock = now;
            }
        }
        let fired = self.timers.lock().pop_due(now);
        if fired.is_empty() {
            return;
        }
        let mut batch = Batch::default();
        for kind in fired {
            self.fire(kind, now, &mut batch);
        }
        self.flush(batch);
    }

    /// Announce our dispose, stop the event thread and release all state.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ParticipantState::ShuttingDown | ParticipantState::Stopped => return Ok(()),
                _ => *state = ParticipantState::ShuttingDown,
            }
        }
        let now = self.now();
        let mut batch = Batch::default();
        {
            let mut engine = self.engine.lock();
            let effects = engine.shutdown();
            self.apply_effects(effects, now, &mut batch);
        }
        self.flush(batch);

        let event_loop = self.event_loop.lock().take();
        if let Some(mut event_loop) = event_loop {
            event_loop.stop();
        }
        self.timers.lock().clear();

        let mut result = Ok(());
        if self.kind() == ParticipantKind::Backup {
            if let Some(path) = &self.config.backup_file {
                result = self.backup_to_file(path);
            }
        }

        self.writers.clear();
        self.readers.clear();
        self.local_inbox.lock().clear();
        self.listeners.clear();
        *self.state.lock() = ParticipantState::Stopped;
        log::info!("[PARTICIPANT] {} stopped", self.prefix);
        result
    }

    /// Abort after an internal invariant violation.
    fn fail(&self, error: &Error) {
        log::error!("[PARTICIPANT] {} aborting: {}", self.prefix, error);
        *self.state.lock() = ParticipantState::Failed;
        let event_loop = self.event_loop.lock().take();
        if let Some(mut event_loop) = event_loop {
            event_loop.stop();
        }
        self.timers.lock().clear();
    }

    fn escalate(&self, error: Error) -> Error {
        if error.is_fatal() {
            self.fail(&error);
        }
        error
    }

    /// Write a consistent snapshot of the discovery database to `path`.
    ///
    /// Entries removed while the file is written are only marked and purged
    /// afterwards.
    pub fn backup_to_file(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let mut engine = self.engine.lock();
            engine.start_backup();
            engine.snapshot()
        };
        let result = backup::save(path, &snapshot);
        let purged = self.engine.lock().finish_backup();
        match &result {
            Ok(()) => log::debug!(
                "[DDB] Backup of {} entries written to {} ({} purged)",
                snapshot.entries.len(),
                path.display(),
                purged
            ),
            Err(e) => log::debug!("[DDB] Backup to {} failed: {}", path.display(), e),
        }
        result
    }

    fn gc_period(&self) -> std::time::Duration {
        (self.config.tombstone_retention / 4).max(self.config.lease_check_period)
    }

    // ========================================================================
    // ENDPOINTS
    // ========================================================================

    fn next_key(&self) -> u32 {
        self.next_entity_key.fetch_add(1, Ordering::Relaxed)
    }

    pub fn create_writer(
        self: &Arc<Self>,
        topic: &str,
        type_name: &str,
        qos: QoS,
    ) -> Result<WriterHandle> {
        self.check_usable()?;
        let guid = Guid::new(self.prefix, EntityId::user_writer(self.next_key()));
        let writer = ReliableWriter::new(
            guid,
            qos.clone(),
            Arc::clone(&self.pool),
            self.persistence.clone(),
        )?;
        let slot = Arc::new(WriterSlot::new(writer, topic));
        self.writers.insert(guid, Arc::clone(&slot));

        let now = self.now();
        let mut batch = Batch::default();
        {
            let mut engine = self.engine.lock();
            let data = EndpointProxyData::new(guid, topic, type_name, qos.clone());
            match engine.register_writer(data) {
                Ok(effects) => self.apply_effects(effects, now, &mut batch),
                Err(e) => {
                    drop(engine);
                    self.writers.remove(&guid);
                    return Err(self.escalate(e));
                }
            }
        }
        if qos.is_reliable() {
            self.arm(TimerKind::Heartbeat(guid), now + self.config.heartbeat_period);
        }
        self.flush(batch);
        Ok(WriterHandle {
            participant: Arc::clone(self),
            guid,
            slot,
        })
    }

    pub fn create_reader(
        self: &Arc<Self>,
        topic: &str,
        type_name: &str,
        qos: QoS,
    ) -> Result<ReaderHandle> {
        self.check_usable()?;
        let guid = Guid::new(self.prefix, EntityId::user_reader(self.next_key()));
        let reader = ReliableReader::new(
            guid,
            qos.clone(),
            self.config.nack_response_max_delay,
            self.persistence.clone(),
        )?;
        let slot = Arc::new(ReaderSlot::new(reader, topic));
        self.readers.insert(guid, Arc::clone(&slot));

        let now = self.now();
        let mut batch = Batch::default();
        {
            let mut engine = self.engine.lock();
            let data = EndpointProxyData::new(guid, topic, type_name, qos);
            match engine.register_reader(data) {
                Ok(effects) => self.apply_effects(effects, now, &mut batch),
                Err(e) => {
                    drop(engine);
                    self.readers.remove(&guid);
                    return Err(self.escalate(e));
                }
            }
        }
        self.flush(batch);
        Ok(ReaderHandle {
            participant: Arc::clone(self),
            guid,
            slot,
        })
    }

    pub fn delete_writer(&self, guid: &Guid) -> Result<()> {
        if guid.entity_id.is_builtin() || !guid.entity_id.is_writer() {
            return Err(Error::InvalidState(format!("{} is not a user writer", guid)));
        }
        self.delete_endpoint(guid)
    }

    pub fn delete_reader(&self, guid: &Guid) -> Result<()> {
        if guid.entity_id.is_builtin() || !guid.entity_id.is_reader() {
            return Err(Error::InvalidState(format!("{} is not a user reader", guid)));
        }
        self.delete_endpoint(guid)
    }

    fn delete_endpoint(&self, guid: &Guid) -> Result<()> {
        let removed = if guid.entity_id.is_writer() {
            self.writers.remove(guid).is_some()
        } else {
            self.readers.remove(guid).is_some()
        };
        if !removed {
            return Err(Error::UnknownEntity(*guid));
        }
        self.timers.lock().cancel_endpoint(guid);

        let now = self.now();
        let mut batch = Batch::default();
        {
            let mut engine = self.engine.lock();
            if let Some(effects) = engine.unregister_local(guid) {
                self.apply_effects(effects, now, &mut batch);
            }
        }
        self.flush(batch);
        Ok(())
    }

    fn writer_slot(&self, guid: &Guid) -> Option<Arc<WriterSlot>> {
        self.writers.get(guid).map(|s| Arc::clone(s.value()))
    }

    fn reader_slot(&self, guid: &Guid) -> Option<Arc<ReaderSlot>> {
        self.readers.get(guid).map(|s| Arc::clone(s.value()))
    }

    /// Arm a timer no later than `due`, waking the event thread if needed.
    fn arm(&self, kind: TimerKind, due: Instant) {
        let earliest = self.timers.lock().schedule_before(kind, due);
        if earliest {
            if let Some(event_loop) = self.event_loop.lock().as_ref() {
                event_loop.submit(Work::Wake);
            }
        }
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    fn fire(&self, kind: TimerKind, now: Instant, batch: &mut Batch) {
        match kind {
            TimerKind::Announce => {
                let mut engine = self.engine.lock();
                let effects = engine.poll_announcement(now);
                self.apply_effects(effects, now, batch);
                let next = engine.next_announcement();
                drop(engine);
                if let Some(next) = next {
                    self.timers.lock().schedule(TimerKind::Announce, next);
                }
            }
            TimerKind::LeaseCheck => {
                {
                    let mut engine = self.engine.lock();
                    let effects = engine.expire_leases(now);
                    self.apply_effects(effects, now, batch);
                }
                self.timers
                    .lock()
                    .schedule(TimerKind::LeaseCheck, now + self.config.lease_check_period);
            }
            TimerKind::GarbageCollect => {
                let updates = {
                    let mut engine = self.engine.lock();
                    let purged = engine.collect_garbage(now);
                    if purged > 0 {
                        log::debug!("[DDB] Purged {} tombstones", purged);
                    }
                    engine.updates_since_last_checked()
                };
                if updates > 0 && self.kind() == ParticipantKind::Backup {
                    if let Some(path) = &self.config.backup_file {
                        if let Err(e) = self.backup_to_file(path) {
                            log::warn!("[DDB] Periodic backup failed, retrying next round: {}", e);
                        }
                    }
                }
                self.timers
                    .lock()
                    .schedule(TimerKind::GarbageCollect, now + self.gc_period());
            }
            TimerKind::Heartbeat(guid) => {
                let Some(slot) = self.writer_slot(&guid) else {
                    log::trace!("[TIMER] Heartbeat for removed writer {}", guid);
                    return;
                };
                {
                    let mut writer = slot.writer.lock();
                    batch.outgoing.extend(writer.heartbeat());
                    slot.reclaim(&mut writer);
                }
                self.timers
                    .lock()
                    .schedule(TimerKind::Heartbeat(guid), now + self.config.heartbeat_period);
            }
            TimerKind::AckNack(guid) => {
                let Some(slot) = self.reader_slot(&guid) else {
                    log::trace!("[TIMER] AckNack for removed reader {}", guid);
                    return;
                };
                let next = {
                    let mut reader = slot.reader.lock();
                    batch.outgoing.extend(reader.poll_acknacks(now));
                    reader.next_deadline()
                };
                if let Some(next) = next {
                    self.timers.lock().schedule_before(TimerKind::AckNack(guid), next);
                }
            }
        }
    }

    // ========================================================================
    // RECEIVE
    // ========================================================================

    /// Transport entry point. Queued to the event thread when one runs,
    /// processed inline otherwise.
    pub fn on_receive(&self, bytes: &[u8], source: Locator) {
        if self.threaded.load(Ordering::Acquire) {
            if let Some(event_loop) = self.event_loop.lock().as_ref() {
                event_loop.submit(Work::Inbound {
                    bytes: bytes.to_vec(),
                    source,
                });
                return;
            }
        }
        self.process_datagram(bytes, source, self.now());
    }

    pub(crate) fn process_datagram(&self, bytes: &[u8], source: Locator, now: Instant) {
        if self.state() != ParticipantState::Running {
            return;
        }
        if self.config.ignore_own_announcements && self.codec.peek_sender(bytes) == Some(self.prefix) {
            return;
        }
        let envelope = match self.codec.decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("[PARTICIPANT] Dropping datagram from {:?}: {}", source, e);
                return;
            }
        };
        let mut batch = Batch::default();
        for submessage in envelope.submessages {
            self.dispatch(submessage, envelope.sender, now, &mut batch);
        }
        self.flush(batch);
    }

    fn dispatch(&self, submessage: Submessage, sender: GuidPrefix, now: Instant, batch: &mut Batch) {
        match submessage {
            Submessage::Announcement(record) => {
                let mut engine = self.engine.lock();
                let effects = engine.on_announcement(record, sender, now);
                self.apply_effects(effects, now, batch);
            }
            Submessage::Data(msg) => {
                let Some(slot) = self.reader_slot(&msg.reader) else {
                    log::trace!("[RELIABLE] DATA for unknown reader {}", msg.reader);
                    return;
                };
                let delivered = slot.reader.lock().on_data(msg);
                if delivered > 0 {
                    self.on_delivered(&slot, now, batch);
                }
            }
            Submessage::Heartbeat(msg) => {
                let Some(slot) = self.reader_slot(&msg.reader) else {
                    return;
                };
                let (result, next) = {
                    let mut reader = slot.reader.lock();
                    let result = reader.on_heartbeat(&msg, now);
                    (result, reader.next_deadline())
                };
                match result {
                    Ok(Some(event)) => batch.events.push(event),
                    Ok(None) => {}
                    Err(Error::ProtocolViolation { peer, reason }) => {
                        let mut engine = self.engine.lock();
                        let effects = engine.on_protocol_violation(peer.prefix, &reason);
                        self.apply_effects(effects, now, batch);
                        return;
                    }
                    Err(e) => log::debug!("[RELIABLE] Heartbeat from {} dropped: {}", msg.writer, e),
                }
                if let Some(next) = next {
                    self.arm(TimerKind::AckNack(msg.reader), next);
                }
            }
            Submessage::AckNack(msg) => {
                let Some(slot) = self.writer_slot(&msg.writer) else {
                    return;
                };
                let outcome = {
                    let mut writer = slot.writer.lock();
                    let outcome = writer.on_acknack(&msg);
                    slot.reclaim(&mut writer);
                    outcome
                };
                batch.outgoing.extend(outcome.outgoing);
                if msg.writer.entity_id.is_builtin() && !outcome.acked.is_empty() {
                    let subjects: Vec<InstanceHandle> =
                        outcome.acked.iter().map(|(_, instance)| *instance).collect();
                    self.engine.lock().on_records_acked(msg.reader.prefix, &subjects);
                }
            }
            Submessage::Gap(msg) => {
                let Some(slot) = self.reader_slot(&msg.reader) else {
                    return;
                };
                let released = slot.reader.lock().on_gap(&msg);
                if released > 0 {
                    self.on_delivered(&slot, now, batch);
                }
            }
        }
    }

    /// Samples became available on a reader.
    fn on_delivered(&self, slot: &ReaderSlot, now: Instant, batch: &mut Batch) {
        let builtin = slot.reader.lock().guid().entity_id.is_builtin();
        if !builtin {
            slot.data.notify_all();
            return;
        }
        let samples = slot.reader.lock().take();
        let mut engine = self.engine.lock();
        for sample in samples {
            match decode_record(&sample.payload) {
                Ok(record) => {
                    let effects = engine.on_builtin_data(record, sample.writer.prefix, now);
                    self.apply_effects(effects, now, batch);
                }
                Err(e) => log::debug!("[EDP] Undecodable record from {}: {}", sample.writer, e),
            }
        }
    }

    // ========================================================================
    // EFFECTS
    // ========================================================================

    /// Carry out engine effects. Called with the engine lock held; takes
    /// endpoint locks one at a time.
    fn apply_effects(&self, effects: Vec<Effect>, now: Instant, batch: &mut Batch) {
        for effect in effects {
            match effect {
                Effect::Send(outgoing) => batch.outgoing.push(outgoing),
                Effect::WriteRecord {
                    writer,
                    record,
                    exclude,
                } => self.write_record(writer, &record, exclude, batch),
                Effect::Match(info) => self.wire(&info, now, batch),
                Effect::Unmatch { local, remote } => self.unwire(&local, &remote),
                Effect::UnmatchParticipant(prefix) => {
                    for slot in self.writer_slots() {
                        let mut writer = slot.writer.lock();
                        if !writer.unmatch_participant(&prefix).is_empty() {
                            slot.reclaim(&mut writer);
                        }
                    }
                    for slot in self.reader_slots() {
                        slot.reader.lock().unmatch_participant(&prefix);
                    }
                }
                Effect::PurgeParticipant(prefix) => {
                    for slot in self.writer_slots() {
                        let mut writer = slot.writer.lock();
                        if writer.guid().entity_id.is_builtin() {
                            writer.remove_instances(|i| i.to_guid().prefix == prefix);
                        }
                    }
                }
                Effect::Notify(event) => batch.events.push(event),
            }
        }
    }

    fn write_record(
        &self,
        writer: EntityId,
        record: &crate::discovery::DiscoveryChangeRecord,
        exclude: Vec<GuidPrefix>,
        batch: &mut Batch,
    ) {
        let guid = Guid::new(self.prefix, writer);
        let Some(slot) = self.writer_slot(&guid) else {
            log::trace!("[RELAY] No builtin writer {} for {}", guid, record);
            return;
        };
        let payload = match encode_record(record) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("[EDP] Cannot encode {}: {}", record, e);
                return;
            }
        };
        let instance = InstanceHandle::from(record.subject);
        let result = slot.writer.lock().write(&payload, instance, None, exclude);
        match result {
            Ok((_, outgoing)) => batch.outgoing.extend(outgoing),
            Err(e) => log::warn!("[RELAY] Builtin writer {} refused {}: {}", guid, record, e),
        }
    }

    fn wire(&self, info: &MatchInfo, now: Instant, batch: &mut Batch) {
        if info.local.entity_id.is_writer() {
            let Some(slot) = self.writer_slot(&info.local) else {
                return;
            };
            batch.outgoing.extend(slot.writer.lock().match_reader(info));
            if info.reliable {
                self.arm(TimerKind::Heartbeat(info.local), now + self.config.heartbeat_period);
            }
        } else if let Some(slot) = self.reader_slot(&info.local) {
            slot.reader
                .lock()
                .match_writer(info.remote, info.remote_locators.clone(), info.reliable);
        }
    }

    fn unwire(&self, local: &Guid, remote: &Guid) {
        if local.entity_id.is_writer() {
            if let Some(slot) = self.writer_slot(local) {
                let mut writer = slot.writer.lock();
                if writer.unmatch_reader(remote) {
                    slot.reclaim(&mut writer);
                }
            }
        } else if let Some(slot) = self.reader_slot(local) {
            slot.reader.lock().unmatch_writer(remote);
        }
    }

    fn writer_slots(&self) -> Vec<Arc<WriterSlot>> {
        self.writers.iter().map(|s| Arc::clone(s.value())).collect()
    }

    fn reader_slots(&self) -> Vec<Arc<ReaderSlot>> {
        self.readers.iter().map(|s| Arc::clone(s.value())).collect()
    }

    // ========================================================================
    // SEND
    // ========================================================================

    fn flush(&self, batch: Batch) {
        self.listeners.dispatch(&batch.events);
        self.send_all(batch.outgoing);
    }

    /// Encode and send. Parts addressed to our own locators are delivered
    /// in-process without touching the transport.
    pub(crate) fn send_all(&self, outgoing: Vec<Outgoing>) {
        for out in outgoing {
            let mut remote = LocatorList::new();
            let mut local = false;
            for locator in out.destination.iter() {
                if self.unicast.contains(locator) {
                    local = true;
                } else {
                    remote.push(*locator);
                }
            }
            if local {
                self.local_inbox.lock().push_back(out.submessage.clone());
            }
            if remote.is_empty() {
                continue;
            }
            let kind = out.submessage.kind();
            let envelope = Envelope::new(self.prefix, vec![out.submessage]);
            match self.codec.encode(&envelope) {
                Ok(bytes) => {
                    if let Err(e) = self.transport.send(&remote, &bytes) {
                        log::warn!("[PARTICIPANT] {} to {:?} failed: {}", kind, remote, e);
                    }
                }
                Err(e) => log::warn!("[PARTICIPANT] Cannot encode {}: {}", kind, e),
            }
        }
        self.drain_local();
    }

    /// Process submessages addressed to ourselves. Nested calls return at
    /// once; the outer loop picks up what they queued.
    fn drain_local(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                let next = self.local_inbox.lock().pop_front();
                let Some(submessage) = next else {
                    break;
                };
                if self.state() != ParticipantState::Running {
                    continue;
                }
                let mut batch = Batch::default();
                self.dispatch(submessage, self.prefix, self.now(), &mut batch);
                self.flush(batch);
            }
            self.draining.store(false, Ordering::Release);
            if self.local_inbox.lock().is_empty() {
                return;
            }
        }
    }
}
