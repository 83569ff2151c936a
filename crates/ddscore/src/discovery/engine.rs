// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery engine: database, proxy cache, PDP and EDP of one participant.
//!
//! The engine is a plain state machine. Every operation returns the
//! [`Effect`]s the participant must carry out (send an announcement, write a
//! record through a builtin writer, wire or unwire reliable endpoints,
//! notify listeners). The participant holds the engine behind one lock and
//! applies the effects after releasing it, so no network I/O ever happens
//! under the engine lock.
//!
//! # Record flow
//!
//! ```text
//! announcement / builtin DATA
//!        |
//!   validate -> PDP screening (participants) -> database merge
//!        |                                        | changed?
//!        |                                        v
//!        |                              cache projection -> EDP matching
//!        |                                        |
//!        +----------- server roles: relay queue -> builtin writers
//! ```
//!
//! The database and the cache are updated under the same lock in the same
//! call, so no observer sees one without the other.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::ParticipantConfig;
use crate::core::{EntityId, Guid, GuidPrefix, InstanceHandle, LocatorList};
use crate::discovery::database::{DatabaseSnapshot, DiscoveryDatabase, Locality};
use crate::discovery::edp::Edp;
use crate::discovery::pdp::{Pdp, PdpVerdict};
use crate::discovery::record::{DiscoveryChangeRecord, Origin};
use crate::discovery::relay::{self, ExpiryRetractions};
use crate::error::Result;
use crate::listener::{DiscoveryEvent, RemovalReason};
use crate::proxy::{
    BuiltinEndpoints, EndpointProxyData, ParticipantKind, ParticipantProxyData, ProxyCache,
    ProxyData, ProxyField, UpsertResult,
};
use crate::qos::Durability;
use crate::wire::{Outgoing, Submessage};

/// Upper bound on endpoint records parked while their participant is unknown.
const MAX_PARKED_RECORDS: usize = 1024;

/// Builtin (local, remote) endpoint pairs wired when a participant connects
/// directly.
const BUILTIN_PAIRS: [(EntityId, EntityId); 6] = [
    (EntityId::SEDP_PUBLICATIONS_WRITER, EntityId::SEDP_PUBLICATIONS_READER),
    (EntityId::SEDP_SUBSCRIPTIONS_WRITER, EntityId::SEDP_SUBSCRIPTIONS_READER),
    (EntityId::PDP_RELAY_WRITER, EntityId::PDP_RELAY_READER),
    (EntityId::SEDP_PUBLICATIONS_READER, EntityId::SEDP_PUBLICATIONS_WRITER),
    (EntityId::SEDP_SUBSCRIPTIONS_READER, EntityId::SEDP_SUBSCRIPTIONS_WRITER),
    (EntityId::PDP_RELAY_READER, EntityId::PDP_RELAY_WRITER),
];

/// A local endpoint to wire to a remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    pub local: Guid,
    pub remote: Guid,
    pub remote_locators: LocatorList,
    pub reliable: bool,
    /// Reader durability (decides whether history is replayed).
    pub durability: Durability,
}

/// Work the participant carries out on behalf of the engine.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Best-effort datagram (participant announcements).
    Send(Outgoing),
    /// Write a record through a local builtin writer; readers of `exclude`
    /// participants get a GAP instead.
    WriteRecord {
        writer: EntityId,
        record: DiscoveryChangeRecord,
        exclude: Vec<GuidPrefix>,
    },
    Match(MatchInfo),
    Unmatch { local: Guid, remote: Guid },
    /// Unmatch every remote endpoint of a participant from every local one.
    UnmatchParticipant(GuidPrefix),
    /// Drop builtin history about a participant's entities.
    PurgeParticipant(GuidPrefix),
    Notify(DiscoveryEvent),
}

/// Discovery state of one participant.
#[derive(Debug)]
pub struct DiscoveryEngine {
    prefix: GuidPrefix,
    kind: ParticipantKind,
    builtin: BuiltinEndpoints,
    db: DiscoveryDatabase,
    cache: ProxyCache,
    pdp: Pdp,
    edp: Edp,
    expiry: Option<ExpiryRetractions>,
    /// Directly connected participants whose builtin endpoints are wired.
    bootstrapped: HashSet<GuidPrefix>,
    retention: Duration,
}

impl DiscoveryEngine {
    /// `local` is our announcement; `multicast` the simple-discovery groups;
    /// `user_locators` where local user endpoints receive.
    #[must_use]
    pub fn new(
        config: &ParticipantConfig,
        local: ParticipantProxyData,
        multicast: LocatorList,
        user_locators: LocatorList,
    ) -> Self {
        let prefix = local.guid.prefix;
        let kind = local.kind;
        let server = kind.is_server();
        Self {
            prefix,
            kind,
            builtin: local.builtin_endpoints,
            db: DiscoveryDatabase::new(server),
            cache: ProxyCache::new(config.max_proxies),
            pdp: Pdp::new(config, local, multicast),
            edp: Edp::new(prefix, user_locators, MAX_PARKED_RECORDS),
            expiry: server.then(|| ExpiryRetractions::new(prefix)),
            bootstrapped: HashSet::new(),
            retention: config.tombstone_retention,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> GuidPrefix {
        self.prefix
    }

    #[must_use]
    pub fn kind(&self) -> ParticipantKind {
        self.kind
    }

    #[must_use]
    pub fn database(&self) -> &DiscoveryDatabase {
        &self.db
    }

    #[must_use]
    pub fn cache(&self) -> &ProxyCache {
        &self.cache
    }

    #[must_use]
    pub fn pdp(&self) -> &Pdp {
        &self.pdp
    }

    #[must_use]
    pub fn edp(&self) -> &Edp {
        &self.edp
    }

    /// Builtin endpoints this participant runs.
    #[must_use]
    pub fn builtin_endpoints(&self) -> BuiltinEndpoints {
        self.builtin
    }

    #[must_use]
    pub fn find_proxy(&self, guid: &Guid) -> Option<ProxyData> {
        self.cache.find(guid).cloned()
    }

    #[must_use]
    pub fn contains_alive(&self, guid: &Guid) -> bool {
        self.db.contains_alive(guid)
    }

    /// Earliest announcement deadline.
    #[must_use]
    pub fn next_announcement(&self) -> Option<Instant> {
        self.pdp.next_announcement()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn start(&mut self, now: Instant) {
        self.pdp.start(now);
    }

    /// Announcement datagram due at `now`, if any.
    pub fn poll_announcement(&mut self, now: Instant) -> Vec<Effect> {
        let Some(record) = self.pdp.poll_announcement(now) else {
            return Vec::new();
        };
        let targets = self.pdp.announcement_targets(&self.direct_metatraffic());
        if targets.is_empty() {
            return Vec::new();
        }
        vec![Effect::Send(Outgoing::new(
            targets,
            Submessage::Announcement(record),
        ))]
    }

    /// Stop accepting records and announce our own dispose to every peer.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        self.db.set_enabled(false);
        let record = self.pdp.dispose_record();
        let mut targets = self.pdp.announcement_targets(&self.direct_metatraffic());
        for locators in self.direct_metatraffic() {
            targets.merge(&locators);
        }
        self.pdp.stop();
        self.edp.clear();
        self.bootstrapped.clear();
        log::info!("[PDP] Participant {} disposing", self.prefix);
        if targets.is_empty() {
            return Vec::new();
        }
        vec![Effect::Send(Outgoing::new(
            targets,
            Submessage::Announcement(record),
        ))]
    }

    fn direct_metatraffic(&self) -> Vec<LocatorList> {
        self.db
            .direct_participants()
            .iter()
            .filter_map(|p| self.cache.find_participant(p))
            .map(Self::metatraffic_of)
            .collect()
    }

    fn metatraffic_of(data: &ParticipantProxyData) -> LocatorList {
        if data.metatraffic_unicast.is_empty() {
            data.default_unicast.clone()
        } else {
            data.metatraffic_unicast.clone()
        }
    }

    // ========================================================================
    // INCOMING RECORDS
    // ========================================================================

    /// A best-effort participant announcement sent by `sender`.
    pub fn on_announcement(
        &mut self,
        record: DiscoveryChangeRecord,
        sender: GuidPrefix,
        now: Instant,
    ) -> Vec<Effect> {
        if !record.is_participant() {
            log::debug!("[PDP] Announcement {} is not about a participant", record);
            return Vec::new();
        }
        self.on_record(record, sender, now)
    }

    /// A record delivered by a builtin reader; `sender` owns the builtin
    /// writer it came from.
    pub fn on_builtin_data(
        &mut self,
        record: DiscoveryChangeRecord,
        sender: GuidPrefix,
        now: Instant,
    ) -> Vec<Effect> {
        self.on_record(record, sender, now)
    }

    fn on_record(
        &mut self,
        record: DiscoveryChangeRecord,
        sender: GuidPrefix,
        now: Instant,
    ) -> Vec<Effect> {
        let origin = Origin::classify(sender, &record.subject);
        let record = record.with_origin(origin);
        let mut effects = Vec::new();
        self.apply_record(record, now, &mut effects);
        self.relay(&mut effects);
        self.flush_events(&mut effects);
        effects
    }

    fn apply_record(
        &mut self,
        record: DiscoveryChangeRecord,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if let Err(e) = record.validate() {
            log::debug!("[DDB] Dropping malformed record: {}", e);
            return;
        }
        if record.subject.prefix == self.prefix {
            return;
        }
        if record.is_participant() {
            self.apply_participant(record, now, effects);
        } else {
            self.apply_endpoint(record, now, effects);
        }
    }

    fn apply_participant(
        &mut self,
        record: DiscoveryChangeRecord,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if let PdpVerdict::Reject(rejection) = self.pdp.on_participant_record(&record) {
            log::debug!("[PDP] Ignoring {}: {}", record, rejection);
            return;
        }
        let prefix = record.subject.prefix;
        let was_local = self.db.locality(&prefix) == Some(Locality::Local);
        let changed = self.db.update(&record, now);
        if record.is_alive() && self.db.is_current(&record) {
            self.pdp.renew_lease(&record, now);
        }
        if !changed {
            return;
        }

        if record.kind.is_retraction() {
            log::info!("[PDP] Participant {} retracted ({:?})", prefix, record.kind);
            self.teardown(prefix, RemovalReason::Disposed, was_local, effects);
            return;
        }

        let Some(ProxyData::Participant(data)) = record.data.clone() else {
            return;
        };
        let result = match self.cache.upsert(ProxyData::Participant(data.clone())) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("[PDP] Cannot track participant {}: {}", prefix, e);
                self.db.remove_participant(&prefix);
                self.pdp.forget(&prefix);
                return;
            }
        };
        if result == UpsertResult::Created {
            log::info!(
                "[PDP] Discovered {} participant {} ({:?})",
                data.kind,
                prefix,
                record.origin
            );
        }

        let is_local = self.db.locality(&prefix) == Some(Locality::Local);
        let locators_changed =
            matches!(&result, UpsertResult::Updated(changed) if changed.contains(&ProxyField::Locators));
        if is_local && (!self.bootstrapped.contains(&prefix) || locators_changed) {
            self.bootstrap(&data, effects);
        }

        for parked in self.edp.take_parked(&prefix) {
            self.apply_record(parked, now, effects);
        }
    }

    /// Wire our builtin endpoints to a directly connected participant and
    /// answer with our own announcement.
    fn bootstrap(&mut self, data: &ParticipantProxyData, effects: &mut Vec<Effect>) {
        let prefix = data.guid.prefix;
        let locators = Self::metatraffic_of(data);
        for (local, remote) in BUILTIN_PAIRS {
            if !self.builtin.has(local) || !data.builtin_endpoints.has(remote) {
                continue;
            }
            effects.push(Effect::Match(MatchInfo {
                local: Guid::new(self.prefix, local),
                remote: Guid::new(prefix, remote),
                remote_locators: locators.clone(),
                reliable: true,
                durability: Durability::TransientLocal,
            }));
        }
        if let Some(own) = self.pdp.local_record() {
            if !locators.is_empty() {
                effects.push(Effect::Send(Outgoing::new(
                    locators,
                    Submessage::Announcement(own.clone()),
                )));
            }
        }
        self.bootstrapped.insert(prefix);
        log::debug!("[PDP] Builtin endpoints wired to {}", prefix);
    }

    fn apply_endpoint(
        &mut self,
        record: DiscoveryChangeRecord,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        let owner = Guid::participant(record.subject.prefix);
        if record.is_alive() && !self.db.contains_alive(&owner) {
            self.edp.park(record);
            return;
        }
        if !self.db.update(&record, now) {
            return;
        }
        let subject = record.subject;
        if !record.is_alive() {
            if self.cache.remove(&subject, RemovalReason::Disposed).is_some() {
                log::debug!("[EDP] Remote endpoint {} removed", subject);
            }
            effects.extend(self.edp.on_endpoint_removed(&subject));
            return;
        }
        let Some(data) = record.data else {
            return;
        };
        match self.cache.upsert(data.clone()) {
            Ok(UpsertResult::Unchanged) => {}
            Ok(_) => effects.extend(self.edp.on_endpoint_record(&data, &self.cache)),
            Err(e) => {
                log::warn!("[EDP] Cannot track endpoint {}: {}", subject, e);
                self.db.remove_entity(&subject);
            }
        }
    }

    /// Forward newly applied records (server roles).
    fn relay(&mut self, effects: &mut Vec<Effect>) {
        for record in self.db.drain_relay_queue() {
            if let Some(plan) = relay::plan(&record, self.prefix) {
                log::trace!("[RELAY] {} excluding {:?}", record, plan.exclude);
                effects.push(Effect::WriteRecord {
                    writer: plan.writer,
                    record,
                    exclude: plan.exclude,
                });
            }
        }
    }

    fn flush_events(&mut self, effects: &mut Vec<Effect>) {
        effects.extend(self.cache.drain_events().into_iter().map(Effect::Notify));
    }

    // ========================================================================
    // REMOVAL
    // ========================================================================

    /// Remove a participant from the cache and unwire everything it owned.
    ///
    /// The database entry is handled by the caller (forgotten or
    /// tombstoned). Servers turn the lease expiry of a direct participant
    /// into a dispose for everybody else, and participants relayed only
    /// through the removed one go with it.
    fn teardown(
        &mut self,
        prefix: GuidPrefix,
        reason: RemovalReason,
        was_local: bool,
        effects: &mut Vec<Effect>,
    ) {
        self.pdp.forget(&prefix);
        self.bootstrapped.remove(&prefix);
        self.cache.remove_participant(&prefix, reason);
        effects.extend(self.edp.on_participant_removed(&prefix));
        effects.push(Effect::UnmatchParticipant(prefix));
        effects.push(Effect::PurgeParticipant(prefix));

        if was_local && reason == RemovalReason::LeaseExpired {
            if let Some(expiry) = &self.expiry {
                effects.push(Effect::WriteRecord {
                    writer: EntityId::PDP_RELAY_WRITER,
                    record: expiry.dispose(prefix),
                    exclude: vec![prefix],
                });
            }
        }

        for orphan in self.db.drop_relay_source(&prefix) {
            log::info!("[RELAY] {} lost its last relay {}", orphan, prefix);
            self.db.remove_participant(&orphan);
            self.teardown(orphan, RemovalReason::RelayLost, false, effects);
        }
    }

    /// Remove participants whose lease elapsed.
    pub fn expire_leases(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        for prefix in self.pdp.check_leases(now) {
            log::info!("[LEASE] Participant {} lease expired", prefix);
            let was_local = self.db.locality(&prefix) == Some(Locality::Local);
            self.db.remove_participant(&prefix);
            self.teardown(prefix, RemovalReason::LeaseExpired, was_local, &mut effects);
        }
        self.relay(&mut effects);
        self.flush_events(&mut effects);
        effects
    }

    /// Tear down a peer that violated the protocol.
    pub fn on_protocol_violation(&mut self, peer: GuidPrefix, reason: &str) -> Vec<Effect> {
        log::warn!("[PDP] Tearing down {} after protocol violation: {}", peer, reason);
        let mut effects = Vec::new();
        let was_local = self.db.locality(&peer) == Some(Locality::Local);
        self.db.remove_participant(&peer);
        self.teardown(peer, RemovalReason::Violation, was_local, &mut effects);
        self.flush_events(&mut effects);
        effects
    }

    /// Database changes since the previous call.
    pub fn updates_since_last_checked(&mut self) -> u64 {
        self.db.updates_since_last_checked()
    }

    /// Purge retained tombstones.
    pub fn collect_garbage(&mut self, now: Instant) -> usize {
        self.db.collect_garbage(now, self.retention)
    }

    /// A remote participant acknowledged builtin records about `subjects`.
    pub fn on_records_acked(&mut self, reader: GuidPrefix, subjects: &[InstanceHandle]) {
        for subject in subjects {
            self.db.record_ack(&subject.to_guid(), reader);
        }
    }

    // ========================================================================
    // LOCAL ENDPOINTS
    // ========================================================================

    pub fn register_writer(&mut self, data: EndpointProxyData) -> Result<Vec<Effect>> {
        let (record, effects) = self.edp.register_writer(data, &self.cache)?;
        Ok(self.local_effects(EntityId::SEDP_PUBLICATIONS_WRITER, record, effects))
    }

    pub fn register_reader(&mut self, data: EndpointProxyData) -> Result<Vec<Effect>> {
        let (record, effects) = self.edp.register_reader(data, &self.cache)?;
        Ok(self.local_effects(EntityId::SEDP_SUBSCRIPTIONS_WRITER, record, effects))
    }

    /// Remove a local endpoint; `None` when it was not registered.
    pub fn unregister_local(&mut self, guid: &Guid) -> Option<Vec<Effect>> {
        let (record, effects) = self.edp.unregister_local(guid)?;
        let writer = if guid.entity_id.is_writer() {
            EntityId::SEDP_PUBLICATIONS_WRITER
        } else {
            EntityId::SEDP_SUBSCRIPTIONS_WRITER
        };
        Some(self.local_effects(writer, record, effects))
    }

    fn local_effects(
        &mut self,
        writer: EntityId,
        record: DiscoveryChangeRecord,
        effects: Vec<Effect>,
    ) -> Vec<Effect> {
        let mut all = Vec::with_capacity(effects.len() + 1);
        all.push(Effect::WriteRecord {
            writer,
            record,
            exclude: Vec::new(),
        });
        all.extend(effects);
        self.flush_events(&mut all);
        all
    }

    // ========================================================================
    // BACKUP
    // ========================================================================

    pub fn start_backup(&mut self) {
        self.db.start_backup();
    }

    #[must_use]
    pub fn snapshot(&self) -> DatabaseSnapshot {
        self.db.snapshot()
    }

    pub fn finish_backup(&mut self) -> usize {
        self.db.finish_backup()
    }

    /// Replace the database with `snapshot` and rebuild the cache from it.
    ///
    /// Direct participants get a fresh lease and their builtin endpoints are
    /// wired again; they disappear normally if they do not announce.
    pub fn restore(&mut self, snapshot: DatabaseSnapshot, now: Instant) -> Vec<Effect> {
        self.db.restore(snapshot, now);
        self.cache.clear();
        self.bootstrapped.clear();
        let mut effects = Vec::new();
        let entities: Vec<ProxyData> = self.db.alive_entities().into_iter().cloned().collect();
        for data in entities {
            let guid = data.guid();
            if guid.prefix == self.prefix {
                continue;
            }
            if let Err(e) = self.cache.upsert(data.clone()) {
                log::warn!("[DDB] Restored entity {} not cached: {}", guid, e);
                self.db.remove_entity(&guid);
                continue;
            }
            match &data {
                ProxyData::Participant(p) => {
                    if self.db.locality(&guid.prefix) == Some(Locality::Local) {
                        self.pdp.track_lease(guid.prefix, p.lease_duration, now);
                        self.bootstrap(p, &mut effects);
                    }
                }
                ProxyData::Writer(_) | ProxyData::Reader(_) => {
                    effects.extend(self.edp.on_endpoint_record(&data, &self.cache));
                }
            }
        }
        self.relay(&mut effects);
        self.flush_events(&mut effects);
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryRole, RemoteServer};
    use crate::core::{Locator, SequenceNumber};
    use crate::qos::QoS;
    use crate::test_support::{participant_data, prefix, writer_data};

    fn engine(n: u8, kind: ParticipantKind, role: DiscoveryRole) -> DiscoveryEngine {
        let config = ParticipantConfig::default().with_role(role);
        let local = participant_data(n, kind);
        DiscoveryEngine::new(
            &config,
            local,
            Locator::loopback_group(0).into(),
            Locator::loopback(u32::from(n)).into(),
        )
    }

    fn simple(n: u8) -> DiscoveryEngine {
        engine(n, ParticipantKind::Simple, DiscoveryRole::default())
    }

    fn server(n: u8) -> DiscoveryEngine {
        engine(
            n,
            ParticipantKind::Server,
            DiscoveryRole::Server {
                peer_servers: Vec::new(),
            },
        )
    }

    fn announcement(n: u8, kind: ParticipantKind, seq: u64) -> DiscoveryChangeRecord {
        DiscoveryChangeRecord::alive(
            Guid::new(prefix(n), EntityId::SPDP_WRITER),
            SequenceNumber::from_linear(seq),
            ProxyData::Participant(participant_data(n, kind)),
        )
    }

    fn matches(effects: &[Effect]) -> Vec<&MatchInfo> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Match(info) => Some(info),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_direct_participant_is_bootstrapped_once() {
        let mut a = simple(100);
        let now = Instant::now();
        let effects = a.on_announcement(announcement(1, ParticipantKind::Simple, 1), prefix(1), now);
        assert_eq!(matches(&effects).len(), 4, "SEDP writers and readers");
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Notify(DiscoveryEvent::ParticipantDiscovered(_)))));
        assert!(a.find_proxy(&Guid::participant(prefix(1))).is_some());

        let again = a.on_announcement(announcement(1, ParticipantKind::Simple, 1), prefix(1), now);
        assert!(again.is_empty(), "periodic repeat changes nothing");
    }

    #[test]
    fn test_lease_expiry_removes_participant() {
        let mut a = simple(100);
        let now = Instant::now();
        a.on_announcement(announcement(1, ParticipantKind::Simple, 1), prefix(1), now);
        let effects = a.expire_leases(now + Duration::from_secs(31));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::UnmatchParticipant(p) if *p == prefix(1))));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Notify(DiscoveryEvent::ParticipantRemoved {
                reason: RemovalReason::LeaseExpired,
                ..
            })
        )));
        assert!(a.find_proxy(&Guid::participant(prefix(1))).is_none());
        assert!(!a.contains_alive(&Guid::participant(prefix(1))));
    }

    #[test]
    fn test_endpoint_record_parked_until_participant_known() {
        let mut a = simple(100);
        let now = Instant::now();
        let remote = writer_data(1, 1, "Square", QoS::reliable());
        let record = DiscoveryChangeRecord::alive(
            Guid::new(prefix(1), EntityId::SEDP_PUBLICATIONS_WRITER),
            SequenceNumber::FIRST,
            ProxyData::Writer(remote.clone()),
        );
        assert!(a.on_builtin_data(record, prefix(1), now).is_empty());
        assert_eq!(a.edp().parked_len(), 1);

        a.on_announcement(announcement(1, ParticipantKind::Simple, 1), prefix(1), now);
        assert_eq!(a.edp().parked_len(), 0);
        assert!(a.find_proxy(&remote.guid).is_some());
    }

    #[test]
    fn test_server_relays_with_sender_excluded() {
        let mut s = server(50);
        let now = Instant::now();
        let effects = s.on_announcement(announcement(1, ParticipantKind::Client, 1), prefix(1), now);
        let relayed: Vec<(&EntityId, &Vec<GuidPrefix>)> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::WriteRecord { writer, exclude, .. } => Some((writer, exclude)),
                _ => None,
            })
            .collect();
        assert_eq!(relayed, vec![(&EntityId::PDP_RELAY_WRITER, &vec![prefix(1)])]);
    }

    #[test]
    fn test_server_announces_client_expiry() {
        let mut s = server(50);
        let now = Instant::now();
        s.on_announcement(announcement(1, ParticipantKind::Client, 1), prefix(1), now);
        let effects = s.expire_leases(now + Duration::from_secs(31));
        let dispose = effects.iter().find_map(|e| match e {
            Effect::WriteRecord { record, exclude, .. } if !record.is_alive() => {
                Some((record.subject, exclude.clone()))
            }
            _ => None,
        });
        assert_eq!(dispose, Some((Guid::participant(prefix(1)), vec![prefix(1)])));
    }

    #[test]
    fn test_relayed_participants_follow_their_server() {
        let role = DiscoveryRole::Client {
            servers: vec![RemoteServer::new(prefix(50), vec![Locator::loopback(50)])],
        };
        let mut c = engine(100, ParticipantKind::Client, role);
        let now = Instant::now();
        c.on_announcement(announcement(50, ParticipantKind::Server, 1), prefix(50), now);
        c.on_builtin_data(announcement(2, ParticipantKind::Client, 1), prefix(50), now);
        assert!(c.contains_alive(&Guid::participant(prefix(2))));
        assert!(!c.pdp().has_lease(&prefix(2)), "relayed participants hold no lease");

        let effects = c.expire_leases(now + Duration::from_secs(31));
        assert!(!c.contains_alive(&Guid::participant(prefix(2))));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Notify(DiscoveryEvent::ParticipantRemoved {
                reason: RemovalReason::RelayLost,
                ..
            })
        )));
    }

    #[test]
    fn test_local_writer_announced_through_edp_writer() {
        let mut a = simple(100);
        let effects = a
            .register_writer(writer_data(100, 1, "Square", QoS::reliable()))
            .expect("register");
        assert!(matches!(
            effects.first(),
            Some(Effect::WriteRecord {
                writer: EntityId::SEDP_PUBLICATIONS_WRITER,
                ..
            })
        ));
    }

    #[test]
    fn test_shutdown_disables_database() {
        let mut a = simple(100);
        let now = Instant::now();
        a.start(now);
        let effects = a.shutdown();
        assert!(matches!(effects.as_slice(), [Effect::Send(_)]));
        assert!(a
            .on_announcement(announcement(1, ParticipantKind::Simple, 1), prefix(1), now)
            .iter()
            .all(|e| !matches!(e, Effect::Match(_))));
        assert!(!a.contains_alive(&Guid::participant(prefix(1))));
    }

    #[test]
    fn test_unbounded_remote_lease_does_not_overflow() {
        let mut a = simple(100);
        let now = Instant::now();
        let mut data = participant_data(1, ParticipantKind::Simple);
        data.lease_duration = Duration::MAX;
        let record = DiscoveryChangeRecord::alive(
            Guid::new(prefix(1), EntityId::SPDP_WRITER),
            SequenceNumber::FIRST,
            ProxyData::Participant(data),
        );
        a.on_announcement(record, prefix(1), now);
        assert!(a.pdp().has_lease(&prefix(1)));

        let effects = a.expire_leases(now + Duration::from_secs(3600));
        assert!(effects.is_empty(), "an unbounded lease never expires");
        assert!(a.contains_alive(&Guid::participant(prefix(1))));
    }

    #[test]
    fn test_replay_after_dispose_arms_no_lease() {
        let mut a = simple(100);
        let now = Instant::now();
        let alive = announcement(1, ParticipantKind::Simple, 1);
        a.on_announcement(alive.clone(), prefix(1), now);
        assert!(a.pdp().has_lease(&prefix(1)));

        let dispose = DiscoveryChangeRecord::dispose(
            Guid::new(prefix(1), EntityId::SPDP_WRITER),
            SequenceNumber::from_linear(2),
            Guid::participant(prefix(1)),
        );
        a.on_announcement(dispose, prefix(1), now);
        assert!(!a.pdp().has_lease(&prefix(1)));

        let effects = a.on_announcement(alive, prefix(1), now + Duration::from_secs(1));
        assert!(effects.is_empty());
        assert!(
            !a.pdp().has_lease(&prefix(1)),
            "an announcement the tombstone rejects renews nothing"
        );
    }
}
