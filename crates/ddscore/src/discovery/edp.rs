// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint Discovery Protocol: local endpoint registry and matching.
//!
//! # Matching
//!
//! A writer and a reader are compared when their topic names are equal:
//!
//! 1. Type names differ: `InconsistentTopic`, no match.
//! 2. Partitions do not intersect: no match, no notification.
//! 3. Offered QoS does not meet requested QoS: `OfferedIncompatibleQos` on
//!    the writer side, `RequestedIncompatibleQos` on the reader side, no match.
//!    Reported once per pair; there is no automatic retry.
//! 4. Otherwise both local sides are wired into reliable delivery.
//!
//! Local writers and readers of the same participant match each other.
//!
//! Endpoint records about a participant that PDP has not accepted yet are
//! parked and replayed when it is.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::core::{EntityId, Guid, GuidPrefix, LocatorList, SeqNumGenerator};
use crate::discovery::engine::{Effect, MatchInfo};
use crate::discovery::record::DiscoveryChangeRecord;
use crate::error::{Error, Result};
use crate::listener::{
    DiscoveryEvent, IncompatibleQosStatus, PublicationMatchedStatus, SubscriptionMatchedStatus,
};
use crate::proxy::{EndpointProxyData, ProxyCache, ProxyData};
use crate::qos::{check_compatibility, partitions_match, QosPolicyId};

/// Outcome of comparing one writer with one reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    Match,
    /// Different topic or disjoint partitions.
    NoMatch,
    InconsistentTopic,
    Incompatible(Vec<QosPolicyId>),
}

/// Compare a writer and a reader.
#[must_use]
pub fn evaluate(writer: &EndpointProxyData, reader: &EndpointProxyData) -> MatchDecision {
    if writer.topic_name != reader.topic_name {
        return MatchDecision::NoMatch;
    }
    if writer.type_name != reader.type_name {
        return MatchDecision::InconsistentTopic;
    }
    if !partitions_match(&writer.qos.partition, &reader.qos.partition) {
        return MatchDecision::NoMatch;
    }
    let failed = check_compatibility(&writer.qos, &reader.qos);
    if failed.is_empty() {
        MatchDecision::Match
    } else {
        MatchDecision::Incompatible(failed)
    }
}

/// Endpoint discovery state of one local participant.
#[derive(Debug)]
pub struct Edp {
    prefix: GuidPrefix,
    /// Where local endpoints receive (used for intra-participant matches).
    local_locators: LocatorList,
    writers: BTreeMap<Guid, EndpointProxyData>,
    readers: BTreeMap<Guid, EndpointProxyData>,
    records: BTreeMap<Guid, DiscoveryChangeRecord>,
    publications_seq: SeqNumGenerator,
    subscriptions_seq: SeqNumGenerator,
    /// Matched (writer, reader) pairs with at least one local side.
    matches: BTreeSet<(Guid, Guid)>,
    /// Pairs already reported incompatible.
    incompatible: HashSet<(Guid, Guid)>,
    publication_status: HashMap<Guid, PublicationMatchedStatus>,
    subscription_status: HashMap<Guid, SubscriptionMatchedStatus>,
    offered_incompatible: HashMap<Guid, IncompatibleQosStatus>,
    requested_incompatible: HashMap<Guid, IncompatibleQosStatus>,
    parked: VecDeque<DiscoveryChangeRecord>,
    max_parked: usize,
}

impl Edp {
    #[must_use]
    pub fn new(prefix: GuidPrefix, local_locators: LocatorList, max_parked: usize) -> Self {
        Self {
            prefix,
            local_locators,
            writers: BTreeMap::new(),
            readers: BTreeMap::new(),
            records: BTreeMap::new(),
            publications_seq: SeqNumGenerator::new(),
            subscriptions_seq: SeqNumGenerator::new(),
            matches: BTreeSet::new(),
            incompatible: HashSet::new(),
            publication_status: HashMap::new(),
            subscription_status: HashMap::new(),
            offered_incompatible: HashMap::new(),
            requested_incompatible: HashMap::new(),
            parked: VecDeque::new(),
            max_parked,
        }
    }

    // ========================================================================
    // LOCAL ENDPOINTS
    // ========================================================================

    /// Register a local writer. Returns its announcement record and the
    /// match effects against every known reader.
    pub fn register_writer(
        &mut self,
        data: EndpointProxyData,
        cache: &ProxyCache,
    ) -> Result<(DiscoveryChangeRecord, Vec<Effect>)> {
        self.check_new_local(&data.guid, true)?;
        let record = DiscoveryChangeRecord::alive(
            Guid::new(self.prefix, EntityId::SEDP_PUBLICATIONS_WRITER),
            self.publications_seq.next(),
            ProxyData::Writer(data.clone()),
        );
        self.writers.insert(data.guid, data.clone());
        self.records.insert(data.guid, record.clone());
        log::info!("[EDP] Local writer {} on '{}'", data.guid, data.topic_name);

        let mut effects = Vec::new();
        let candidates: Vec<EndpointProxyData> = cache
            .readers_on_topic(&data.topic_name)
            .into_iter()
            .cloned()
            .chain(
                self.readers
                    .values()
                    .filter(|r| r.topic_name == data.topic_name)
                    .cloned(),
            )
            .collect();
        for reader in candidates {
            self.evaluate_pair(&data, &reader, cache, &mut effects);
        }
        Ok((record, effects))
    }

    /// Register a local reader.
    pub fn register_reader(
        &mut self,
        data: EndpointProxyData,
        cache: &ProxyCache,
    ) -> Result<(DiscoveryChangeRecord, Vec<Effect>)> {
        self.check_new_local(&data.guid, false)?;
        let record = DiscoveryChangeRecord::alive(
            Guid::new(self.prefix, EntityId::SEDP_SUBSCRIPTIONS_WRITER),
            self.subscriptions_seq.next(),
            ProxyData::Reader(data.clone()),
        );
        self.readers.insert(data.guid, data.clone());
        self.records.insert(data.guid, record.clone());
        log::info!("[EDP] Local reader {} on '{}'", data.guid, data.topic_name);

        let mut effects = Vec::new();
        let candidates: Vec<EndpointProxyData> = cache
            .writers_on_topic(&data.topic_name)
            .into_iter()
            .cloned()
            .chain(
                self.writers
                    .values()
                    .filter(|w| w.topic_name == data.topic_name)
                    .cloned(),
            )
            .collect();
        for writer in candidates {
            self.evaluate_pair(&writer, &data, cache, &mut effects);
        }
        Ok((record, effects))
    }

    fn check_new_local(&self, guid: &Guid, writer: bool) -> Result<()> {
        if guid.prefix != self.prefix {
            return Err(Error::InvalidState(format!(
                "endpoint {} does not belong to participant {}",
                guid, self.prefix
            )));
        }
        let kind_ok = if writer {
            guid.entity_id.is_writer()
        } else {
            guid.entity_id.is_reader()
        };
        if !kind_ok || guid.entity_id.is_builtin() {
            return Err(Error::InvalidState(format!("{} is not a user endpoint", guid)));
        }
        if self.writers.contains_key(guid) || self.readers.contains_key(guid) {
            return Err(Error::InvariantViolation(format!(
                "two live local endpoints share guid {}",
                guid
            )));
        }
        Ok(())
    }

    /// Remove a local endpoint. Returns its retraction record and the
    /// unmatch effects.
    pub fn unregister_local(&mut self, guid: &Guid) -> Option<(DiscoveryChangeRecord, Vec<Effect>)> {
        let is_writer = if self.writers.remove(guid).is_some() {
            true
        } else if self.readers.remove(guid).is_some() {
            false
        } else {
            return None;
        };
        self.records.remove(guid);
        let (writer, sequence) = if is_writer {
            (EntityId::SEDP_PUBLICATIONS_WRITER, self.publications_seq.next())
        } else {
            (EntityId::SEDP_SUBSCRIPTIONS_WRITER, self.subscriptions_seq.next())
        };
        let record = DiscoveryChangeRecord::dispose(Guid::new(self.prefix, writer), sequence, *guid);

        let mut effects = Vec::new();
        self.unmatch_where(|w, r| w == *guid || r == *guid, &mut effects);
        self.incompatible.retain(|(w, r)| w != guid && r != guid);
        self.publication_status.remove(guid);
        self.subscription_status.remove(guid);
        self.offered_incompatible.remove(guid);
        self.requested_incompatible.remove(guid);
        log::info!("[EDP] Local endpoint {} removed", guid);
        Some((record, effects))
    }

    /// Current announcement of every local endpoint.
    #[must_use]
    pub fn local_records(&self) -> Vec<DiscoveryChangeRecord> {
        self.records.values().cloned().collect()
    }

    #[must_use]
    pub fn local_writer(&self, guid: &Guid) -> Option<&EndpointProxyData> {
        self.writers.get(guid)
    }

    #[must_use]
    pub fn local_reader(&self, guid: &Guid) -> Option<&EndpointProxyData> {
        self.readers.get(guid)
    }

    // ========================================================================
    // REMOTE ENDPOINTS
    // ========================================================================

    /// Re-evaluate matching for a remote endpoint that was created or updated
    /// in the cache.
    pub fn on_endpoint_record(&mut self, remote: &ProxyData, cache: &ProxyCache) -> Vec<Effect> {
        let mut effects = Vec::new();
        match remote {
            ProxyData::Writer(writer) => {
                let readers: Vec<EndpointProxyData> = self
                    .readers
                    .values()
                    .filter(|r| r.topic_name == writer.topic_name)
                    .cloned()
                    .collect();
                // A topic change leaves the old pairs behind.
                let guid = writer.guid;
                let stale: Vec<Guid> = self
                    .matches
                    .iter()
                    .filter(|(w, r)| *w == guid && !readers.iter().any(|x| x.guid == *r))
                    .map(|(_, r)| *r)
                    .collect();
                self.unmatch_where(|w, r| w == guid && stale.contains(&r), &mut effects);
                for reader in readers {
                    self.evaluate_pair(writer, &reader, cache, &mut effects);
                }
            }
            ProxyData::Reader(reader) => {
                let writers: Vec<EndpointProxyData> = self
                    .writers
                    .values()
                    .filter(|w| w.topic_name == reader.topic_name)
                    .cloned()
                    .collect();
                let guid = reader.guid;
                let stale: Vec<Guid> = self
                    .matches
                    .iter()
                    .filter(|(w, r)| *r == guid && !writers.iter().any(|x| x.guid == *w))
                    .map(|(w, _)| *w)
                    .collect();
                self.unmatch_where(|w, r| r == guid && stale.contains(&w), &mut effects);
                for writer in writers {
                    self.evaluate_pair(&writer, reader, cache, &mut effects);
                }
            }
            ProxyData::Participant(_) => {}
        }
        effects
    }

    /// A remote endpoint left the cache.
    pub fn on_endpoint_removed(&mut self, guid: &Guid) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.unmatch_where(|w, r| w == *guid || r == *guid, &mut effects);
        self.incompatible.retain(|(w, r)| w != guid && r != guid);
        effects
    }

    /// A remote participant left: unmatch everything it owned and drop its
    /// parked records.
    pub fn on_participant_removed(&mut self, prefix: &GuidPrefix) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.unmatch_where(|w, r| w.prefix == *prefix || r.prefix == *prefix, &mut effects);
        self.incompatible
            .retain(|(w, r)| w.prefix != *prefix && r.prefix != *prefix);
        self.parked.retain(|rec| rec.subject.prefix != *prefix);
        effects
    }

    /// Park an endpoint record until its participant is accepted.
    pub fn park(&mut self, record: DiscoveryChangeRecord) {
        if self.parked.iter().any(|r| r == &record) {
            return;
        }
        if self.parked.len() >= self.max_parked {
            if let Some(dropped) = self.parked.pop_front() {
                log::warn!("[EDP] Parking full, dropping {}", dropped);
            }
        }
        log::debug!("[EDP] Parked {} until its participant is known", record);
        self.parked.push_back(record);
    }

    /// Parked records of `prefix`, in arrival order.
    pub fn take_parked(&mut self, prefix: &GuidPrefix) -> Vec<DiscoveryChangeRecord> {
        let (taken, kept): (Vec<_>, Vec<_>) = self
            .parked
            .drain(..)
            .partition(|r| r.subject.prefix == *prefix);
        self.parked = kept.into();
        taken
    }

    #[must_use]
    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    #[must_use]
    pub fn is_matched(&self, writer: &Guid, reader: &Guid) -> bool {
        self.matches.contains(&(*writer, *reader))
    }

    /// Remote peers matched with a local endpoint.
    #[must_use]
    pub fn matched_with(&self, local: &Guid) -> Vec<Guid> {
        self.matches
            .iter()
            .filter_map(|(w, r)| {
                if w == local {
                    Some(*r)
                } else if r == local {
                    Some(*w)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Tear down every match (shutdown).
    pub fn clear(&mut self) {
        self.writers.clear();
        self.readers.clear();
        self.records.clear();
        self.matches.clear();
        self.incompatible.clear();
        self.parked.clear();
    }

    // ========================================================================
    // PAIR EVALUATION
    // ========================================================================

    fn locators_of(&self, endpoint: &EndpointProxyData, cache: &ProxyCache) -> LocatorList {
        if endpoint.guid.prefix == self.prefix {
            return self.local_locators.clone();
        }
        let mut locators = endpoint.unicast.clone();
        locators.merge(&endpoint.multicast);
        if locators.is_empty() {
            if let Some(participant) = cache.find_participant(&endpoint.guid.prefix) {
                locators.merge(&participant.default_unicast);
                locators.merge(&participant.default_multicast);
            }
        }
        locators
    }

    fn evaluate_pair(
        &mut self,
        writer: &EndpointProxyData,
        reader: &EndpointProxyData,
        cache: &ProxyCache,
        effects: &mut Vec<Effect>,
    ) {
        let key = (writer.guid, reader.guid);
        let writer_local = writer.guid.prefix == self.prefix;
        let reader_local = reader.guid.prefix == self.prefix;
        if !writer_local && !reader_local {
            return;
        }

        let decision = evaluate(writer, reader);
        if decision != MatchDecision::Match && self.matches.contains(&key) {
            self.unmatch_where(|w, r| (w, r) == key, effects);
        }

        match decision {
            MatchDecision::Match => {
                self.incompatible.remove(&key);
                if self.matches.insert(key) {
                    self.emit_match(writer, reader, cache, effects);
                }
            }
            MatchDecision::NoMatch => {}
            MatchDecision::InconsistentTopic => {
                if self.incompatible.insert(key) {
                    log::warn!(
                        "[EDP] Inconsistent topic '{}': {} vs {}",
                        writer.topic_name,
                        writer.type_name,
                        reader.type_name
                    );
                    let (local, remote) = if writer_local {
                        (writer.guid, reader.guid)
                    } else {
                        (reader.guid, writer.guid)
                    };
                    effects.push(Effect::Notify(DiscoveryEvent::InconsistentTopic {
                        local,
                        remote,
                        topic: writer.topic_name.clone(),
                    }));
                }
            }
            MatchDecision::Incompatible(failed) => {
                if self.incompatible.insert(key) {
                    log::info!(
                        "[MATCH-QOS] {} and {} incompatible on {:?}",
                        writer.guid,
                        reader.guid,
                        failed
                    );
                    if writer_local {
                        let status = self.offered_incompatible.entry(writer.guid).or_default();
                        status.record(&failed);
                        effects.push(Effect::Notify(DiscoveryEvent::OfferedIncompatibleQos {
                            writer: writer.guid,
                            reader: reader.guid,
                            status: status.clone(),
                        }));
                    }
                    if reader_local {
                        let status = self.requested_incompatible.entry(reader.guid).or_default();
                        status.record(&failed);
                        effects.push(Effect::Notify(DiscoveryEvent::RequestedIncompatibleQos {
                            reader: reader.guid,
                            writer: writer.guid,
                            status: status.clone(),
                        }));
                    }
                }
            }
        }
    }

    fn emit_match(
        &mut self,
        writer: &EndpointProxyData,
        reader: &EndpointProxyData,
        cache: &ProxyCache,
        effects: &mut Vec<Effect>,
    ) {
        log::info!(
            "[EDP] Matched writer {} with reader {} on '{}'",
            writer.guid,
            reader.guid,
            writer.topic_name
        );
        let reliable = reader.qos.is_reliable();
        if writer.guid.prefix == self.prefix {
            effects.push(Effect::Match(MatchInfo {
                local: writer.guid,
                remote: reader.guid,
                remote_locators: self.locators_of(reader, cache),
                reliable,
                durability: reader.qos.durability,
            }));
            let status = self.publication_status.entry(writer.guid).or_default();
            status.total_count += 1;
            status.total_count_change = 1;
            status.current_count += 1;
            status.current_count_change = 1;
            status.last_subscription_handle = Some(reader.guid);
            effects.push(Effect::Notify(DiscoveryEvent::PublicationMatched {
                writer: writer.guid,
                status: status.clone(),
            }));
        }
        if reader.guid.prefix == self.prefix {
            effects.push(Effect::Match(MatchInfo {
                local: reader.guid,
                remote: writer.guid,
                remote_locators: self.locators_of(writer, cache),
                reliable,
                durability: reader.qos.durability,
            }));
            let status = self.subscription_status.entry(reader.guid).or_default();
            status.total_count += 1;
            status.total_count_change = 1;
            status.current_count += 1;
            status.current_count_change = 1;
            status.last_publication_handle = Some(writer.guid);
            effects.push(Effect::Notify(DiscoveryEvent::SubscriptionMatched {
                reader: reader.guid,
                status: status.clone(),
            }));
        }
    }

    fn unmatch_where<F>(&mut self, predicate: F, effects: &mut Vec<Effect>)
    where
        F: Fn(Guid, Guid) -> bool,
    {
        let gone: Vec<(Guid, Guid)> = self
            .matches
            .iter()
            .filter(|(w, r)| predicate(*w, *r))
            .copied()
            .collect();
        for (writer, reader) in gone {
            self.matches.remove(&(writer, reader));
            log::info!("[EDP] Unmatched writer {} from reader {}", writer, reader);
            if writer.prefix == self.prefix {
                effects.push(Effect::Unmatch {
                    local: writer,
                    remote: reader,
                });
                if let Some(status) = self.publication_status.get_mut(&writer) {
                    status.total_count_change = 0;
                    status.current_count = status.current_count.saturating_sub(1);
                    status.current_count_change = -1;
                    status.last_subscription_handle = Some(reader);
                    effects.push(Effect::Notify(DiscoveryEvent::PublicationMatched {
                        writer,
                        status: status.clone(),
                    }));
                }
            }
            if reader.prefix == self.prefix {
                effects.push(Effect::Unmatch {
                    local: reader,
                    remote: writer,
                });
                if let Some(status) = self.subscription_status.get_mut(&reader) {
                    status.total_count_change = 0;
                    status.current_count = status.current_count.saturating_sub(1);
                    status.current_count_change = -1;
                    status.last_publication_handle = Some(writer);
                    effects.push(Effect::Notify(DiscoveryEvent::SubscriptionMatched {
                        reader,
                        status: status.clone(),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Locator;
    use crate::proxy::ParticipantKind;
    use crate::qos::QoS;
    use crate::test_support::{participant_data, prefix, reader_data, writer_data};

    fn edp() -> Edp {
        Edp::new(prefix(100), Locator::loopback(100).into(), 64)
    }

    fn cache_with_participant(n: u8) -> ProxyCache {
        let mut cache = ProxyCache::new(64);
        cache
            .upsert(ProxyData::Participant(participant_data(n, ParticipantKind::Simple)))
            .expect("upsert");
        cache
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
    fn test_local_writer_matches_remote_reader() {
        let mut edp = edp();
        let mut cache = cache_with_participant(1);
        let remote = reader_data(1, 1, "Square", QoS::reliable());
        cache.upsert(ProxyData::Reader(remote.clone())).expect("upsert");

        let local = writer_data(100, 1, "Square", QoS::reliable());
        let (record, effects) = edp.register_writer(local.clone(), &cache).expect("register");
        assert_eq!(record.writer.entity_id, EntityId::SEDP_PUBLICATIONS_WRITER);

        let found = matches(&effects);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].remote, remote.guid);
        assert!(found[0].reliable);
        assert!(
            found[0].remote_locators.contains(&Locator::loopback(1)),
            "falls back to the participant default locators"
        );
        assert!(edp.is_matched(&local.guid, &remote.guid));
    }

    #[test]
    fn test_incompatible_qos_reported_once() {
        let mut edp = edp();
        let cache = cache_with_participant(1);
        edp.register_reader(reader_data(100, 1, "Square", QoS::reliable()), &cache)
            .expect("register");

        let remote = ProxyData::Writer(writer_data(1, 1, "Square", QoS::best_effort()));
        let effects = edp.on_endpoint_record(&remote, &cache);
        assert!(matches(&effects).is_empty());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Notify(DiscoveryEvent::RequestedIncompatibleQos { status, .. })
                if status.last_policy_id == Some(QosPolicyId::Reliability)
        )));
        assert!(
            edp.on_endpoint_record(&remote, &cache).is_empty(),
            "no automatic retry or repeated notification"
        );
    }

    #[test]
    fn test_inconsistent_topic_and_partition() {
        let mut edp = edp();
        let cache = cache_with_participant(1);
        edp.register_reader(reader_data(100, 1, "Square", QoS::reliable()), &cache)
            .expect("register");

        let mut other_type = writer_data(1, 1, "Square", QoS::reliable());
        other_type.type_name = "OtherType".into();
        let effects = edp.on_endpoint_record(&ProxyData::Writer(other_type), &cache);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Notify(DiscoveryEvent::InconsistentTopic { .. })]
        ));

        let partitioned = writer_data(1, 2, "Square", QoS::reliable().partitions(&["A"]));
        let effects = edp.on_endpoint_record(&ProxyData::Writer(partitioned), &cache);
        assert!(effects.is_empty(), "partition mismatch is silent");
    }

    #[test]
    fn test_intra_participant_match() {
        let mut edp = edp();
        let cache = ProxyCache::new(8);
        edp.register_writer(writer_data(100, 1, "Square", QoS::reliable()), &cache)
            .expect("writer");
        let (_, effects) = edp
            .register_reader(reader_data(100, 2, "Square", QoS::reliable()), &cache)
            .expect("reader");
        let found = matches(&effects);
        assert_eq!(found.len(), 2, "both local sides are wired");
        assert!(found
            .iter()
            .all(|m| m.remote_locators.contains(&Locator::loopback(100))));
    }

    #[test]
    fn test_duplicate_local_guid_is_invariant_violation() {
        let mut edp = edp();
        let cache = ProxyCache::new(8);
        let writer = writer_data(100, 1, "Square", QoS::reliable());
        edp.register_writer(writer.clone(), &cache).expect("first");
        assert!(matches!(
            edp.register_writer(writer, &cache),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_participant_removal_unmatches() {
        let mut edp = edp();
        let cache = cache_with_participant(1);
        let local = writer_data(100, 1, "Square", QoS::reliable());
        edp.register_writer(local.clone(), &cache).expect("register");
        let remote = ProxyData::Reader(reader_data(1, 1, "Square", QoS::reliable()));
        edp.on_endpoint_record(&remote, &cache);
        assert_eq!(edp.matched_with(&local.guid).len(), 1);

        let effects = edp.on_participant_removed(&prefix(1));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Unmatch { local: l, .. } if *l == local.guid)));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Notify(DiscoveryEvent::PublicationMatched { status, .. })
                if status.current_count == 0 && status.current_count_change == -1
        )));
    }

    #[test]
    fn test_parking() {
        let mut edp = Edp::new(prefix(100), LocatorList::new(), 2);
        let record = |n: u8| {
            DiscoveryChangeRecord::alive(
                Guid::new(prefix(n), EntityId::SEDP_PUBLICATIONS_WRITER),
                crate::core::SequenceNumber::FIRST,
                ProxyData::Writer(writer_data(n, 1, "Square", QoS::default())),
            )
        };
        edp.park(record(1));
        edp.park(record(1));
        edp.park(record(2));
        assert_eq!(edp.parked_len(), 2);
        edp.park(record(3));
        assert_eq!(edp.parked_len(), 2, "oldest dropped when full");
        assert_eq!(edp.take_parked(&prefix(2)).len(), 1);
        assert!(edp.take_parked(&prefix(1)).is_empty());
    }
}
