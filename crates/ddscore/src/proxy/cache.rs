// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy cache: lookup table of remote participants and endpoints.
//!
//! The cache is a projection of the discovery database. It reports deltas:
//! an upsert of byte-identical data is `Unchanged` and emits nothing, so EDP
//! matching and listeners run only when something changed.
//!
//! Emitted events are queued and collected with [`ProxyCache::drain_events`]
//! by the discovery engine, which hands them out after releasing its lock.

use std::collections::{BTreeSet, HashMap};

use crate::core::{Guid, GuidPrefix};
use crate::error::{Error, Result};
use crate::listener::{DiscoveryEvent, RemovalReason};
use crate::proxy::data::{
    EndpointProxyData, ParticipantProxyData, ProxyData, ProxyField, ReaderProxyData,
    WriterProxyData,
};

/// Outcome of [`ProxyCache::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertResult {
    Created,
    Updated(Vec<ProxyField>),
    Unchanged,
}

impl UpsertResult {
    /// True for `Created` and `Updated`.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, UpsertResult::Unchanged)
    }
}

/// Remote entities keyed by Guid.
#[derive(Debug)]
pub struct ProxyCache {
    entries: HashMap<Guid, ProxyData>,
    /// Endpoint Guids per owning participant.
    endpoints: HashMap<GuidPrefix, BTreeSet<Guid>>,
    max_proxies: usize,
    events: Vec<DiscoveryEvent>,
}

impl ProxyCache {
    /// Cache holding at most `max_proxies` entries.
    #[must_use]
    pub fn new(max_proxies: usize) -> Self {
        Self {
            entries: HashMap::new(),
            endpoints: HashMap::new(),
            max_proxies,
            events: Vec::new(),
        }
    }

    /// Insert or update a proxy.
    ///
    /// Fails with [`Error::ResourceLimitExceeded`] when a new entry would
    /// exceed the capacity; existing entries can always be updated.
    pub fn upsert(&mut self, data: ProxyData) -> Result<UpsertResult> {
        let guid = data.guid();
        if guid.is_unknown() {
            return Err(Error::Malformed("proxy with unknown guid".into()));
        }

        if let Some(existing) = self.entries.get_mut(&guid) {
            let changed = existing.diff(&data);
            if changed.is_empty() {
                // Locator order is not significant.
                *existing = data;
                return Ok(UpsertResult::Unchanged);
            }
            *existing = data.clone();
            self.events.push(updated_event(data, changed.clone()));
            return Ok(UpsertResult::Updated(changed));
        }

        if self.entries.len() >= self.max_proxies {
            log::warn!(
                "[PDP] Proxy cache full ({} entries), dropping {}",
                self.entries.len(),
                guid
            );
            return Err(Error::ResourceLimitExceeded(format!(
                "proxy cache capacity {} reached",
                self.max_proxies
            )));
        }

        if !guid.is_participant() {
            self.endpoints.entry(guid.prefix).or_default().insert(guid);
        }
        self.events.push(created_event(data.clone()));
        self.entries.insert(guid, data);
        Ok(UpsertResult::Created)
    }

    /// Remove a proxy. Removing an unknown Guid returns `None`.
    pub fn remove(&mut self, guid: &Guid, reason: RemovalReason) -> Option<ProxyData> {
        let removed = self.entries.remove(guid)?;
        if !guid.is_participant() {
            if let Some(set) = self.endpoints.get_mut(&guid.prefix) {
                set.remove(guid);
                if set.is_empty() {
                    self.endpoints.remove(&guid.prefix);
                }
            }
        }
        self.events.push(removed_event(&removed, reason));
        Some(removed)
    }

    /// Remove a participant and every endpoint it owns (endpoints first).
    pub fn remove_participant(
        &mut self,
        prefix: &GuidPrefix,
        reason: RemovalReason,
    ) -> Vec<ProxyData> {
        let mut removed = Vec::new();
        for guid in self.endpoints_of(prefix) {
            if let Some(data) = self.remove(&guid, reason) {
                removed.push(data);
            }
        }
        if let Some(data) = self.remove(&Guid::participant(*prefix), reason) {
            removed.push(data);
        }
        removed
    }

    /// Read-only lookup.
    #[must_use]
    pub fn find(&self, guid: &Guid) -> Option<&ProxyData> {
        self.entries.get(guid)
    }

    #[must_use]
    pub fn find_participant(&self, prefix: &GuidPrefix) -> Option<&ParticipantProxyData> {
        self.entries
            .get(&Guid::participant(*prefix))
            .and_then(ProxyData::as_participant)
    }

    #[must_use]
    pub fn contains(&self, guid: &Guid) -> bool {
        self.entries.contains_key(guid)
    }

    pub fn participants(&self) -> impl Iterator<Item = &ParticipantProxyData> {
        self.entries.values().filter_map(ProxyData::as_participant)
    }

    /// Endpoint Guids owned by `prefix`, in Guid order.
    #[must_use]
    pub fn endpoints_of(&self, prefix: &GuidPrefix) -> Vec<Guid> {
        self.endpoints
            .get(prefix)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn writers_on_topic(&self, topic: &str) -> Vec<&WriterProxyData> {
        self.entries
            .values()
            .filter_map(|p| match p {
                ProxyData::Writer(w) if w.topic_name == topic => Some(w),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn readers_on_topic(&self, topic: &str) -> Vec<&ReaderProxyData> {
        self.entries
            .values()
            .filter_map(|p| match p {
                ProxyData::Reader(r) if r.topic_name == topic => Some(r),
                _ => None,
            })
            .collect()
    }

    /// All Guids currently cached.
    #[must_use]
    pub fn guids(&self) -> Vec<Guid> {
        self.entries.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the events queued since the last call.
    pub fn drain_events(&mut self) -> Vec<DiscoveryEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drop every entry without emitting events (shutdown).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.endpoints.clear();
        self.events.clear();
    }
}

fn created_event(data: ProxyData) -> DiscoveryEvent {
    match data {
        ProxyData::Participant(p) => DiscoveryEvent::ParticipantDiscovered(p),
        ProxyData::Writer(w) => DiscoveryEvent::WriterDiscovered(w),
        ProxyData::Reader(r) => DiscoveryEvent::ReaderDiscovered(r),
    }
}

fn updated_event(data: ProxyData, changed: Vec<ProxyField>) -> DiscoveryEvent {
    match data {
        ProxyData::Participant(data) => DiscoveryEvent::ParticipantUpdated { data, changed },
        ProxyData::Writer(data) => DiscoveryEvent::WriterUpdated { data, changed },
        ProxyData::Reader(data) => DiscoveryEvent::ReaderUpdated { data, changed },
    }
}

fn removed_event(data: &ProxyData, reason: RemovalReason) -> DiscoveryEvent {
    match data {
        ProxyData::Participant(p) => DiscoveryEvent::ParticipantRemoved {
            guid: p.guid,
            reason,
        },
        ProxyData::Writer(EndpointProxyData { guid, .. }) => {
            DiscoveryEvent::WriterRemoved { guid: *guid }
        }
        ProxyData::Reader(EndpointProxyData { guid, .. }) => {
            DiscoveryEvent::ReaderRemoved { guid: *guid }
        }
    }
}
