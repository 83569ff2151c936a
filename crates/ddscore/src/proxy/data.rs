// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy data: what is known about a remote participant or endpoint.
//!
//! Values are plain data. Nothing outside the discovery database holds them
//! for long; other components keep the [`Guid`] and look the proxy up again.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{EntityId, Guid, LocatorList, ProtocolVersion, VendorId};
use crate::qos::QoS;

// ============================================================================
// PARTICIPANT KIND
// ============================================================================

/// Discovery role a participant announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantKind {
    /// Peer-to-peer participant (multicast discovery).
    Simple,
    /// Discovery server.
    Server,
    /// Discovery server persisting its database.
    Backup,
    /// Client of one or more servers.
    Client,
    /// Client that receives every discovery record.
    SuperClient,
}

impl ParticipantKind {
    /// Server or backup.
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(self, ParticipantKind::Server | ParticipantKind::Backup)
    }

    /// Client or super-client.
    #[must_use]
    pub fn is_client(&self) -> bool {
        matches!(self, ParticipantKind::Client | ParticipantKind::SuperClient)
    }
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParticipantKind::Simple => "SIMPLE",
            ParticipantKind::Server => "SERVER",
            ParticipantKind::Backup => "BACKUP",
            ParticipantKind::Client => "CLIENT",
            ParticipantKind::SuperClient => "SUPER_CLIENT",
        };
        f.write_str(name)
    }
}

// ============================================================================
// BUILTIN ENDPOINT SET
// ============================================================================

/// Bit set of the builtin endpoints a participant runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuiltinEndpoints(pub u32);

impl BuiltinEndpoints {
    pub const PUBLICATIONS_WRITER: u32 = 1 << 2;
    pub const PUBLICATIONS_READER: u32 = 1 << 3;
    pub const SUBSCRIPTIONS_WRITER: u32 = 1 << 4;
    pub const SUBSCRIPTIONS_READER: u32 = 1 << 5;
    pub const RELAY_WRITER: u32 = 1 << 16;
    pub const RELAY_READER: u32 = 1 << 17;

    /// Endpoint discovery writers and readers.
    pub const EDP: BuiltinEndpoints = BuiltinEndpoints(
        Self::PUBLICATIONS_WRITER
            | Self::PUBLICATIONS_READER
            | Self::SUBSCRIPTIONS_WRITER
            | Self::SUBSCRIPTIONS_READER,
    );

    /// Builtin set run by a participant of `kind`.
    #[must_use]
    pub fn for_kind(kind: ParticipantKind) -> Self {
        let relay = match kind {
            ParticipantKind::Simple => 0,
            ParticipantKind::Server | ParticipantKind::Backup => {
                Self::RELAY_WRITER | Self::RELAY_READER
            }
            ParticipantKind::Client | ParticipantKind::SuperClient => Self::RELAY_READER,
        };
        BuiltinEndpoints(Self::EDP.0 | relay)
    }

    #[must_use]
    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Presence of the builtin endpoint with entity id `id`.
    #[must_use]
    pub fn has(&self, id: EntityId) -> bool {
        let bit = match id {
            EntityId::SEDP_PUBLICATIONS_WRITER => Self::PUBLICATIONS_WRITER,
            EntityId::SEDP_PUBLICATIONS_READER => Self::PUBLICATIONS_READER,
            EntityId::SEDP_SUBSCRIPTIONS_WRITER => Self::SUBSCRIPTIONS_WRITER,
            EntityId::SEDP_SUBSCRIPTIONS_READER => Self::SUBSCRIPTIONS_READER,
            EntityId::PDP_RELAY_WRITER => Self::RELAY_WRITER,
            EntityId::PDP_RELAY_READER => Self::RELAY_READER,
            _ => return false,
        };
        self.contains(bit)
    }
}

// ============================================================================
// PROXY DATA
// ============================================================================

/// Field groups reported by [`ProxyData::diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyField {
    Domain,
    Name,
    Vendor,
    Version,
    Kind,
    Locators,
    LeaseDuration,
    BuiltinEndpoints,
    Topic,
    TypeName,
    Qos,
}

/// Participant announcement content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProxyData {
    pub guid: Guid,
    pub domain_id: u32,
    pub name: String,
    pub vendor: VendorId,
    pub protocol_version: ProtocolVersion,
    pub kind: ParticipantKind,
    /// Discovery-server protocol version (meaningful for non-simple kinds).
    pub ds_version: ProtocolVersion,
    /// Where builtin (discovery) traffic is received.
    pub metatraffic_unicast: LocatorList,
    pub metatraffic_multicast: LocatorList,
    /// Where user traffic is received when an endpoint names no locator.
    pub default_unicast: LocatorList,
    pub default_multicast: LocatorList,
    pub lease_duration: Duration,
    pub builtin_endpoints: BuiltinEndpoints,
}

impl ParticipantProxyData {
    fn diff(&self, other: &Self) -> Vec<ProxyField> {
        let mut changed = Vec::new();
        if self.domain_id != other.domain_id {
            changed.push(ProxyField::Domain);
        }
        if self.name != other.name {
            changed.push(ProxyField::Name);
        }
        if self.vendor != other.vendor {
            changed.push(ProxyField::Vendor);
        }
        if self.protocol_version != other.protocol_version || self.ds_version != other.ds_version
        {
            changed.push(ProxyField::Version);
        }
        if self.kind != other.kind {
            changed.push(ProxyField::Kind);
        }
        if !self.metatraffic_unicast.same_set(&other.metatraffic_unicast)
            || !self.metatraffic_multicast.same_set(&other.metatraffic_multicast)
            || !self.default_unicast.same_set(&other.default_unicast)
            || !self.default_multicast.same_set(&other.default_multicast)
        {
            changed.push(ProxyField::Locators);
        }
        if self.lease_duration != other.lease_duration {
            changed.push(ProxyField::LeaseDuration);
        }
        if self.builtin_endpoints != other.builtin_endpoints {
            changed.push(ProxyField::BuiltinEndpoints);
        }
        changed
    }
}

/// Writer or reader announcement content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointProxyData {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: QoS,
    /// Endpoint-specific locators; empty means "use the participant defaults".
    pub unicast: LocatorList,
    pub multicast: LocatorList,
}

impl EndpointProxyData {
    #[must_use]
    pub fn new(guid: Guid, topic_name: &str, type_name: &str, qos: QoS) -> Self {
        Self {
            guid,
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            qos,
            unicast: LocatorList::new(),
            multicast: LocatorList::new(),
        }
    }

    /// Guid of the owning participant.
    #[must_use]
    pub fn participant_guid(&self) -> Guid {
        self.guid.participant_guid()
    }

    fn diff(&self, other: &Self) -> Vec<ProxyField> {
        let mut changed = Vec::new();
        if self.topic_name != other.topic_name {
            changed.push(ProxyField::Topic);
        }
        if self.type_name != other.type_name {
            changed.push(ProxyField::TypeName);
        }
        if self.qos != other.qos {
            changed.push(ProxyField::Qos);
        }
        if !self.unicast.same_set(&other.unicast) || !self.multicast.same_set(&other.multicast) {
            changed.push(ProxyField::Locators);
        }
        changed
    }
}

/// Proxy of a remote writer.
pub type WriterProxyData = EndpointProxyData;
/// Proxy of a remote reader.
pub type ReaderProxyData = EndpointProxyData;

/// Any proxy kept by the cache and the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyData {
    Participant(ParticipantProxyData),
    Writer(WriterProxyData),
    Reader(ReaderProxyData),
}

impl ProxyData {
    #[must_use]
    pub fn guid(&self) -> Guid {
        match self {
            ProxyData::Participant(p) => p.guid,
            ProxyData::Writer(e) | ProxyData::Reader(e) => e.guid,
        }
    }

    #[must_use]
    pub fn as_participant(&self) -> Option<&ParticipantProxyData> {
        match self {
            ProxyData::Participant(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_endpoint(&self) -> Option<&EndpointProxyData> {
        match self {
            ProxyData::Writer(e) | ProxyData::Reader(e) => Some(e),
            ProxyData::Participant(_) => None,
        }
    }

    /// Topic name for endpoint proxies.
    #[must_use]
    pub fn topic_name(&self) -> Option<&str> {
        self.as_endpoint().map(|e| e.topic_name.as_str())
    }

    /// Fields that differ between `self` and `other`.
    ///
    /// Different variants report every field of `other`'s variant.
    #[must_use]
    pub fn diff(&self, other: &ProxyData) -> Vec<ProxyField> {
        match (self, other) {
            (ProxyData::Participant(a), ProxyData::Participant(b)) => a.diff(b),
            (ProxyData::Writer(a), ProxyData::Writer(b))
            | (ProxyData::Reader(a), ProxyData::Reader(b)) => a.diff(b),
            (_, ProxyData::Participant(_)) => vec![ProxyField::Kind],
            (_, ProxyData::Writer(_) | ProxyData::Reader(_)) => vec![ProxyField::Topic],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GuidPrefix, Locator};
    use crate::test_support::participant_data;

    fn participant(n: u8) -> ParticipantProxyData {
        participant_data(n, ParticipantKind::Simple)
    }

    #[test]
    fn test_participant_diff_detects_locator_change() {
        let a = participant(1);
        let mut b = a.clone();
        assert!(ProxyData::Participant(a.clone())
            .diff(&ProxyData::Participant(b.clone()))
            .is_empty());

        b.metatraffic_unicast.push(Locator::loopback(99));
        b.lease_duration = Duration::from_secs(5);
        let changed = ProxyData::Participant(a).diff(&ProxyData::Participant(b));
        assert_eq!(changed, vec![ProxyField::Locators, ProxyField::LeaseDuration]);
    }

    #[test]
    fn test_locator_order_is_not_a_change() {
        let mut a = participant(2);
        a.default_unicast.push(Locator::loopback(7));
        let mut b = a.clone();
        b.default_unicast = a.default_unicast.iter().rev().copied().collect();
        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn test_endpoint_diff_qos() {
        let guid = Guid::new(GuidPrefix::new([3; 12]), EntityId::user_writer(1));
        let a = EndpointProxyData::new(guid, "Square", "ShapeType", QoS::default());
        let b = EndpointProxyData::new(guid, "Square", "ShapeType", QoS::reliable());
        assert_eq!(
            ProxyData::Writer(a).diff(&ProxyData::Writer(b)),
            vec![ProxyField::Qos]
        );
    }

    #[test]
    fn test_builtin_endpoints_per_kind() {
        let simple = BuiltinEndpoints::for_kind(ParticipantKind::Simple);
        assert!(simple.has(EntityId::SEDP_PUBLICATIONS_WRITER));
        assert!(!simple.has(EntityId::PDP_RELAY_READER));

        let client = BuiltinEndpoints::for_kind(ParticipantKind::Client);
        assert!(client.has(EntityId::PDP_RELAY_READER));
        assert!(!client.has(EntityId::PDP_RELAY_WRITER));

        let server = BuiltinEndpoints::for_kind(ParticipantKind::Server);
        assert!(server.has(EntityId::PDP_RELAY_WRITER));
        assert!(!server.has(EntityId::PARTICIPANT));
    }
}
