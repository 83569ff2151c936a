// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixtures shared by unit tests.

use std::time::Duration;

use crate::core::{
    EntityId, Guid, GuidPrefix, Locator, LocatorList, DS_VERSION, PROTOCOL_VERSION, VENDOR_ID,
};
use crate::proxy::{BuiltinEndpoints, EndpointProxyData, ParticipantKind, ParticipantProxyData};
use crate::qos::QoS;

pub(crate) fn prefix(n: u8) -> GuidPrefix {
    GuidPrefix::new([n; 12])
}

/// Participant `n` reachable on `Locator::loopback(n)`.
pub(crate) fn participant_data(n: u8, kind: ParticipantKind) -> ParticipantProxyData {
    let locators: LocatorList = Locator::loopback(u32::from(n)).into();
    ParticipantProxyData {
        guid: Guid::participant(prefix(n)),
        domain_id: 0,
        name: format!("participant-{}", n),
        vendor: VENDOR_ID,
        protocol_version: PROTOCOL_VERSION,
        kind,
        ds_version: DS_VERSION,
        metatraffic_unicast: locators.clone(),
        metatraffic_multicast: LocatorList::new(),
        default_unicast: locators,
        default_multicast: LocatorList::new(),
        lease_duration: Duration::from_secs(30),
        builtin_endpoints: BuiltinEndpoints::for_kind(kind),
    }
}

pub(crate) fn writer_data(n: u8, key: u32, topic: &str, qos: QoS) -> EndpointProxyData {
    let guid = Guid::new(prefix(n), EntityId::user_writer(key));
    EndpointProxyData::new(guid, topic, "ShapeType", qos)
}

pub(crate) fn reader_data(n: u8, key: u32, topic: &str, qos: QoS) -> EndpointProxyData {
    let guid = Guid::new(prefix(n), EntityId::user_reader(key));
    EndpointProxyData::new(guid, topic, "ShapeType", qos)
}
