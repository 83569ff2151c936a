// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant builder.
//!
//! Collects the configuration and collaborators of a participant:
//! - `ParticipantConfig` (domain, role, timing, limits)
//! - the transport (required), codec, payload pool and persistence
//! - listeners registered before any event can fire

use std::path::Path;
use std::sync::Arc;

use crate::config::{DiscoveryRole, ParticipantConfig};
use crate::core::{
    Guid, GuidPrefix, LocatorList, DS_VERSION, PROTOCOL_VERSION, VENDOR_ID,
};
use crate::discovery::backup;
use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::payload_pool::{HeapPayloadPool, PayloadPool};
use crate::persistence::Persistence;
use crate::proxy::{BuiltinEndpoints, ParticipantKind, ParticipantProxyData};
use crate::transport::Transport;
use crate::wire::{Codec, JsonCodec};

use super::Participant;

/// Builder for configuring and creating a [`Participant`].
pub struct ParticipantBuilder {
    config: ParticipantConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn Codec>>,
    pool: Option<Arc<dyn PayloadPool>>,
    persistence: Option<Arc<dyn Persistence>>,
    listeners: Vec<Arc<dyn Listener>>,
}

impl ParticipantBuilder {
    pub(super) fn new(name: &str) -> Self {
        Self {
            config: ParticipantConfig::default().with_name(name),
            transport: None,
            codec: None,
            pool: None,
            persistence: None,
            listeners: Vec::new(),
        }
    }

    /// Replace the whole configuration. The builder name is kept unless the
    /// configuration carries one.
    pub fn config(mut self, config: ParticipantConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = config;
        if self.config.name.is_empty() {
            self.config.name = name;
        }
        self
    }

    /// Load the configuration from a JSON file.
    pub fn config_file(self, path: &Path) -> Result<Self> {
        let config = ParticipantConfig::from_file(path)?;
        Ok(self.config(config))
    }

    /// Set the DDS domain ID (default: 0).
    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.config.domain_id = domain_id;
        self
    }

    pub fn role(mut self, role: DiscoveryRole) -> Self {
        self.config.role = role;
        self
    }

    /// Fix the guid prefix instead of generating one. Servers need a
    /// well-known prefix so clients can address them.
    pub fn guid_prefix(mut self, prefix: GuidPrefix) -> Self {
        self.config.guid_prefix = Some(prefix);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wire codec (default: [`JsonCodec`]).
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Payload storage (default: unbounded [`HeapPayloadPool`]).
    pub fn payload_pool(mut self, pool: Arc<dyn PayloadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Storage for transient and persistent user writers.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration and assemble the participant.
    ///
    /// A backup server whose backup file exists restores it on
    /// [`Participant::start`].
    pub fn build(self) -> Result<Arc<Participant>> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| Error::Config("a transport is required".to_string()))?;

        let prefix = self
            .config
            .guid_prefix
            .unwrap_or_else(|| GuidPrefix::generate(VENDOR_ID));
        let kind = self.config.role.kind();
        let unicast = transport.unicast_locators();
        let transport_multicast = transport.multicast_locators();

        let local = ParticipantProxyData {
            guid: Guid::participant(prefix),
            domain_id: self.config.domain_id,
            name: self.config.name.clone(),
            vendor: VENDOR_ID,
            protocol_version: PROTOCOL_VERSION,
            kind,
            ds_version: DS_VERSION,
            metatraffic_unicast: unicast.clone(),
            metatraffic_multicast: transport_multicast.clone(),
            default_unicast: unicast,
            default_multicast: LocatorList::new(),
            lease_duration: self.config.lease_duration,
            builtin_endpoints: BuiltinEndpoints::for_kind(kind),
        };

        let mut multicast = transport_multicast;
        for locator in &self.config.multicast_locators {
            multicast.push(*locator);
        }

        let restore = match (&self.config.backup_file, kind) {
            (Some(path), ParticipantKind::Backup) if path.exists() => {
                let snapshot = backup::load(path)?;
                log::info!(
                    "[DDB] Restoring {} entries from {}",
                    snapshot.entries.len(),
                    path.display()
                );
                Some(snapshot)
            }
            _ => None,
        };

        Participant::assemble(
            self.config,
            local,
            multicast,
            transport,
            self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            self.pool
                .unwrap_or_else(|| Arc::new(HeapPayloadPool::unbounded())),
            self.persistence,
            self.listeners,
            restore,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteServer;
    use crate::core::Locator;
    use crate::transport::LoopbackHub;

    #[test]
    fn test_build_requires_transport() {
        let err = Participant::builder("lonely").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    }

    #[test]
    fn test_client_without_servers_is_rejected() {
        let hub = LoopbackHub::new();
        let transport = hub.attach(1, &[]).expect("attach");
        let err = Participant::builder("client")
            .role(DiscoveryRole::Client { servers: vec![] })
            .transport(transport)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {:?}", err);
    }

    #[test]
    fn test_fixed_prefix_and_locators() {
        let hub = LoopbackHub::new();
        let transport = hub.attach(7, &[]).expect("attach");
        let prefix = GuidPrefix::new([7; 12]);
        let server = RemoteServer::new(GuidPrefix::new([9; 12]), vec![Locator::loopback(9)]);
        let p = Participant::builder("client")
            .guid_prefix(prefix)
            .domain_id(3)
            .role(DiscoveryRole::Client {
                servers: vec![server],
            })
            .transport(transport)
            .build()
            .expect("build");
        assert_eq!(p.prefix(), prefix);
        assert_eq!(p.config().domain_id, 3);
        assert_eq!(p.kind(), ParticipantKind::Client);
        assert!(p.unicast_locators().contains(&Locator::loopback(7)));
    }

    #[test]
    fn test_config_keeps_builder_name() {
        let config = ParticipantConfig {
            name: String::new(),
            ..ParticipantConfig::default()
        };
        let builder = Participant::builder("named").config(config);
        assert_eq!(builder.config.name, "named");
    }
}
