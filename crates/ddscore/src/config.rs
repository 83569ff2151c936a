// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant configuration.
//!
//! # Architecture
//!
//! - **Constants**: protocol timing defaults, used when a field is omitted.
//! - **`ParticipantConfig`**: per-participant runtime configuration,
//!   serializable to JSON so that the server daemon and tests share one format.
//!
//! # Example
//!
//! ```ignore
//! use ddscore::config::{DiscoveryRole, ParticipantConfig};
//!
//! let config = ParticipantConfig::default()
//!     .with_name("sensor-node")
//!     .with_role(DiscoveryRole::Simple { initial_peers: vec![] });
//! config.validate()?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{GuidPrefix, Locator, LocatorList};
use crate::error::{Error, Result};
use crate::proxy::ParticipantKind;

// =======================================================================
// Protocol timing defaults
// =======================================================================

/// Maximum domain ID.
pub const MAX_DOMAIN_ID: u32 = 232;

/// Period of participant announcements in steady state.
pub const ANNOUNCEMENT_PERIOD: Duration = Duration::from_secs(3);

/// Lease duration announced by local participants.
pub const LEASE_DURATION: Duration = Duration::from_secs(30);

/// Number of fast announcements sent right after start.
pub const INITIAL_ANNOUNCEMENTS: u32 = 5;

/// Period of the initial announcement burst.
pub const INITIAL_ANNOUNCEMENT_PERIOD: Duration = Duration::from_millis(100);

/// Reliable writer heartbeat period.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound of the random delay before a reader answers a heartbeat.
pub const NACK_RESPONSE_MAX_DELAY: Duration = Duration::from_millis(20);

/// How often leases are checked.
pub const LEASE_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// How long a dispose tombstone is retained (twice the lease).
pub const TOMBSTONE_RETENTION: Duration = Duration::from_secs(60);

/// Default proxy cache capacity.
pub const MAX_PROXIES: usize = 4096;

// =======================================================================
// Discovery role
// =======================================================================

/// A discovery server this participant connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServer {
    pub prefix: GuidPrefix,
    pub locators: Vec<Locator>,
}

impl RemoteServer {
    #[must_use]
    pub fn new(prefix: GuidPrefix, locators: Vec<Locator>) -> Self {
        Self { prefix, locators }
    }

    #[must_use]
    pub fn locator_list(&self) -> LocatorList {
        self.locators.iter().copied().collect()
    }
}

/// How the participant takes part in discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryRole {
    /// Peer-to-peer over multicast, plus optional unicast peers.
    Simple { initial_peers: Vec<Locator> },
    /// Discovery server, gossiping with `peer_servers`.
    Server { peer_servers: Vec<RemoteServer> },
    /// Server that persists its database to the backup file.
    Backup { peer_servers: Vec<RemoteServer> },
    Client { servers: Vec<RemoteServer> },
    SuperClient { servers: Vec<RemoteServer> },
}

impl Default for DiscoveryRole {
    fn default() -> Self {
        DiscoveryRole::Simple {
            initial_peers: Vec::new(),
        }
    }
}

impl DiscoveryRole {
    #[must_use]
    pub fn kind(&self) -> ParticipantKind {
        match self {
            DiscoveryRole::Simple { .. } => ParticipantKind::Simple,
            DiscoveryRole::Server { .. } => ParticipantKind::Server,
            DiscoveryRole::Backup { .. } => ParticipantKind::Backup,
            DiscoveryRole::Client { .. } => ParticipantKind::Client,
            DiscoveryRole::SuperClient { .. } => ParticipantKind::SuperClient,
        }
    }

    /// Servers to announce to: peer servers for servers, servers for clients.
    #[must_use]
    pub fn remote_servers(&self) -> &[RemoteServer] {
        match self {
            DiscoveryRole::Simple { .. } => &[],
            DiscoveryRole::Server { peer_servers } | DiscoveryRole::Backup { peer_servers } => {
                peer_servers
            }
            DiscoveryRole::Client { servers } | DiscoveryRole::SuperClient { servers } => servers,
        }
    }

    #[must_use]
    pub fn initial_peers(&self) -> &[Locator] {
        match self {
            DiscoveryRole::Simple { initial_peers } => initial_peers,
            _ => &[],
        }
    }
}

// =======================================================================
// Participant configuration
// =======================================================================

fn default_name() -> String {
    "ddscore-participant".to_string()
}
fn default_lease() -> Duration {
    LEASE_DURATION
}
fn default_announcement_period() -> Duration {
    ANNOUNCEMENT_PERIOD
}
fn default_initial_announcements() -> u32 {
    INITIAL_ANNOUNCEMENTS
}
fn default_initial_period() -> Duration {
    INITIAL_ANNOUNCEMENT_PERIOD
}
fn default_heartbeat_period() -> Duration {
    HEARTBEAT_PERIOD
}
fn default_nack_delay() -> Duration {
    NACK_RESPONSE_MAX_DELAY
}
fn default_lease_check() -> Duration {
    LEASE_CHECK_PERIOD
}
fn default_retention() -> Duration {
    TOMBSTONE_RETENTION
}
fn default_max_proxies() -> usize {
    MAX_PROXIES
}
fn default_true() -> bool {
    true
}

/// Runtime configuration of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    #[serde(default)]
    pub domain_id: u32,

    #[serde(default = "default_name")]
    pub name: String,

    /// Fixed prefix; generated when absent. Durable writers need a fixed
    /// prefix to find their history after a restart.
    #[serde(default)]
    pub guid_prefix: Option<GuidPrefix>,

    #[serde(default)]
    pub role: DiscoveryRole,

    #[serde(default = "default_lease")]
    pub lease_duration: Duration,

    #[serde(default = "default_announcement_period")]
    pub announcement_period: Duration,

    #[serde(default = "default_initial_announcements")]
    pub initial_announcements: u32,

    #[serde(default = "default_initial_period")]
    pub initial_announcement_period: Duration,

    #[serde(default = "default_heartbeat_period")]
    pub heartbeat_period: Duration,

    #[serde(default = "default_nack_delay")]
    pub nack_response_max_delay: Duration,

    #[serde(default = "default_lease_check")]
    pub lease_check_period: Duration,

    #[serde(default = "default_retention")]
    pub tombstone_retention: Duration,

    #[serde(default = "default_max_proxies")]
    pub max_proxies: usize,

    /// Database backup restored at start and written by `backup_to_file`.
    #[serde(default)]
    pub backup_file: Option<PathBuf>,

    /// Discovery multicast locators in addition to the transport's own.
    #[serde(default)]
    pub multicast_locators: Vec<Locator>,

    /// Drop datagrams sent by this participant before decoding them.
    #[serde(default = "default_true")]
    pub ignore_own_announcements: bool,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            domain_id: 0,
            name: default_name(),
            guid_prefix: None,
            role: DiscoveryRole::default(),
            lease_duration: LEASE_DURATION,
            announcement_period: ANNOUNCEMENT_PERIOD,
            initial_announcements: INITIAL_ANNOUNCEMENTS,
            initial_announcement_period: INITIAL_ANNOUNCEMENT_PERIOD,
            heartbeat_period: HEARTBEAT_PERIOD,
            nack_response_max_delay: NACK_RESPONSE_MAX_DELAY,
            lease_check_period: LEASE_CHECK_PERIOD,
            tombstone_retention: TOMBSTONE_RETENTION,
            max_proxies: MAX_PROXIES,
            backup_file: None,
            multicast_locators: Vec::new(),
            ignore_own_announcements: true,
        }
    }
}

impl ParticipantConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.domain_id > MAX_DOMAIN_ID {
            return Err(Error::Config(format!(
                "domain_id {} exceeds {}",
                self.domain_id, MAX_DOMAIN_ID
            )));
        }
        if self.lease_duration.is_zero() {
            return Err(Error::Config("lease_duration must be > 0".into()));
        }
        if self.announcement_period.is_zero() || self.announcement_period >= self.lease_duration
        {
            return Err(Error::Config(
                "announcement_period must be > 0 and shorter than lease_duration".into(),
            ));
        }
        if self.heartbeat_period.is_zero() || self.lease_check_period.is_zero() {
            return Err(Error::Config(
                "heartbeat_period and lease_check_period must be > 0".into(),
            ));
        }
        if self.max_proxies == 0 {
            return Err(Error::Config("max_proxies must be > 0".into()));
        }
        if let Some(prefix) = &self.guid_prefix {
            if prefix.is_unknown() {
                return Err(Error::Config("guid_prefix must not be all zeros".into()));
            }
        }
        match &self.role {
            DiscoveryRole::Client { servers } | DiscoveryRole::SuperClient { servers }
                if servers.is_empty() =>
            {
                Err(Error::Config("client role needs at least one server".into()))
            }
            role => {
                for server in role.remote_servers() {
                    if server.prefix.is_unknown() || server.locators.is_empty() {
                        return Err(Error::Config(format!(
                            "remote server {} needs a prefix and a locator",
                            server.prefix
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    pub fn with_domain(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_guid_prefix(mut self, prefix: GuidPrefix) -> Self {
        self.guid_prefix = Some(prefix);
        self
    }

    pub fn with_role(mut self, role: DiscoveryRole) -> Self {
        self.role = role;
        self
    }

    /// Set the lease; tombstone retention follows at twice the lease.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self.tombstone_retention = lease * 2;
        self
    }

    pub fn with_announcement_period(mut self, period: Duration) -> Self {
        self.announcement_period = period;
        self
    }

    pub fn with_initial_announcements(mut self, count: u32, period: Duration) -> Self {
        self.initial_announcements = count;
        self.initial_announcement_period = period;
        self
    }

    pub fn with_heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = period;
        self
    }

    pub fn with_nack_response_max_delay(mut self, delay: Duration) -> Self {
        self.nack_response_max_delay = delay;
        self
    }

    pub fn with_max_proxies(mut self, max: usize) -> Self {
        self.max_proxies = max;
        self
    }

    pub fn with_backup_file(mut self, path: PathBuf) -> Self {
        self.backup_file = Some(path);
        self
    }

    pub fn with_multicast_locator(mut self, locator: Locator) -> Self {
        self.multicast_locators.push(locator);
        self
    }
}
