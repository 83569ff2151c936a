// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery server configuration.

use ddscore::{DiscoveryRole, GuidPrefix, Locator, ParticipantConfig, RemoteServer};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Another server this one gossips with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerServer {
    /// Guid prefix, 24 hex digits (dots allowed).
    pub guid_prefix: String,
    pub address: SocketAddr,
}

/// Discovery server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 11811)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address clients reach us on, when the bind address is unspecified
    #[serde(default)]
    pub advertise_address: Option<IpAddr>,

    /// Well-known guid prefix clients are configured with
    #[serde(default = "default_guid_prefix")]
    pub guid_prefix: String,

    /// Domain ID to serve
    #[serde(default)]
    pub domain_id: u32,

    /// Lease duration announced to clients, in seconds
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    /// Announcement period, in seconds
    #[serde(default = "default_announcement_period")]
    pub announcement_period_secs: u64,

    /// Maximum number of tracked proxies (participants and endpoints)
    #[serde(default = "default_max_proxies")]
    pub max_proxies: usize,

    /// Maximum frame size (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Persist the discovery database here (backup server)
    #[serde(default)]
    pub backup_file: Option<PathBuf>,

    #[serde(default)]
    pub peer_servers: Vec<PeerServer>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    11811
}

fn default_guid_prefix() -> String {
    "44.53.00.5f.45.50.52.4f.53.49.4d.41".to_string()
}

fn default_lease_duration() -> u64 {
    30
}

fn default_announcement_period() -> u64 {
    3
}

fn default_max_proxies() -> usize {
    4096
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            advertise_address: None,
            guid_prefix: default_guid_prefix(),
            domain_id: 0,
            lease_duration_secs: default_lease_duration(),
            announcement_period_secs: default_announcement_period(),
            max_proxies: default_max_proxies(),
            max_message_size: default_max_message_size(),
            backup_file: None,
            peer_servers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    #[allow(dead_code)]
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn listen_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Locator announced to clients.
    pub fn advertised_locator(&self) -> Locator {
        let ip = match self.advertise_address {
            Some(ip) => ip,
            None if self.bind_address.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            None => self.bind_address,
        };
        Locator::from_socket_addr(&SocketAddr::new(ip, self.port), true)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.lease_duration_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "lease_duration_secs cannot be 0".into(),
            ));
        }
        if self.announcement_period_secs >= self.lease_duration_secs {
            return Err(ConfigError::InvalidValue(
                "announcement_period_secs must be shorter than the lease".into(),
            ));
        }
        if self.max_proxies == 0 {
            return Err(ConfigError::InvalidValue("max_proxies cannot be 0".into()));
        }
        parse_prefix(&self.guid_prefix)?;
        for peer in &self.peer_servers {
            parse_prefix(&peer.guid_prefix)?;
        }
        Ok(())
    }

    /// Participant configuration of the hosted server participant. A backup
    /// file turns the server into a backup server.
    pub fn to_participant_config(&self) -> Result<ParticipantConfig, ConfigError> {
        let mut peers = Vec::with_capacity(self.peer_servers.len());
        for peer in &self.peer_servers {
            peers.push(RemoteServer::new(
                parse_prefix(&peer.guid_prefix)?,
                vec![Locator::from_socket_addr(&peer.address, true)],
            ));
        }
        let role = match self.backup_file {
            Some(_) => DiscoveryRole::Backup {
                peer_servers: peers,
            },
            None => DiscoveryRole::Server {
                peer_servers: peers,
            },
        };

        let mut config = ParticipantConfig::default()
            .with_name("ddscore-server")
            .with_domain(self.domain_id)
            .with_guid_prefix(parse_prefix(&self.guid_prefix)?)
            .with_role(role)
            .with_lease_duration(self.lease_duration())
            .with_announcement_period(Duration::from_secs(self.announcement_period_secs))
            .with_max_proxies(self.max_proxies);
        if let Some(path) = &self.backup_file {
            config = config.with_backup_file(path.clone());
        }
        config
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Ok(config)
    }
}

/// Parse a guid prefix written as 24 hex digits, optionally separated by dots.
pub fn parse_prefix(text: &str) -> Result<GuidPrefix, ConfigError> {
    let digits: String = text.chars().filter(|c| *c != '.' && *c != ':').collect();
    if digits.len() != 24 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidValue(format!(
            "guid prefix '{}' must be 12 hex bytes",
            text
        )));
    }
    let mut bytes = [0u8; 12];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    }
    let prefix = GuidPrefix::new(bytes);
    if prefix.is_unknown() {
        return Err(ConfigError::InvalidValue("guid prefix cannot be zero".into()));
    }
    Ok(prefix)
}

/// Parse a `--peer` argument: `<guid_prefix>@<address:port>`.
pub fn parse_peer(text: &str) -> Result<PeerServer, ConfigError> {
    let (prefix, address) = text
        .split_once('@')
        .ok_or_else(|| ConfigError::InvalidValue(format!("peer '{}' is not prefix@address", text)))?;
    parse_prefix(prefix)?;
    let address = address
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("peer address '{}': {}", address, e)))?;
    Ok(PeerServer {
        guid_prefix: prefix.to_string(),
        address,
    })
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 11811);
        assert!(config.validate().is_ok());
        let participant = config.to_participant_config().unwrap();
        assert!(matches!(participant.role, DiscoveryRole::Server { .. }));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        let config = ServerConfig {
            port: 7410,
            backup_file: Some(dir.path().join("backup.json")),
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        let parsed = ServerConfig::from_file(&path).unwrap();
        assert_eq!(parsed.port, 7410);
        let participant = parsed.to_participant_config().unwrap();
        assert!(matches!(participant.role, DiscoveryRole::Backup { .. }));
    }

    #[test]
    fn test_prefix_parsing() {
        let prefix = parse_prefix("01.02.03.04.05.06.07.08.09.0a.0b.0c").unwrap();
        assert_eq!(prefix.as_bytes()[11], 0x0c);
        assert_eq!(parse_prefix("0102030405060708090a0b0c").unwrap(), prefix);
        assert!(parse_prefix("0102").is_err());
        assert!(parse_prefix("000000000000000000000000").is_err());
    }

    #[test]
    fn test_peer_parsing() {
        let peer = parse_peer("0102030405060708090a0b0c@127.0.0.1:7410").unwrap();
        assert_eq!(peer.address.port(), 7410);
        assert!(parse_peer("127.0.0.1:7410").is_err());
    }

    #[test]
    fn test_validation_announcement_period() {
        let config = ServerConfig {
            lease_duration_secs: 3,
            announcement_period_secs: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_advertised_locator_replaces_unspecified_bind() {
        let config = ServerConfig::default();
        let addr = config.advertised_locator().to_socket_addr().unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 11811);
    }
}
