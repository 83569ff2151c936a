// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery server: a server (or backup) participant on a TCP transport.

use crate::config::ServerConfig;
use ddscore::{
    DiscoveryEvent, Listener, Participant, ParticipantKind, RemovalReason, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

pub mod connection;
pub mod transport;

pub use transport::TcpTransport;

/// Snapshot of what the server currently knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    /// Participants announcing to us directly.
    pub direct: usize,
    /// Participants learned through peer servers.
    pub relayed: usize,
    /// Alive writers and readers.
    pub endpoints: usize,
    /// Open outbound TCP connections.
    pub connections: usize,
}

/// Discovery Server - centralized discovery for ddscore participants.
pub struct DiscoveryServer {
    config: Arc<ServerConfig>,
    participant: Arc<Participant>,
    transport: Arc<TcpTransport>,
    shutdown: Arc<Notify>,
    running: AtomicBool,
}

impl DiscoveryServer {
    /// Create the server participant. Must be called inside a tokio runtime.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let participant_config = config
            .to_participant_config()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let transport = TcpTransport::new(
            config.advertised_locator(),
            tokio::runtime::Handle::current(),
            config.max_message_size,
        );
        let participant = Participant::builder("ddscore-server")
            .config(participant_config)
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .listener(Arc::new(EventLog))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            participant,
            transport,
            shutdown: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
        })
    }

    /// The hosted participant.
    pub fn participant(&self) -> &Arc<Participant> {
        &self.participant
    }

    pub fn stats(&self) -> ServerStats {
        self.participant.with_engine(|engine| {
            let db = engine.database();
            let alive = db.alive_entities();
            ServerStats {
                direct: db.direct_participants().len(),
                relayed: db.relayed_participants().len(),
                endpoints: alive
                    .iter()
                    .filter(|data| !matches!(data, ddscore::ProxyData::Participant(_)))
                    .count(),
                connections: self.transport.connection_count(),
            }
        })
    }

    /// Ask a running server to stop.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Serve until [`stop`](Self::stop) is called, then dispose and shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.config.listen_address();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        info!("Discovery server listening on {}", addr);
        let accept = tokio::spawn(Arc::clone(&self.transport).listen(listener));

        self.participant.start_background()?;
        if self.participant.kind() == ParticipantKind::Backup {
            info!(
                "Backup server: {} participants restored",
                self.participant.discovered_participants().len()
            );
        }

        let mut stats_interval = tokio::time::interval(Duration::from_secs(60));
        stats_interval.tick().await;
        loop {
            tokio::select! {
                _ = stats_interval.tick() => {
                    let stats = self.stats();
                    info!(
                        "Stats: {} direct, {} relayed participants, {} endpoints, {} connections",
                        stats.direct, stats.relayed, stats.endpoints, stats.connections
                    );
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        accept.abort();
        let participant = Arc::clone(&self.participant);
        let result = tokio::task::spawn_blocking(move || participant.shutdown())
            .await
            .map_err(|e| ServerError::Engine(ddscore::Error::InvalidState(e.to_string())))?;
        self.running.store(false, Ordering::SeqCst);
        result.map_err(ServerError::from)
    }
}

/// Logs discovery events through `tracing`.
struct EventLog;

impl Listener for EventLog {
    fn on_event(&self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::ParticipantDiscovered(data) => {
                info!("Participant joined: {} ({}, {})", data.guid.prefix, data.name, data.kind);
            }
            DiscoveryEvent::ParticipantRemoved { guid, reason } => match reason {
                RemovalReason::Violation => warn!("Participant {} dropped: protocol violation", guid.prefix),
                _ => info!("Participant left: {} ({:?})", guid.prefix, reason),
            },
            DiscoveryEvent::WriterDiscovered(data) => {
                debug!("Writer {} on '{}'", data.guid, data.topic_name);
            }
            DiscoveryEvent::ReaderDiscovered(data) => {
                debug!("Reader {} on '{}'", data.guid, data.topic_name);
            }
            DiscoveryEvent::InconsistentTopic { topic, remote, .. } => {
                warn!("Inconsistent type on '{}' from {}", topic, remote);
            }
            _ => {}
        }
    }
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Bind(String),
    AlreadyRunning,
    Engine(ddscore::Error),
}

impl From<ddscore::Error> for ServerError {
    fn from(e: ddscore::Error) -> Self {
        Self::Engine(e)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "Configuration error: {}", s),
            Self::Bind(s) => write!(f, "Bind error: {}", s),
            Self::AlreadyRunning => write!(f, "Server is already running"),
            Self::Engine(e) => write!(f, "Engine error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_prefix;
    use ddscore::{DiscoveryRole, GuidPrefix, Locator, ParticipantConfig, QoS, RemoteServer};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Instant;

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn client(id: u8, server: &ServerConfig) -> Arc<Participant> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let transport = TcpTransport::new(
            Locator::from_socket_addr(&addr, true),
            tokio::runtime::Handle::current(),
            1 << 20,
        );
        tokio::spawn(Arc::clone(&transport).listen(listener));

        let role = DiscoveryRole::Client {
            servers: vec![RemoteServer::new(
                parse_prefix(&server.guid_prefix).unwrap(),
                vec![server.advertised_locator()],
            )],
        };
        let config = ParticipantConfig::default()
            .with_role(role)
            .with_lease_duration(Duration::from_secs(5))
            .with_announcement_period(Duration::from_millis(500))
            .with_initial_announcements(5, Duration::from_millis(100));
        let participant = Participant::builder(&format!("client-{}", id))
            .config(config)
            .guid_prefix(GuidPrefix::new([id; 12]))
            .transport(transport as Arc<dyn Transport>)
            .build()
            .unwrap();
        participant.start_background().unwrap();
        participant
    }

    async fn eventually(limit: Duration, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        done()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clients_meet_through_tcp_server() {
        let config = ServerConfig {
            bind_address: Ipv4Addr::LOCALHOST.into(),
            port: free_port().await,
            lease_duration_secs: 5,
            announcement_period_secs: 1,
            ..Default::default()
        };
        let server = Arc::new(DiscoveryServer::new(config.clone()).await.unwrap());
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        let c1 = client(1, &config).await;
        let c2 = client(2, &config).await;
        assert!(
            eventually(Duration::from_secs(5), || c1.contains_alive(&c2.guid())
                && c2.contains_alive(&c1.guid()))
            .await,
            "clients discover each other through the server"
        );
        assert_eq!(server.stats().direct, 2);

        let writer = c1
            .create_writer("Square", "ShapeType", QoS::reliable())
            .unwrap();
        let reader = c2
            .create_reader("Square", "ShapeType", QoS::reliable())
            .unwrap();
        assert!(
            eventually(Duration::from_secs(5), || !writer.matched_readers().is_empty()).await,
            "endpoints match through the server"
        );
        assert_eq!(reader.matched_writers(), vec![writer.guid()]);
        assert!(server.stats().endpoints >= 2);

        for participant in [c1, c2] {
            tokio::task::spawn_blocking(move || participant.shutdown())
                .await
                .unwrap()
                .unwrap();
        }
        server.stop();
        running.await.unwrap().unwrap();
        assert_eq!(server.participant().state(), ddscore::ParticipantState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ServerConfig {
            guid_prefix: "nothex".into(),
            ..Default::default()
        };
        assert!(matches!(
            DiscoveryServer::new(config).await,
            Err(ServerError::Config(_))
        ));
    }
}
