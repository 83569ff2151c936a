// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ddscore Discovery Server
//!
//! Standalone server (or backup server) participant for networks where
//! multicast discovery is unavailable. Clients configured with this
//! server's guid prefix and address announce to it over TCP and learn
//! about each other through it.
//!
//! # Usage
//!
//! ```bash
//! # Start server on default port (11811)
//! ddscore-server
//!
//! # Custom port and config
//! ddscore-server --port 7410 --config server.json
//!
//! # Backup server gossiping with a peer
//! ddscore-server --backup discovery.json \
//!     --peer 44.53.01.5f.45.50.52.4f.53.49.4d.41@10.0.0.2:11811
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

pub use config::ServerConfig;
pub use server::DiscoveryServer;

/// ddscore Discovery Server - centralized discovery without multicast
#[derive(Parser, Debug)]
#[command(name = "ddscore-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "11811")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Participant lease duration in seconds
    #[arg(long, default_value = "30")]
    lease_duration: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Domain ID to serve
    #[arg(short, long, default_value = "0")]
    domain: u32,

    /// Server guid prefix (24 hex digits, dots allowed)
    #[arg(long)]
    guid_prefix: Option<String>,

    /// Run as a backup server persisting its database to this file
    #[arg(long)]
    backup: Option<PathBuf>,

    /// Peer server as <guid_prefix>@<address:port> (repeatable)
    #[arg(long)]
    peer: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // ddscore logs through `log`; try_init bridges those records.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| e.to_string())?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        let mut config = ServerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            domain_id: args.domain,
            lease_duration_secs: args.lease_duration,
            backup_file: args.backup,
            ..Default::default()
        };
        if let Some(prefix) = args.guid_prefix {
            config.guid_prefix = prefix;
        }
        for peer in &args.peer {
            config.peer_servers.push(config::parse_peer(peer)?);
        }
        config
    };

    info!("+----------------------------------------------------+");
    info!(
        "|       ddscore Discovery Server v{}              |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:   {:40} |", config.listen_address());
    info!("|  Prefix: {:40} |", config.guid_prefix);
    info!("|  Domain: {:40} |", config.domain_id);
    info!(
        "|  Mode:   {:40} |",
        if config.backup_file.is_some() {
            "backup"
        } else {
            "server"
        }
    );
    info!("|  Peers:  {:40} |", config.peer_servers.len());
    info!(
        "|  Lease:  {:40} |",
        format!("{}s", config.lease_duration_secs)
    );
    info!("+----------------------------------------------------+");

    let server = std::sync::Arc::new(DiscoveryServer::new(config).await?);
    info!(
        "Server participant {} ({:?})",
        server.participant().guid(),
        server.participant().kind()
    );

    // Handle shutdown signals
    let server_handle = std::sync::Arc::clone(&server);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        server_handle.stop();
    });

    server.run().await?;

    info!("Discovery server stopped");
    Ok(())
}
