// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport for the hosted participant.
//!
//! Inbound connections are read by one task each. Outbound frames go
//! through a per-destination writer task, connected on first use and
//! dropped on the first write error so the next send reconnects.

use super::connection::{read_frame, write_frame};
use ddscore::{Locator, LocatorList, ReceiveHandler, Transport};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Outbound = mpsc::UnboundedSender<Vec<u8>>;

/// Framed TCP transport driven by a tokio runtime.
pub struct TcpTransport {
    me: Weak<TcpTransport>,
    local: Locator,
    runtime: Handle,
    max_message_size: usize,
    peers: Mutex<HashMap<SocketAddr, Outbound>>,
    receiver: RwLock<Option<Arc<dyn ReceiveHandler>>>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local", &self.local)
            .field("peers", &self.peers.lock().len())
            .finish()
    }
}

impl TcpTransport {
    /// Create a transport advertising `local` and spawning its tasks on `runtime`.
    pub fn new(local: Locator, runtime: Handle, max_message_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            local,
            runtime,
            max_message_size,
            peers: Mutex::new(HashMap::new()),
            receiver: RwLock::new(None),
        })
    }

    /// Number of open outbound connections.
    pub fn connection_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Accept inbound connections until the listener fails.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("New connection from {}", peer_addr);
                    let transport = Arc::clone(&self);
                    tokio::spawn(async move {
                        transport.read_loop(stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    warn!("Accept error: {}", e);
                    return;
                }
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut stream: TcpStream, peer_addr: SocketAddr) {
        let source = Locator::from_socket_addr(&peer_addr, true);
        let mut buffer = Vec::with_capacity(4096);
        loop {
            match read_frame(&mut stream, self.max_message_size, &mut buffer).await {
                Ok(Some(_)) => {
                    let receiver = self.receiver.read().clone();
                    if let Some(receiver) = receiver {
                        receiver.on_receive(&buffer, source);
                    }
                }
                Ok(None) => {
                    info!("Connection closed: {}", peer_addr);
                    return;
                }
                Err(e) => {
                    warn!("Read error from {}: {}", peer_addr, e);
                    return;
                }
            }
        }
    }

    fn outbound(&self, addr: SocketAddr) -> Outbound {
        let mut peers = self.peers.lock();
        if let Some(tx) = peers.get(&addr) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        peers.insert(addr, tx.clone());
        let me = self.me.clone();
        self.runtime.spawn(write_loop(me, addr, rx));
        tx
    }

    fn forget(&self, addr: SocketAddr) {
        let mut peers = self.peers.lock();
        if peers.get(&addr).is_some_and(|tx| tx.is_closed()) {
            peers.remove(&addr);
        }
    }
}

async fn write_loop(me: Weak<TcpTransport>, addr: SocketAddr, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut stream = match TcpStream::connect(addr).await {
        Ok(stream) => {
            debug!("Connected to {}", addr);
            stream
        }
        Err(e) => {
            warn!("Failed to connect to {}: {}", addr, e);
            rx.close();
            if let Some(transport) = me.upgrade() {
                transport.forget(addr);
            }
            return;
        }
    };
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = write_frame(&mut stream, &bytes).await {
            warn!("Failed to send to {}: {}", addr, e);
            break;
        }
    }
    rx.close();
    if let Some(transport) = me.upgrade() {
        transport.forget(addr);
    }
}

impl Transport for TcpTransport {
    fn send(&self, destination: &LocatorList, bytes: &[u8]) -> ddscore::Result<()> {
        if bytes.len() > self.max_message_size {
            return Err(ddscore::Error::Transport(format!(
                "frame of {} bytes exceeds {}",
                bytes.len(),
                self.max_message_size
            )));
        }
        for locator in destination.iter() {
            if locator.is_multicast() || *locator == self.local {
                continue;
            }
            let Some(addr) = locator.to_socket_addr() else {
                continue;
            };
            if self.outbound(addr).send(bytes.to_vec()).is_err() {
                debug!("Writer for {} already gone; next send reconnects", addr);
            }
        }
        Ok(())
    }

    fn unicast_locators(&self) -> LocatorList {
        self.local.into()
    }

    fn set_receiver(&self, receiver: Arc<dyn ReceiveHandler>) {
        *self.receiver.write() = Some(receiver);
    }
}
