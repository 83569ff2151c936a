// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport collaborator.
//!
//! The engine only needs `send(locators, bytes)` and a receive callback; it
//! never sees sockets. [`LoopbackHub`] is an in-process network used by tests
//! and single-process deployments:
//!
//! - every attached transport owns one `Loopback` unicast locator
//! - transports join `Loopback` multicast groups
//! - a frame filter simulates loss or partitions
//!
//! Delivery is synchronous but never re-entrant: a send issued while the hub
//! is already delivering is queued and delivered by the outer loop, so a chain
//! of replies cannot grow the stack.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{Locator, LocatorKind, LocatorList};
use crate::error::{Error, Result};

/// Receive side of a transport.
pub trait ReceiveHandler: Send + Sync {
    /// One datagram (or frame) from `source`.
    fn on_receive(&self, bytes: &[u8], source: Locator);
}

/// Send side of a transport plus where it can be reached.
pub trait Transport: Send + Sync {
    /// Send `bytes` to every locator in `destination` this transport handles.
    fn send(&self, destination: &LocatorList, bytes: &[u8]) -> Result<()>;

    /// Locators remote participants use to reach us.
    fn unicast_locators(&self) -> LocatorList;

    /// Multicast groups joined by this transport.
    fn multicast_locators(&self) -> LocatorList {
        LocatorList::new()
    }

    /// Install the receive callback. Replaces any previous one.
    fn set_receiver(&self, receiver: Arc<dyn ReceiveHandler>);
}

/// A frame in flight on a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub source: Locator,
    pub destination: Locator,
    pub bytes: Vec<u8>,
}

/// Returns `true` to deliver the frame, `false` to drop it.
pub type FrameFilter = Box<dyn Fn(&Frame) -> bool + Send + Sync>;

struct Port {
    receiver: RwLock<Option<Arc<dyn ReceiveHandler>>>,
    connected: AtomicBool,
}

/// In-process network connecting [`LoopbackTransport`]s.
pub struct LoopbackHub {
    ports: RwLock<HashMap<u32, Arc<Port>>>,
    groups: RwLock<HashMap<u32, HashSet<u32>>>,
    filter: RwLock<Option<FrameFilter>>,
    pending: Mutex<VecDeque<(Frame, u32)>>,
    delivering: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl std::fmt::Debug for LoopbackHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackHub")
            .field("ports", &self.ports.read().len())
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ports: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            filter: RwLock::new(None),
            pending: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Attach a transport reachable at `Locator::loopback(id)` that joins
    /// the given multicast groups.
    pub fn attach(self: &Arc<Self>, id: u32, groups: &[u32]) -> Result<Arc<LoopbackTransport>> {
        {
            let mut ports = self.ports.write();
            if ports.contains_key(&id) {
                return Err(Error::Transport(format!("loopback port {} already attached", id)));
            }
            ports.insert(
                id,
                Arc::new(Port {
                    receiver: RwLock::new(None),
                    connected: AtomicBool::new(true),
                }),
            );
        }
        let mut joined = self.groups.write();
        for group in groups {
            joined.entry(*group).or_default().insert(id);
        }
        Ok(Arc::new(LoopbackTransport {
            hub: Arc::clone(self),
            id,
            groups: groups.to_vec(),
        }))
    }

    /// Cut a port off the network in both directions (simulated crash).
    pub fn disconnect(&self, id: u32) {
        if let Some(port) = self.ports.read().get(&id) {
            port.connected.store(false, Ordering::Release);
        }
    }

    pub fn reconnect(&self, id: u32) {
        if let Some(port) = self.ports.read().get(&id) {
            port.connected.store(true, Ordering::Release);
        }
    }

    /// Install a filter deciding which frames are delivered.
    pub fn set_filter(&self, filter: impl Fn(&Frame) -> bool + Send + Sync + 'static) {
        *self.filter.write() = Some(Box::new(filter));
    }

    pub fn clear_filter(&self) {
        *self.filter.write() = None;
    }

    /// Frames handed to a receiver so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped by the filter or a disconnected port.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn is_connected(&self, id: u32) -> bool {
        self.ports
            .read()
            .get(&id)
            .is_some_and(|p| p.connected.load(Ordering::Acquire))
    }

    /// Ports a destination list resolves to, each once.
    fn resolve(&self, destination: &LocatorList) -> Vec<(Locator, u32)> {
        let groups = self.groups.read();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for locator in destination.iter() {
            if locator.kind != LocatorKind::Loopback {
                continue;
            }
            if locator.is_multicast() {
                if let Some(members) = groups.get(&locator.port) {
                    for id in members {
                        if seen.insert(*id) {
                            targets.push((*locator, *id));
                        }
                    }
                }
            } else if seen.insert(locator.port) {
                targets.push((*locator, locator.port));
            }
        }
        targets
    }

    fn enqueue(&self, from: u32, destination: &LocatorList, bytes: &[u8]) {
        if !self.is_connected(from) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let source = Locator::loopback(from);
        let mut pending = self.pending.lock();
        for (destination, id) in self.resolve(destination) {
            let frame = Frame {
                source,
                destination,
                bytes: bytes.to_vec(),
            };
            pending.push_back((frame, id));
        }
    }

    /// Deliver queued frames unless another call is already doing so.
    fn pump(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            loop {
                let next = self.pending.lock().pop_front();
                let Some((frame, id)) = next else {
                    break;
                };
                self.deliver(&frame, id);
            }
            self.delivering.store(false, Ordering::Release);
            // A frame queued between the last pop and the release would
            // otherwise wait for the next send.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, frame: &Frame, id: u32) {
        let allowed = self.filter.read().as_ref().map_or(true, |f| f(frame));
        let port = self.ports.read().get(&id).cloned();
        let Some(port) = port else {
            return;
        };
        if !allowed || !port.connected.load(Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let receiver = port.receiver.read().clone();
        if let Some(receiver) = receiver {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            receiver.on_receive(&frame.bytes, frame.source);
        }
    }
}

/// One participant's attachment to a [`LoopbackHub`].
#[derive(Debug)]
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    id: u32,
    groups: Vec<u32>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, destination: &LocatorList, bytes: &[u8]) -> Result<()> {
        self.hub.enqueue(self.id, destination, bytes);
        self.hub.pump();
        Ok(())
    }

    fn unicast_locators(&self) -> LocatorList {
        Locator::loopback(self.id).into()
    }

    fn multicast_locators(&self) -> LocatorList {
        let mut list = LocatorList::new();
        for group in &self.groups {
            list.push(Locator::loopback_group(*group));
        }
        list
    }

    fn set_receiver(&self, receiver: Arc<dyn ReceiveHandler>) {
        if let Some(port) = self.hub.ports.read().get(&self.id) {
            *port.receiver.write() = Some(receiver);
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.hub.ports.write().remove(&self.id);
        for members in self.hub.groups.write().values_mut() {
            members.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(Vec<u8>, Locator)>>,
    }

    impl ReceiveHandler for Recorder {
        fn on_receive(&self, bytes: &[u8], source: Locator) {
            self.frames.lock().push((bytes.to_vec(), source));
        }
    }

    /// Answers every frame once through its own transport.
    struct Echo {
        transport: Mutex<Option<Arc<LoopbackTransport>>>,
        seen: AtomicU64,
    }

    impl ReceiveHandler for Echo {
        fn on_receive(&self, bytes: &[u8], source: Locator) {
            self.seen.fetch_add(1, Ordering::Relaxed);
            if bytes == b"ping" {
                if let Some(t) = self.transport.lock().as_ref() {
                    t.send(&source.into(), b"pong").expect("send");
                }
            }
        }
    }

    #[test]
    fn test_unicast_and_multicast_delivery() {
        let hub = LoopbackHub::new();
        let a = hub.attach(1, &[0]).expect("attach");
        let b = hub.attach(2, &[0]).expect("attach");
        let rec = Arc::new(Recorder::default());
        b.set_receiver(rec.clone());

        a.send(&Locator::loopback(2).into(), b"one").expect("send");
        a.send(&Locator::loopback_group(0).into(), b"two").expect("send");

        let frames = rec.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], (b"one".to_vec(), Locator::loopback(1)));
        assert_eq!(frames[1].0, b"two".to_vec());
    }

    #[test]
    fn test_port_reached_once_per_send() {
        let hub = LoopbackHub::new();
        let a = hub.attach(1, &[0]).expect("attach");
        let b = hub.attach(2, &[0]).expect("attach");
        let rec = Arc::new(Recorder::default());
        b.set_receiver(rec.clone());

        let mut both = LocatorList::from(Locator::loopback(2));
        both.push(Locator::loopback_group(0));
        a.send(&both, b"x").expect("send");
        assert_eq!(rec.frames.lock().len(), 1);
    }

    #[test]
    fn test_filter_and_disconnect_drop_frames() {
        let hub = LoopbackHub::new();
        let a = hub.attach(1, &[]).expect("attach");
        let b = hub.attach(2, &[]).expect("attach");
        let rec = Arc::new(Recorder::default());
        b.set_receiver(rec.clone());

        hub.set_filter(|frame| frame.bytes != b"lost");
        a.send(&Locator::loopback(2).into(), b"lost").expect("send");
        a.send(&Locator::loopback(2).into(), b"kept").expect("send");
        hub.clear_filter();

        hub.disconnect(2);
        a.send(&Locator::loopback(2).into(), b"cut").expect("send");
        hub.reconnect(2);
        a.send(&Locator::loopback(2).into(), b"back").expect("send");

        let payloads: Vec<Vec<u8>> = rec.frames.lock().iter().map(|(b, _)| b.clone()).collect();
        assert_eq!(payloads, vec![b"kept".to_vec(), b"back".to_vec()]);
        assert_eq!(hub.dropped(), 2);
    }

    #[test]
    fn test_replies_are_not_reentrant() {
        let hub = LoopbackHub::new();
        let a = hub.attach(1, &[]).expect("attach");
        let b = hub.attach(2, &[]).expect("attach");
        let echo = Arc::new(Echo {
            transport: Mutex::new(Some(Arc::clone(&b))),
            seen: AtomicU64::new(0),
        });
        b.set_receiver(echo.clone());
        let rec = Arc::new(Recorder::default());
        a.set_receiver(rec.clone());

        a.send(&Locator::loopback(2).into(), b"ping").expect("send");
        assert_eq!(echo.seen.load(Ordering::Relaxed), 1);
        assert_eq!(rec.frames.lock().len(), 1, "reply delivered before send returns");
        echo.transport.lock().take();
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let hub = LoopbackHub::new();
        let _a = hub.attach(1, &[]).expect("attach");
        assert!(matches!(hub.attach(1, &[]), Err(Error::Transport(_))));
    }
}
