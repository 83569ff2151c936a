// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locators and deduplicated locator lists.
//!
//! A locator is `(kind, address, port)`; the engine never interprets the
//! address beyond equality and conversion helpers for socket-based transports.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Locator kind (RTPS LOCATOR_KIND_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocatorKind {
    Udpv4,
    Udpv6,
    Tcpv4,
    Tcpv6,
    Shm,
    /// In-process transport (tests, intra-host loopback).
    Loopback,
}

impl LocatorKind {
    /// Wire value of the kind.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            LocatorKind::Udpv4 => 1,
            LocatorKind::Udpv6 => 2,
            LocatorKind::Tcpv4 => 4,
            LocatorKind::Tcpv6 => 8,
            LocatorKind::Shm => 16,
            LocatorKind::Loopback => 0x0100_0000,
        }
    }
}

/// Reachable network endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator {
    pub kind: LocatorKind,
    pub port: u32,
    /// IPv4 addresses live in the last 4 bytes.
    pub address: [u8; 16],
}

impl Locator {
    /// Build from raw parts.
    #[must_use]
    pub const fn new(kind: LocatorKind, address: [u8; 16], port: u32) -> Self {
        Self {
            kind,
            port,
            address,
        }
    }

    /// UDPv4 locator.
    #[must_use]
    pub fn udpv4(ip: Ipv4Addr, port: u16) -> Self {
        Self::new(LocatorKind::Udpv4, Self::v4_bytes(ip), u32::from(port))
    }

    /// TCPv4 locator.
    #[must_use]
    pub fn tcpv4(ip: Ipv4Addr, port: u16) -> Self {
        Self::new(LocatorKind::Tcpv4, Self::v4_bytes(ip), u32::from(port))
    }

    /// In-process locator identified by `id`.
    #[must_use]
    pub fn loopback(id: u32) -> Self {
        Self::new(LocatorKind::Loopback, [0; 16], id)
    }

    /// In-process multicast group `group`.
    #[must_use]
    pub fn loopback_group(group: u32) -> Self {
        let mut address = [0u8; 16];
        address[0] = 0xff;
        Self::new(LocatorKind::Loopback, address, group)
    }

    /// Build a UDP or TCP locator from a socket address.
    #[must_use]
    pub fn from_socket_addr(addr: &SocketAddr, tcp: bool) -> Self {
        match (addr.ip(), tcp) {
            (IpAddr::V4(ip), false) => Self::udpv4(ip, addr.port()),
            (IpAddr::V4(ip), true) => Self::tcpv4(ip, addr.port()),
            (IpAddr::V6(ip), tcp) => {
                let kind = if tcp {
                    LocatorKind::Tcpv6
                } else {
                    LocatorKind::Udpv6
                };
                Self::new(kind, ip.octets(), u32::from(addr.port()))
            }
        }
    }

    /// Socket address for IP-based kinds.
    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        let ip = match self.kind {
            LocatorKind::Udpv4 | LocatorKind::Tcpv4 => {
                let [.., a, b, c, d] = self.address;
                IpAddr::V4(Ipv4Addr::new(a, b, c, d))
            }
            LocatorKind::Udpv6 | LocatorKind::Tcpv6 => IpAddr::V6(Ipv6Addr::from(self.address)),
            LocatorKind::Shm | LocatorKind::Loopback => return None,
        };
        Some(SocketAddr::new(ip, port))
    }

    /// True for multicast addresses (224.0.0.0/4, ff00::/8, loopback groups).
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        match self.kind {
            LocatorKind::Udpv4 => (224..=239).contains(&self.address[12]),
            LocatorKind::Udpv6 | LocatorKind::Loopback => self.address[0] == 0xff,
            _ => false,
        }
    }

    fn v4_bytes(ip: Ipv4Addr) -> [u8; 16] {
        let mut address = [0u8; 16];
        address[12..16].copy_from_slice(&ip.octets());
        address
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "{:?}:{}", self.kind, addr),
            None => write!(f, "{:?}:{}", self.kind, self.port),
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", self)
    }
}

// ============================================================================
// LOCATOR LIST
// ============================================================================

/// Insertion-ordered set of locators (duplicates are suppressed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorList {
    items: Vec<Locator>,
}

impl LocatorList {
    /// Empty list.
    #[must_use]
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Insert `locator`; returns `false` if it was already present.
    pub fn push(&mut self, locator: Locator) -> bool {
        if self.items.contains(&locator) {
            return false;
        }
        self.items.push(locator);
        true
    }

    /// Merge another list, returns the number of new entries.
    pub fn merge(&mut self, other: &LocatorList) -> usize {
        other.iter().filter(|l| self.push(**l)).count()
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, locator: &Locator) -> bool {
        self.items.contains(locator)
    }

    /// Remove `locator`; returns `true` if it was present.
    pub fn remove(&mut self, locator: &Locator) -> bool {
        let before = self.items.len();
        self.items.retain(|l| l != locator);
        before != self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Locator> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set equality (order-insensitive).
    #[must_use]
    pub fn same_set(&self, other: &LocatorList) -> bool {
        self.len() == other.len() && self.iter().all(|l| other.contains(l))
    }
}

impl FromIterator<Locator> for LocatorList {
    fn from_iter<I: IntoIterator<Item = Locator>>(iter: I) -> Self {
        let mut list = LocatorList::new();
        for locator in iter {
            list.push(locator);
        }
        list
    }
}

impl<'a> IntoIterator for &'a LocatorList {
    type Item = &'a Locator;
    type IntoIter = std::slice::Iter<'a, Locator>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl From<Locator> for LocatorList {
    fn from(locator: Locator) -> Self {
        std::iter::once(locator).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_deduplicates() {
        let a = Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7410);
        let b = Locator::udpv4(Ipv4Addr::new(10, 0, 0, 2), 7410);

        let mut list = LocatorList::new();
        assert!(list.push(a));
        assert!(!list.push(a), "duplicate must be suppressed");
        assert!(list.push(b));
        assert_eq!(list.len(), 2);

        let other: LocatorList = vec![b, a, b].into_iter().collect();
        assert_eq!(other.len(), 2);
        assert!(list.same_set(&other));
        assert_ne!(list, other, "order differs");
    }

    #[test]
    fn test_merge_counts_new_entries() {
        let a = Locator::loopback(1);
        let b = Locator::loopback(2);
        let mut list = LocatorList::from(a);
        let added = list.merge(&[a, b].into_iter().collect());
        assert_eq!(added, 1);
        assert!(list.remove(&a));
        assert!(!list.remove(&a));
    }

    #[test]
    fn test_socket_addr_conversion() {
        let addr: SocketAddr = "192.168.1.20:7412".parse().expect("valid addr");
        let loc = Locator::from_socket_addr(&addr, true);
        assert_eq!(loc.kind, LocatorKind::Tcpv4);
        assert_eq!(loc.to_socket_addr(), Some(addr));
        assert_eq!(Locator::loopback(3).to_socket_addr(), None);
    }

    #[test]
    fn test_multicast_detection() {
        assert!(Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400).is_multicast());
        assert!(!Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7400).is_multicast());
        assert!(Locator::loopback_group(1).is_multicast());
        assert!(!Locator::loopback(1).is_multicast());
    }
}
