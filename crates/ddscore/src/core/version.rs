// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol and vendor identification constants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Two-byte vendor identifier.
pub type VendorId = [u8; 2];

/// Vendor id stamped on every envelope and participant announcement.
pub const VENDOR_ID: VendorId = [0x01, 0xAA];

/// Major protocol version accepted from peers.
pub const PROTOCOL_MAJOR: u8 = 2;

/// Protocol version spoken by this engine.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 2, minor: 4 };

/// Discovery-server protocol version announced by server-aware roles.
pub const DS_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

/// Oldest discovery-server protocol version accepted from a server peer.
pub const MIN_DS_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

/// `major.minor` version pair (ordered lexicographically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
