// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID (Globally Unique Identifier) implementation.
//!
//! # Structure
//! - Prefix: 12 bytes (participant instance, host + process scope)
//! - Entity ID: 4 bytes (role of the entity within its participant)
//!
//! # Display Format
//! Hex with dots: "01.aa.3c.10.00.00.12.34.00.00.00.01|00.00.01.c1"

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// GUID prefix length (12 bytes).
pub const GUID_PREFIX_LEN: usize = 12;
/// Entity ID length (4 bytes).
pub const ENTITY_ID_LEN: usize = 4;

/// Per-process counter mixed into generated prefixes.
static PREFIX_COUNTER: AtomicU32 = AtomicU32::new(1);

// ============================================================================
// GUID PREFIX
// ============================================================================

/// 12-byte participant identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct GuidPrefix(pub [u8; GUID_PREFIX_LEN]);

impl GuidPrefix {
    /// Sentinel "unknown" prefix (all zeros).
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; GUID_PREFIX_LEN]);

    /// Wrap raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; GUID_PREFIX_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh prefix for a new participant.
    ///
    /// Layout: vendor id (2) | random host bits (4) | process id (4) | counter (2).
    #[must_use]
    pub fn generate(vendor: [u8; 2]) -> Self {
        let mut bytes = [0u8; GUID_PREFIX_LEN];
        bytes[0..2].copy_from_slice(&vendor);
        bytes[2..6].copy_from_slice(&fastrand::u32(..).to_be_bytes());
        bytes[6..10].copy_from_slice(&std::process::id().to_be_bytes());
        let counter = PREFIX_COUNTER.fetch_add(1, Ordering::Relaxed) as u16;
        bytes[10..12].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    /// True for the all-zero sentinel.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; GUID_PREFIX_LEN] {
        &self.0
    }
}

impl fmt::Display for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuidPrefix({})", self)
    }
}

// ============================================================================
// ENTITY ID
// ============================================================================

/// 4-byte entity identifier: 3-byte key + 1-byte kind.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct EntityId(pub [u8; ENTITY_ID_LEN]);

/// Entity kind: user writer without key.
const KIND_USER_WRITER: u8 = 0x03;
/// Entity kind: user reader without key.
const KIND_USER_READER: u8 = 0x04;
/// Builtin bit pattern (top two bits of the kind octet).
const KIND_BUILTIN_MASK: u8 = 0xc0;

impl EntityId {
    /// ENTITYID_UNKNOWN.
    pub const UNKNOWN: EntityId = EntityId([0x00, 0x00, 0x00, 0x00]);
    /// The participant itself.
    pub const PARTICIPANT: EntityId = EntityId([0x00, 0x00, 0x01, 0xc1]);
    /// SPDP announcement writer.
    pub const SPDP_WRITER: EntityId = EntityId([0x00, 0x01, 0x00, 0xc2]);
    /// SPDP announcement reader.
    pub const SPDP_READER: EntityId = EntityId([0x00, 0x01, 0x00, 0xc7]);
    /// Reliable participant-relay writer (server topology).
    pub const PDP_RELAY_WRITER: EntityId = EntityId([0x00, 0x02, 0x00, 0xc2]);
    /// Reliable participant-relay reader (server topology).
    pub const PDP_RELAY_READER: EntityId = EntityId([0x00, 0x02, 0x00, 0xc7]);
    /// SEDP publications writer.
    pub const SEDP_PUBLICATIONS_WRITER: EntityId = EntityId([0x00, 0x00, 0x03, 0xc2]);
    /// SEDP publications reader.
    pub const SEDP_PUBLICATIONS_READER: EntityId = EntityId([0x00, 0x00, 0x03, 0xc7]);
    /// SEDP subscriptions writer.
    pub const SEDP_SUBSCRIPTIONS_WRITER: EntityId = EntityId([0x00, 0x00, 0x04, 0xc2]);
    /// SEDP subscriptions reader.
    pub const SEDP_SUBSCRIPTIONS_READER: EntityId = EntityId([0x00, 0x00, 0x04, 0xc7]);

    /// User writer entity id from a 24-bit key.
    #[must_use]
    pub fn user_writer(key: u32) -> Self {
        Self::with_kind(key, KIND_USER_WRITER)
    }

    /// User reader entity id from a 24-bit key.
    #[must_use]
    pub fn user_reader(key: u32) -> Self {
        Self::with_kind(key, KIND_USER_READER)
    }

    fn with_kind(key: u32, kind: u8) -> Self {
        let k = key.to_be_bytes();
        Self([k[1], k[2], k[3], kind])
    }

    /// Kind octet.
    #[must_use]
    pub fn kind(&self) -> u8 {
        self.0[3]
    }

    /// True for builtin (protocol-owned) entities.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.kind() & KIND_BUILTIN_MASK == KIND_BUILTIN_MASK
    }

    /// True for writer entities (keyed or not, builtin or user).
    #[must_use]
    pub fn is_writer(&self) -> bool {
        matches!(self.kind() & 0x0f, 0x02 | 0x03)
    }

    /// True for reader entities (keyed or not, builtin or user).
    #[must_use]
    pub fn is_reader(&self) -> bool {
        matches!(self.kind() & 0x0f, 0x04 | 0x07)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}.{:02x}.{:02x}.{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self)
    }
}

// ============================================================================
// GUID
// ============================================================================

/// RTPS GUID (prefix + entity id). Equality is byte-wise.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// Sentinel "unknown" Guid. Never equal to a real identity.
    pub const UNKNOWN: Guid = Guid {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: EntityId::UNKNOWN,
    };

    /// Create GUID from separate prefix and entity ID.
    #[must_use]
    pub const fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// Create GUID from raw bytes (16 bytes total).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        let mut entity_id = [0u8; ENTITY_ID_LEN];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self {
            prefix: GuidPrefix(prefix),
            entity_id: EntityId(entity_id),
        }
    }

    /// Convert GUID to 16-byte array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix.0);
        bytes[12..16].copy_from_slice(&self.entity_id.0);
        bytes
    }

    /// Participant Guid for a prefix.
    #[must_use]
    pub const fn participant(prefix: GuidPrefix) -> Self {
        Self::new(prefix, EntityId::PARTICIPANT)
    }

    /// True when the prefix is the zero sentinel.
    ///
    /// Any comparison against a real identity must exclude this value first.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.prefix.is_unknown()
    }

    /// True if this Guid names a participant.
    #[must_use]
    pub fn is_participant(&self) -> bool {
        self.entity_id == EntityId::PARTICIPANT
    }

    /// Guid of the participant owning this entity.
    #[must_use]
    pub fn participant_guid(&self) -> Guid {
        Guid::participant(self.prefix)
    }

    /// Same entity, compared only when both sides are real identities.
    #[must_use]
    pub fn same_entity(&self, other: &Guid) -> bool {
        !self.is_unknown() && !other.is_unknown() && self == other
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.prefix, self.entity_id)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// Key of a data instance in a writer history (the subject Guid for
/// discovery data, `UNKEYED` for user topics).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    /// Handle used by unkeyed topics.
    pub const UNKEYED: InstanceHandle = InstanceHandle([0; 16]);
}

impl InstanceHandle {
    /// Guid carried by a discovery instance handle.
    #[must_use]
    pub fn to_guid(&self) -> Guid {
        Guid::from_bytes(self.0)
    }
}

impl From<Guid> for InstanceHandle {
    fn from(guid: Guid) -> Self {
        InstanceHandle(guid.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(n: u8) -> GuidPrefix {
        GuidPrefix([n, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, n])
    }

    #[test]
    fn test_guid_roundtrip_bytes() {
        let bytes = [1, 15, 172, 16, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 193];
        let guid = Guid::from_bytes(bytes);
        assert_eq!(guid.to_bytes(), bytes);
        assert!(guid.is_participant());
    }

    #[test]
    fn test_unknown_sentinel() {
        assert!(Guid::UNKNOWN.is_unknown());
        let zero_prefix_writer = Guid::new(GuidPrefix::UNKNOWN, EntityId::user_writer(1));
        assert!(zero_prefix_writer.is_unknown(), "zero prefix is always unknown");
        assert!(!zero_prefix_writer.same_entity(&zero_prefix_writer));

        let real = Guid::participant(prefix(1));
        assert!(!real.is_unknown());
        assert!(real.same_entity(&real));
    }

    #[test]
    fn test_generated_prefixes_differ() {
        let a = GuidPrefix::generate([0x01, 0xaa]);
        let b = GuidPrefix::generate([0x01, 0xaa]);
        assert_ne!(a, b);
        assert_eq!(&a.0[0..2], &[0x01, 0xaa]);
        assert!(!a.is_unknown());
    }

    #[test]
    fn test_entity_kinds() {
        assert!(EntityId::SEDP_PUBLICATIONS_WRITER.is_builtin());
        assert!(EntityId::SEDP_PUBLICATIONS_WRITER.is_writer());
        assert!(EntityId::SEDP_SUBSCRIPTIONS_READER.is_reader());

        let w = EntityId::user_writer(0x0102_03);
        assert_eq!(w.0, [0x01, 0x02, 0x03, 0x03]);
        assert!(w.is_writer() && !w.is_builtin());
        assert!(EntityId::user_reader(7).is_reader());
    }

    #[test]
    fn test_guid_display() {
        let guid = Guid::participant(prefix(1));
        assert_eq!(
            guid.to_string(),
            "01.00.00.00.00.00.00.00.00.00.00.01|00.00.01.c1"
        );
    }

    #[test]
    fn test_participant_guid_of_endpoint() {
        let w = Guid::new(prefix(3), EntityId::user_writer(9));
        assert_eq!(w.participant_guid(), Guid::participant(prefix(3)));
    }
}
