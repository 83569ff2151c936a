// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Identity, sequencing and locator value types used by every layer.

pub mod guid;
pub mod locator;
pub mod sequence;
pub mod version;

pub use guid::{EntityId, Guid, GuidPrefix, InstanceHandle, ENTITY_ID_LEN, GUID_PREFIX_LEN};
pub use locator::{Locator, LocatorKind, LocatorList};
pub use sequence::{
    SeqNumGenerator, SequenceNumber, SequenceNumberIter, SequenceNumberSet, MAX_BITMAP_BITS,
};
pub use version::{
    ProtocolVersion, VendorId, DS_VERSION, MIN_DS_VERSION, PROTOCOL_MAJOR, PROTOCOL_VERSION,
    VENDOR_ID,
};
