// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message envelopes exchanged through the transport.
//!
//! Layout produced by [`JsonCodec`]:
//!
//! ```text
//! [0..4)   "RTPS"
//! [4]      protocol major
//! [5]      protocol minor
//! [6..8)   vendor id
//! [8..20)  sender GuidPrefix
//! [20..)   submessages (JSON)
//! ```
//!
//! The fixed header lets the receiver drop its own datagrams and reject
//! incompatible versions before parsing the body. The body encoding is the
//! serialization collaborator's business; the engine only relies on the
//! [`Codec`] trait.

use serde::{Deserialize, Serialize};

use crate::core::{
    GuidPrefix, LocatorList, ProtocolVersion, VendorId, GUID_PREFIX_LEN, PROTOCOL_MAJOR,
    PROTOCOL_VERSION, VENDOR_ID,
};
use crate::discovery::record::DiscoveryChangeRecord;
use crate::error::{Error, Result};
use crate::reliability::{AckNackMsg, DataMsg, GapMsg, HeartbeatMsg};

/// Envelope magic.
pub const MAGIC: &[u8; 4] = b"RTPS";

/// Fixed header length.
pub const HEADER_LEN: usize = 8 + GUID_PREFIX_LEN;

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submessage {
    /// Best-effort participant announcement (PDP).
    Announcement(DiscoveryChangeRecord),
    Data(DataMsg),
    Heartbeat(HeartbeatMsg),
    AckNack(AckNackMsg),
    Gap(GapMsg),
}

impl Submessage {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Submessage::Announcement(_) => "ANNOUNCE",
            Submessage::Data(_) => "DATA",
            Submessage::Heartbeat(_) => "HEARTBEAT",
            Submessage::AckNack(_) => "ACKNACK",
            Submessage::Gap(_) => "GAP",
        }
    }
}

/// A datagram: header fields plus submessages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: ProtocolVersion,
    pub vendor: VendorId,
    pub sender: GuidPrefix,
    pub submessages: Vec<Submessage>,
}

impl Envelope {
    /// Envelope from `sender` with our protocol version and vendor.
    #[must_use]
    pub fn new(sender: GuidPrefix, submessages: Vec<Submessage>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            vendor: VENDOR_ID,
            sender,
            submessages,
        }
    }
}

/// A submessage and where to send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub destination: LocatorList,
    pub submessage: Submessage,
}

impl Outgoing {
    #[must_use]
    pub fn new(destination: LocatorList, submessage: Submessage) -> Self {
        Self {
            destination,
            submessage,
        }
    }
}

/// Envelope (de)serialization collaborator.
pub trait Codec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Envelope>;

    /// Sender of a datagram, read from the header only.
    fn peek_sender(&self, bytes: &[u8]) -> Option<GuidPrefix> {
        let header = bytes.get(..HEADER_LEN)?;
        if &header[..4] != MAGIC {
            return None;
        }
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(&header[8..HEADER_LEN]);
        Some(GuidPrefix::new(prefix))
    }
}

/// Fixed binary header followed by a JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&envelope.submessages)?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.push(envelope.version.major);
        out.push(envelope.version.minor);
        out.extend_from_slice(&envelope.vendor);
        out.extend_from_slice(envelope.sender.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Malformed(format!(
                "datagram of {} bytes is shorter than the header",
                bytes.len()
            )));
        }
        if &bytes[..4] != MAGIC {
            return Err(Error::Malformed("bad magic".into()));
        }
        let version = ProtocolVersion::new(bytes[4], bytes[5]);
        if version.major != PROTOCOL_MAJOR {
            return Err(Error::IncompatibleVersion {
                major: version.major,
                minor: version.minor,
            });
        }
        let vendor = [bytes[6], bytes[7]];
        let sender = self
            .peek_sender(bytes)
            .ok_or_else(|| Error::Malformed("truncated header".into()))?;
        let submessages: Vec<Submessage> = serde_json::from_slice(&bytes[HEADER_LEN..])?;
        Ok(Envelope {
            version,
            vendor,
            sender,
            submessages,
        })
    }
}

/// Serialized payload of a builtin discovery sample.
pub fn encode_record(record: &DiscoveryChangeRecord) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

pub fn decode_record(payload: &[u8]) -> Result<DiscoveryChangeRecord> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::Malformed(format!("discovery payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, Guid, SequenceNumber};

    fn announcement() -> Submessage {
        let prefix = GuidPrefix::new([3; 12]);
        Submessage::Announcement(DiscoveryChangeRecord::dispose(
            Guid::new(prefix, EntityId::SPDP_WRITER),
            SequenceNumber::FIRST,
            Guid::participant(prefix),
        ))
    }

    #[test]
    fn test_encode_decode_envelope() {
        let envelope = Envelope::new(GuidPrefix::new([3; 12]), vec![announcement()]);
        let bytes = JsonCodec.encode(&envelope).expect("encode");
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(JsonCodec.peek_sender(&bytes), Some(envelope.sender));
        assert_eq!(JsonCodec.decode(&bytes).expect("decode"), envelope);
    }

    #[test]
    fn test_rejects_other_major_version() {
        let mut envelope = Envelope::new(GuidPrefix::new([3; 12]), vec![]);
        envelope.version = ProtocolVersion::new(3, 0);
        let bytes = JsonCodec.encode(&envelope).expect("encode");
        assert!(matches!(
            JsonCodec.decode(&bytes),
            Err(Error::IncompatibleVersion { major: 3, minor: 0 })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(JsonCodec.decode(b"RTP"), Err(Error::Malformed(_))));
        assert!(matches!(
            JsonCodec.decode(b"XXXX\x02\x04\x01\xaa000000000000"),
            Err(Error::Malformed(_))
        ));
        let mut bytes = JsonCodec
            .encode(&Envelope::new(GuidPrefix::new([3; 12]), vec![]))
            .expect("encode");
        bytes.extend_from_slice(b"garbage");
        assert!(JsonCodec.decode(&bytes).is_err());
        assert!(JsonCodec.peek_sender(b"XXXX").is_none());
    }
}
