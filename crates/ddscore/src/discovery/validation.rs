// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant announcement validation.
//!
//! Checks run in order: identity, domain, protocol version, participant-type
//! policy, then discovery-server compatibility for non-simple pairs. A
//! rejected announcement is logged and ignored; it never mutates state.

use std::fmt;

use crate::core::{GuidPrefix, ProtocolVersion, VendorId, MIN_DS_VERSION, PROTOCOL_MAJOR};
use crate::error::Error;
use crate::proxy::{ParticipantKind, ParticipantProxyData};

/// What the local participant is, for validation purposes.
#[derive(Debug, Clone, Copy)]
pub struct LocalIdentity {
    pub prefix: GuidPrefix,
    pub domain_id: u32,
    pub kind: ParticipantKind,
    pub vendor: VendorId,
}

/// Why an announcement was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Our own announcement looped back.
    OwnAnnouncement,
    UnknownGuid,
    /// Guid does not name a participant.
    NotAParticipant,
    DomainMismatch { expected: u32, got: u32 },
    IncompatibleProtocol(ProtocolVersion),
    /// Participant-type policy forbids this pairing.
    RolePolicy {
        local: ParticipantKind,
        remote: ParticipantKind,
    },
    VendorMismatch(VendorId),
    DsVersion(ProtocolVersion),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::OwnAnnouncement => write!(f, "own announcement"),
            Rejection::UnknownGuid => write!(f, "unknown guid"),
            Rejection::NotAParticipant => write!(f, "guid is not a participant"),
            Rejection::DomainMismatch { expected, got } => {
                write!(f, "domain {} (expected {})", got, expected)
            }
            Rejection::IncompatibleProtocol(v) => write!(f, "protocol version {}", v),
            Rejection::RolePolicy { local, remote } => {
                write!(f, "{} participant does not accept {}", local, remote)
            }
            Rejection::VendorMismatch(v) => {
                write!(f, "vendor {:02x}.{:02x} in server topology", v[0], v[1])
            }
            Rejection::DsVersion(v) => write!(f, "discovery-server version {}", v),
        }
    }
}

impl From<Rejection> for Error {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::IncompatibleProtocol(v) => Error::IncompatibleVersion {
                major: v.major,
                minor: v.minor,
            },
            other => Error::Malformed(other.to_string()),
        }
    }
}

/// Participant-type policy.
///
/// A `Simple` participant only talks to other simple participants. Clients
/// accept servers directly and anything a server relays. Servers accept any
/// non-simple participant.
#[must_use]
pub fn role_accepts(local: ParticipantKind, remote: ParticipantKind, relayed: bool) -> bool {
    match local {
        ParticipantKind::Simple => remote == ParticipantKind::Simple,
        ParticipantKind::Client | ParticipantKind::SuperClient => {
            remote.is_server() || (relayed && remote != ParticipantKind::Simple)
        }
        ParticipantKind::Server | ParticipantKind::Backup => remote != ParticipantKind::Simple,
    }
}

/// Validate a participant announcement. `relayed` is true when the record
/// was forwarded by a server rather than sent by its subject.
pub fn validate_participant(
    local: &LocalIdentity,
    data: &ParticipantProxyData,
    relayed: bool,
) -> Result<(), Rejection> {
    if data.guid.is_unknown() {
        return Err(Rejection::UnknownGuid);
    }
    if !data.guid.is_participant() {
        return Err(Rejection::NotAParticipant);
    }
    if data.guid.prefix == local.prefix {
        return Err(Rejection::OwnAnnouncement);
    }
    if data.domain_id != local.domain_id {
        return Err(Rejection::DomainMismatch {
            expected: local.domain_id,
            got: data.domain_id,
        });
    }
    if data.protocol_version.major != PROTOCOL_MAJOR {
        return Err(Rejection::IncompatibleProtocol(data.protocol_version));
    }
    if !role_accepts(local.kind, data.kind, relayed) {
        return Err(Rejection::RolePolicy {
            local: local.kind,
            remote: data.kind,
        });
    }
    if local.kind != ParticipantKind::Simple {
        if data.vendor != local.vendor {
            return Err(Rejection::VendorMismatch(data.vendor));
        }
        if data.ds_version < MIN_DS_VERSION {
            return Err(Rejection::DsVersion(data.ds_version));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Guid, VENDOR_ID};
    use crate::test_support::{participant_data, prefix};

    fn local(kind: ParticipantKind) -> LocalIdentity {
        LocalIdentity {
            prefix: prefix(100),
            domain_id: 0,
            kind,
            vendor: VENDOR_ID,
        }
    }

    #[test]
    fn test_accepts_matching_simple_peer() {
        let data = participant_data(1, ParticipantKind::Simple);
        assert_eq!(validate_participant(&local(ParticipantKind::Simple), &data, false), Ok(()));
    }

    #[test]
    fn test_rejects_own_and_unknown() {
        let mut data = participant_data(100, ParticipantKind::Simple);
        assert_eq!(
            validate_participant(&local(ParticipantKind::Simple), &data, false),
            Err(Rejection::OwnAnnouncement)
        );
        data.guid = Guid::UNKNOWN;
        assert_eq!(
            validate_participant(&local(ParticipantKind::Simple), &data, false),
            Err(Rejection::UnknownGuid)
        );
    }

    #[test]
    fn test_rejects_domain_and_version() {
        let mut data = participant_data(1, ParticipantKind::Simple);
        data.domain_id = 3;
        assert!(matches!(
            validate_participant(&local(ParticipantKind::Simple), &data, false),
            Err(Rejection::DomainMismatch { expected: 0, got: 3 })
        ));

        let mut data = participant_data(1, ParticipantKind::Simple);
        data.protocol_version = ProtocolVersion::new(3, 0);
        let rejection = validate_participant(&local(ParticipantKind::Simple), &data, false)
            .expect_err("major 3 must be rejected");
        assert!(matches!(
            Error::from(rejection),
            Error::IncompatibleVersion { major: 3, .. }
        ));
    }

    #[test]
    fn test_simple_rejects_server_roles() {
        for kind in [
            ParticipantKind::Server,
            ParticipantKind::Backup,
            ParticipantKind::Client,
            ParticipantKind::SuperClient,
        ] {
            let data = participant_data(1, kind);
            assert!(
                matches!(
                    validate_participant(&local(ParticipantKind::Simple), &data, false),
                    Err(Rejection::RolePolicy { .. })
                ),
                "simple participant must reject {}",
                kind
            );
        }
    }

    #[test]
    fn test_client_policy() {
        let client = local(ParticipantKind::Client);
        let server = participant_data(1, ParticipantKind::Server);
        let peer_client = participant_data(2, ParticipantKind::Client);
        assert_eq!(validate_participant(&client, &server, false), Ok(()));
        assert!(validate_participant(&client, &peer_client, false).is_err());
        assert_eq!(
            validate_participant(&client, &peer_client, true),
            Ok(()),
            "clients learn other clients through servers"
        );
    }

    #[test]
    fn test_server_requires_vendor_and_ds_version() {
        let server = local(ParticipantKind::Server);
        let mut data = participant_data(1, ParticipantKind::Client);
        assert_eq!(validate_participant(&server, &data, false), Ok(()));

        data.ds_version = ProtocolVersion::new(0, 9);
        assert!(matches!(
            validate_participant(&server, &data, false),
            Err(Rejection::DsVersion(_))
        ));

        let mut data = participant_data(1, ParticipantKind::Backup);
        data.vendor = [0x01, 0x0f];
        assert!(matches!(
            validate_participant(&server, &data, false),
            Err(Rejection::VendorMismatch(_))
        ));

        let simple = participant_data(2, ParticipantKind::Simple);
        assert!(validate_participant(&server, &simple, false).is_err());
    }
}
