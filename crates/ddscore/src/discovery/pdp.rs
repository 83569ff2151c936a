// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant Discovery Protocol.
//!
//! # State machine
//!
//! ```text
//! Initializing --start()--> Announcing --burst done--> SteadyState
//! ```
//!
//! While `Announcing` the participant sends `initial_announcements` fast
//! announcements, then one per `announcement_period`. The PDP itself does no
//! I/O: [`Pdp::poll_announcement`] hands out the record when one is due and
//! the engine turns it into a datagram.
//!
//! # Topologies
//!
//! | Role | Announces to |
//! |------|--------------|
//! | Simple | multicast group and initial peers |
//! | Server / Backup | peer servers and every directly connected participant |
//! | Client / SuperClient | its servers |

use std::time::{Duration, Instant};

use crate::config::{DiscoveryRole, ParticipantConfig};
use crate::core::{EntityId, Guid, GuidPrefix, LocatorList, SeqNumGenerator};
use crate::discovery::lease::LeaseTracker;
use crate::discovery::record::{DiscoveryChangeRecord, Origin};
use crate::discovery::validation::{validate_participant, LocalIdentity, Rejection};
use crate::proxy::{ParticipantKind, ParticipantProxyData, ProxyData};

/// PDP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdpState {
    Initializing,
    /// Initial burst in progress.
    Announcing,
    SteadyState,
}

/// Decision on a received participant record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdpVerdict {
    Accept,
    Reject(Rejection),
}

/// Participant discovery state of one local participant.
#[derive(Debug)]
pub struct Pdp {
    identity: LocalIdentity,
    local: ParticipantProxyData,
    role: DiscoveryRole,
    state: PdpState,
    sequence: SeqNumGenerator,
    current: Option<DiscoveryChangeRecord>,
    leases: LeaseTracker,
    burst_left: u32,
    burst_period: Duration,
    period: Duration,
    next_announcement: Option<Instant>,
    multicast: LocatorList,
}

impl Pdp {
    /// `local` is our own announcement content; `multicast` the discovery
    /// groups used by the simple topology.
    #[must_use]
    pub fn new(config: &ParticipantConfig, local: ParticipantProxyData, multicast: LocatorList) -> Self {
        let identity = LocalIdentity {
            prefix: local.guid.prefix,
            domain_id: local.domain_id,
            kind: local.kind,
            vendor: local.vendor,
        };
        Self {
            identity,
            local,
            role: config.role.clone(),
            state: PdpState::Initializing,
            sequence: SeqNumGenerator::new(),
            current: None,
            leases: LeaseTracker::new(),
            burst_left: config.initial_announcements,
            burst_period: config.initial_announcement_period,
            period: config.announcement_period,
            next_announcement: None,
            multicast,
        }
    }

    #[must_use]
    pub fn state(&self) -> PdpState {
        self.state
    }

    #[must_use]
    pub fn prefix(&self) -> GuidPrefix {
        self.identity.prefix
    }

    #[must_use]
    pub fn kind(&self) -> ParticipantKind {
        self.identity.kind
    }

    #[must_use]
    pub fn role(&self) -> &DiscoveryRole {
        &self.role
    }

    #[must_use]
    pub fn local_data(&self) -> &ParticipantProxyData {
        &self.local
    }

    /// Guid of our announcement writer.
    #[must_use]
    pub fn writer_guid(&self) -> Guid {
        Guid::new(self.identity.prefix, EntityId::SPDP_WRITER)
    }

    /// Begin announcing; the first announcement is due immediately.
    pub fn start(&mut self, now: Instant) {
        if self.state != PdpState::Initializing {
            return;
        }
        self.current = Some(self.next_alive_record());
        self.state = PdpState::Announcing;
        self.next_announcement = Some(now);
        log::info!(
            "[PDP] Participant {} ({}) announcing",
            self.identity.prefix,
            self.identity.kind
        );
    }

    fn next_alive_record(&self) -> DiscoveryChangeRecord {
        DiscoveryChangeRecord::alive(
            self.writer_guid(),
            self.sequence.next(),
            ProxyData::Participant(self.local.clone()),
        )
    }

    /// Current alive announcement of the local participant.
    #[must_use]
    pub fn local_record(&self) -> Option<&DiscoveryChangeRecord> {
        self.current.as_ref()
    }

    /// Replace our announcement content; the new record gets a fresh sequence
    /// number and is announced at once.
    pub fn update_local(&mut self, local: ParticipantProxyData, now: Instant) {
        self.local = local;
        if self.state != PdpState::Initializing {
            self.current = Some(self.next_alive_record());
            self.next_announcement = Some(now);
        }
    }

    /// Announcement to send at `now`, if one is due.
    pub fn poll_announcement(&mut self, now: Instant) -> Option<DiscoveryChangeRecord> {
        let due = self.next_announcement?;
        if now < due {
            return None;
        }
        let record = self.current.clone()?;
        let interval = if self.burst_left > 0 {
            self.burst_left -= 1;
            self.burst_period
        } else {
            if self.state == PdpState::Announcing {
                log::debug!("[PDP] Initial announcements done, steady state");
            }
            self.state = PdpState::SteadyState;
            self.period
        };
        self.next_announcement = Some(now + interval);
        Some(record)
    }

    /// When the next announcement is due.
    #[must_use]
    pub fn next_announcement(&self) -> Option<Instant> {
        self.next_announcement
    }

    /// Retraction of the local participant, sent on orderly shutdown.
    pub fn dispose_record(&mut self) -> DiscoveryChangeRecord {
        self.next_announcement = None;
        DiscoveryChangeRecord::dispose(
            self.writer_guid(),
            self.sequence.next(),
            Guid::participant(self.identity.prefix),
        )
    }

    /// Validate a participant announcement.
    pub fn validate(&self, data: &ParticipantProxyData, origin: Origin) -> Result<(), Rejection> {
        validate_participant(&self.identity, data, !origin.is_local())
    }

    /// Screen a received participant record.
    pub fn on_participant_record(&self, record: &DiscoveryChangeRecord) -> PdpVerdict {
        let Some(ProxyData::Participant(data)) = &record.data else {
            // Retractions carry no data; only their subject is checked.
            if record.subject.prefix == self.identity.prefix {
                return PdpVerdict::Reject(Rejection::OwnAnnouncement);
            }
            return PdpVerdict::Accept;
        };
        if let Err(rejection) = self.validate(data, record.origin) {
            log::debug!("[PDP] Rejected {}: {}", record.subject, rejection);
            return PdpVerdict::Reject(rejection);
        }
        PdpVerdict::Accept
    }

    /// Renew the lease of the participant a direct announcement describes.
    ///
    /// Called for every announcement the database holds as current,
    /// duplicates included: a periodic announcement repeats the same
    /// sequence number.
    pub fn renew_lease(&mut self, record: &DiscoveryChangeRecord, now: Instant) {
        if !record.origin.is_local() {
            return;
        }
        if let Some(ProxyData::Participant(data)) = &record.data {
            self.leases
                .refresh(record.subject.prefix, data.lease_duration, now);
        }
    }

    /// Arm a lease without an announcement (database restore).
    pub fn track_lease(&mut self, prefix: GuidPrefix, duration: Duration, now: Instant) {
        self.leases.refresh(prefix, duration, now);
    }

    /// Stop tracking the lease of a removed participant.
    pub fn forget(&mut self, prefix: &GuidPrefix) {
        self.leases.remove(prefix);
    }

    /// Participants whose lease elapsed.
    pub fn check_leases(&mut self, now: Instant) -> Vec<GuidPrefix> {
        self.leases.expired(now)
    }

    #[must_use]
    pub fn has_lease(&self, prefix: &GuidPrefix) -> bool {
        self.leases.contains(prefix)
    }

    /// Where announcements go. `direct` holds the metatraffic unicast of
    /// every directly connected participant.
    #[must_use]
    pub fn announcement_targets(&self, direct: &[LocatorList]) -> LocatorList {
        let mut targets = LocatorList::new();
        match &self.role {
            DiscoveryRole::Simple { initial_peers } => {
                targets.merge(&self.multicast);
                for locator in initial_peers {
                    targets.push(*locator);
                }
            }
            DiscoveryRole::Server { peer_servers } | DiscoveryRole::Backup { peer_servers } => {
                for server in peer_servers {
                    targets.merge(&server.locator_list());
                }
                for locators in direct {
                    targets.merge(locators);
                }
            }
            DiscoveryRole::Client { servers } | DiscoveryRole::SuperClient { servers } => {
                for server in servers {
                    targets.merge(&server.locator_list());
                }
            }
        }
        targets
    }

    /// Drop leases and stop announcing (shutdown).
    pub fn stop(&mut self) {
        self.leases.clear();
        self.next_announcement = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteServer;
    use crate::core::{Locator, SequenceNumber};
    use crate::test_support::{participant_data, prefix};

    fn pdp(kind: ParticipantKind, role: DiscoveryRole) -> Pdp {
        let config = ParticipantConfig::default()
            .with_role(role)
            .with_initial_announcements(2, Duration::from_millis(100));
        let local = participant_data(100, kind);
        Pdp::new(&config, local, Locator::loopback_group(0).into())
    }

    fn simple() -> Pdp {
        pdp(ParticipantKind::Simple, DiscoveryRole::default())
    }

    fn announcement(n: u8, kind: ParticipantKind) -> DiscoveryChangeRecord {
        DiscoveryChangeRecord::alive(
            Guid::new(prefix(n), EntityId::SPDP_WRITER),
            SequenceNumber::FIRST,
            ProxyData::Participant(participant_data(n, kind)),
        )
    }

    #[test]
    fn test_announcement_schedule() {
        let t0 = Instant::now();
        let mut pdp = simple();
        assert!(pdp.poll_announcement(t0).is_none(), "nothing before start");

        pdp.start(t0);
        assert_eq!(pdp.state(), PdpState::Announcing);
        assert!(pdp.poll_announcement(t0).is_some());
        assert!(pdp.poll_announcement(t0 + Duration::from_millis(50)).is_none());
        assert!(pdp.poll_announcement(t0 + Duration::from_millis(100)).is_some());
        let third = pdp.poll_announcement(t0 + Duration::from_millis(200));
        assert!(third.is_some());
        assert_eq!(pdp.state(), PdpState::SteadyState);
        assert_eq!(
            pdp.next_announcement(),
            Some(t0 + Duration::from_millis(200) + crate::config::ANNOUNCEMENT_PERIOD)
        );
        assert_eq!(
            third.map(|r| r.sequence),
            Some(SequenceNumber::FIRST),
            "periodic announcements repeat the same record"
        );
    }

    #[test]
    fn test_dispose_record_uses_next_sequence() {
        let mut pdp = simple();
        pdp.start(Instant::now());
        let dispose = pdp.dispose_record();
        assert!(dispose.kind.is_retraction());
        assert_eq!(dispose.sequence, SequenceNumber::from(2u64));
        assert_eq!(dispose.subject, Guid::participant(prefix(100)));
        assert!(pdp.next_announcement().is_none());
    }

    #[test]
    fn test_direct_announcement_refreshes_lease() {
        let t0 = Instant::now();
        let mut pdp = simple();
        let record = announcement(1, ParticipantKind::Simple);
        assert_eq!(pdp.on_participant_record(&record), PdpVerdict::Accept);
        assert!(!pdp.has_lease(&prefix(1)), "screening alone arms no lease");
        pdp.renew_lease(&record, t0);
        assert!(pdp.has_lease(&prefix(1)));

        let relayed = announcement(2, ParticipantKind::Simple)
            .with_origin(Origin::Relayed { via: prefix(9) });
        pdp.renew_lease(&relayed, t0);
        assert!(!pdp.has_lease(&prefix(2)), "relayed participants hold no lease");

        pdp.renew_lease(&record, t0 + Duration::from_secs(20));
        assert!(pdp.check_leases(t0 + Duration::from_secs(30)).is_empty());
        assert_eq!(pdp.check_leases(t0 + Duration::from_secs(50)), vec![prefix(1)]);
    }

    #[test]
    fn test_simple_participant_rejects_server_announcement() {
        let pdp = simple();
        let record = announcement(1, ParticipantKind::Server);
        assert!(matches!(
            pdp.on_participant_record(&record),
            PdpVerdict::Reject(Rejection::RolePolicy { .. })
        ));
        assert!(!pdp.has_lease(&prefix(1)));
    }

    #[test]
    fn test_announcement_targets_per_role() {
        let simple = pdp(
            ParticipantKind::Simple,
            DiscoveryRole::Simple {
                initial_peers: vec![Locator::loopback(42)],
            },
        );
        let targets = simple.announcement_targets(&[]);
        assert!(targets.contains(&Locator::loopback_group(0)));
        assert!(targets.contains(&Locator::loopback(42)));

        let server = RemoteServer::new(prefix(50), vec![Locator::loopback(50)]);
        let client = pdp(
            ParticipantKind::Client,
            DiscoveryRole::Client {
                servers: vec![server.clone()],
            },
        );
        let targets = client.announcement_targets(&[Locator::loopback(7).into()]);
        assert_eq!(targets.len(), 1, "clients only talk to their servers");

        let srv = pdp(
            ParticipantKind::Server,
            DiscoveryRole::Server {
                peer_servers: vec![server],
            },
        );
        let targets = srv.announcement_targets(&[Locator::loopback(7).into()]);
        assert!(targets.contains(&Locator::loopback(50)));
        assert!(targets.contains(&Locator::loopback(7)));
        assert!(!targets.contains(&Locator::loopback_group(0)));
    }
}
