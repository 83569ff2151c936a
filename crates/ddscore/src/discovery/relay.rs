// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server relay targeting.
//!
//! A server forwards every newly applied record through its builtin
//! writers: participant records through the participant-relay writer,
//! endpoint records through the matching publications or subscriptions
//! writer. Each forwarded record excludes the participant it was received
//! from and the subject's own participant. Excluded readers receive a GAP
//! for that sequence number, so a record never travels back to the server it
//! came from, and copies arriving over several paths are dropped as
//! duplicates by the receiving database.

use crate::core::{EntityId, Guid, GuidPrefix, SeqNumGenerator};
use crate::discovery::record::{DiscoveryChangeRecord, Origin};

/// Where and to whom a record is forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPlan {
    /// Local builtin writer that carries the record.
    pub writer: EntityId,
    /// Participants that must not receive the record.
    pub exclude: Vec<GuidPrefix>,
}

/// Builtin writer carrying records about `subject`.
#[must_use]
pub fn relay_writer_for(subject: &Guid) -> Option<EntityId> {
    if subject.is_participant() {
        Some(EntityId::PDP_RELAY_WRITER)
    } else if subject.entity_id.is_writer() {
        Some(EntityId::SEDP_PUBLICATIONS_WRITER)
    } else if subject.entity_id.is_reader() {
        Some(EntityId::SEDP_SUBSCRIPTIONS_WRITER)
    } else {
        None
    }
}

/// Relay plan of an applied record received from `sender`.
///
/// Records about our own entities are never relayed; they already travel
/// through our builtin writers.
#[must_use]
pub fn plan(record: &DiscoveryChangeRecord, local: GuidPrefix) -> Option<RelayPlan> {
    if record.subject.prefix == local {
        return None;
    }
    let writer = relay_writer_for(&record.subject)?;
    let sender = match record.origin {
        Origin::Local => record.subject.prefix,
        Origin::Relayed { via } => via,
    };
    let mut exclude = vec![sender];
    if record.subject.prefix != sender {
        exclude.push(record.subject.prefix);
    }
    Some(RelayPlan { writer, exclude })
}

/// Retractions a server issues on behalf of participants it lost.
#[derive(Debug)]
pub struct ExpiryRetractions {
    writer: Guid,
    sequence: SeqNumGenerator,
}

impl ExpiryRetractions {
    #[must_use]
    pub fn new(local: GuidPrefix) -> Self {
        Self {
            writer: Guid::new(local, EntityId::PDP_RELAY_WRITER),
            sequence: SeqNumGenerator::new(),
        }
    }

    /// Dispose record for a participant whose lease expired.
    pub fn dispose(&self, lost: GuidPrefix) -> DiscoveryChangeRecord {
        log::info!("[RELAY] Announcing expiry of {} to the rest of the network", lost);
        DiscoveryChangeRecord::dispose(self.writer, self.sequence.next(), Guid::participant(lost))
    }
}
