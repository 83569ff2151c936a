// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery change records: one observed announcement or retraction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{Guid, GuidPrefix, SequenceNumber};
use crate::error::{Error, Result};
use crate::proxy::ProxyData;

/// What a record says about its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Alive,
    /// Entity deleted.
    Dispose,
    /// Entity no longer announced by this writer.
    Unregister,
}

impl ChangeKind {
    /// Dispose or unregister.
    #[must_use]
    pub fn is_retraction(&self) -> bool {
        !matches!(self, ChangeKind::Alive)
    }
}

/// How a record reached this node.
///
/// Not carried on the wire: the receiver classifies every record from the
/// sender of the enclosing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Origin {
    /// Produced by the subject's own participant (or by us).
    #[default]
    Local,
    /// Forwarded by the server `via`.
    Relayed { via: GuidPrefix },
}

impl Origin {
    /// Classify a record about `subject` received from `sender`.
    #[must_use]
    pub fn classify(sender: GuidPrefix, subject: &Guid) -> Self {
        if sender == subject.prefix {
            Origin::Local
        } else {
            Origin::Relayed { via: sender }
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }

    /// Relaying server, if any.
    #[must_use]
    pub fn via(&self) -> Option<GuidPrefix> {
        match self {
            Origin::Local => None,
            Origin::Relayed { via } => Some(*via),
        }
    }
}

/// One entry of the discovery database log.
///
/// `(writer, sequence)` identifies the record; relays forward it unchanged so
/// copies arriving over several paths collapse into one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryChangeRecord {
    /// Builtin writer that produced the record.
    pub writer: Guid,
    pub sequence: SequenceNumber,
    pub kind: ChangeKind,
    /// Participant or endpoint the record describes.
    pub subject: Guid,
    /// Present for `Alive` records.
    pub data: Option<ProxyData>,
    #[serde(skip)]
    pub origin: Origin,
}

impl DiscoveryChangeRecord {
    #[must_use]
    pub fn alive(writer: Guid, sequence: SequenceNumber, data: ProxyData) -> Self {
        Self {
            writer,
            sequence,
            kind: ChangeKind::Alive,
            subject: data.guid(),
            data: Some(data),
            origin: Origin::Local,
        }
    }

    #[must_use]
    pub fn dispose(writer: Guid, sequence: SequenceNumber, subject: Guid) -> Self {
        Self {
            writer,
            sequence,
            kind: ChangeKind::Dispose,
            subject,
            data: None,
            origin: Origin::Local,
        }
    }

    #[must_use]
    pub fn unregister(writer: Guid, sequence: SequenceNumber, subject: Guid) -> Self {
        Self {
            kind: ChangeKind::Unregister,
            ..Self::dispose(writer, sequence, subject)
        }
    }

    /// Same record with a different origin.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.kind == ChangeKind::Alive
    }

    /// True when the subject is a participant.
    #[must_use]
    pub fn is_participant(&self) -> bool {
        self.subject.is_participant()
    }

    /// Structural checks applied to every received record.
    pub fn validate(&self) -> Result<()> {
        if self.subject.is_unknown() || self.writer.is_unknown() {
            return Err(Error::Malformed(format!(
                "record {} references the unknown guid",
                self
            )));
        }
        if !self.sequence.is_valid() {
            return Err(Error::Malformed(format!(
                "record {} has invalid sequence number",
                self
            )));
        }
        match (&self.kind, &self.data) {
            (ChangeKind::Alive, None) => Err(Error::Malformed(format!(
                "alive record {} without data",
                self
            ))),
            (ChangeKind::Alive, Some(data)) if data.guid() != self.subject => {
                Err(Error::Malformed(format!(
                    "record {} carries data for {}",
                    self,
                    data.guid()
                )))
            }
            (ChangeKind::Alive, Some(ProxyData::Writer(_)))
                if !self.subject.entity_id.is_writer() =>
            {
                Err(Error::Malformed(format!("record {} mixes entity kinds", self)))
            }
            (ChangeKind::Alive, Some(ProxyData::Reader(_)))
                if !self.subject.entity_id.is_reader() =>
            {
                Err(Error::Malformed(format!("record {} mixes entity kinds", self)))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DiscoveryChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({} by {}@{})",
            self.kind, self.subject, self.writer, self.sequence
        )
    }
}
