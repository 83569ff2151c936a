// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Quality of Service policies carried by endpoints.
//!
//! Only the policies the protocol engine acts on are modelled:
//!
//! | Policy | Used by |
//! |--------|---------|
//! | Reliability | EDP matching, reliable delivery |
//! | Durability | EDP matching, late-joiner replay, persistence |
//! | History / ResourceLimits | writer history eviction and backpressure |
//! | Deadline / Ownership / Liveliness | EDP matching |
//! | Partition | EDP matching filter |
//!
//! # Example
//!
//! ```
//! use ddscore::qos::{QoS, History, Reliability};
//!
//! let qos = QoS::reliable().transient_local().keep_last(10);
//! assert_eq!(qos.reliability, Reliability::Reliable);
//! assert_eq!(qos.history, History::KeepLast(10));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod compat;

pub use compat::{check_compatibility, partitions_match, QosPolicyId};

/// Special value meaning "no limit" for resource limits.
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// Default `max_blocking_time` for reliable writers.
pub const DEFAULT_MAX_BLOCKING_TIME: Duration = Duration::from_millis(100);

/// Duration used for "infinite" policies.
pub const DURATION_INFINITE: Duration = Duration::from_secs(u64::MAX / 4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reliability {
    BestEffort,
    Reliable,
}

/// Durability kinds, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Durability {
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

impl Durability {
    /// True when late joiners receive historical samples.
    #[must_use]
    pub fn replays_history(&self) -> bool {
        *self >= Durability::TransientLocal
    }

    /// True when history must survive a process restart.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        *self >= Durability::Transient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum History {
    KeepLast(u32),
    KeepAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_samples: usize,
    pub max_instances: usize,
    pub max_samples_per_instance: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

/// Maximum time between samples. Default: infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub period: Duration,
}

impl Default for Deadline {
    fn default() -> Self {
        Self {
            period: DURATION_INFINITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ownership {
    pub kind: OwnershipKind,
    pub strength: i32,
}

/// Liveliness kinds, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum LivelinessKind {
    #[default]
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: DURATION_INFINITE,
        }
    }
}

/// Partition names. An empty list is the default partition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Partition {
    pub names: Vec<String>,
}

impl Partition {
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.names.is_empty() || self.names.iter().all(|n| n.is_empty())
    }
}

/// Endpoint QoS snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QoS {
    pub reliability: Reliability,
    pub durability: Durability,
    pub history: History,
    pub resource_limits: ResourceLimits,
    pub deadline: Deadline,
    pub ownership: Ownership,
    pub liveliness: Liveliness,
    pub partition: Partition,
    /// How long a writer blocks when its history is full (zero = never block).
    pub max_blocking_time: Duration,
}

impl Default for QoS {
    fn default() -> Self {
        Self {
            reliability: Reliability::BestEffort,
            durability: Durability::Volatile,
            history: History::KeepLast(1),
            resource_limits: ResourceLimits::default(),
            deadline: Deadline::default(),
            ownership: Ownership::default(),
            liveliness: Liveliness::default(),
            partition: Partition::default(),
            max_blocking_time: DEFAULT_MAX_BLOCKING_TIME,
        }
    }
}

impl QoS {
    /// Reliable, volatile, keep-last(1).
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            reliability: Reliability::Reliable,
            ..Self::default()
        }
    }

    /// Best-effort, volatile, keep-last(1).
    #[must_use]
    pub fn best_effort() -> Self {
        Self::default()
    }

    /// QoS of the builtin discovery endpoints: only the latest record of
    /// each subject is kept.
    #[must_use]
    pub fn builtin() -> Self {
        Self::reliable().transient_local().keep_last(1)
    }

    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.durability = Durability::Volatile;
        self
    }

    #[must_use]
    pub fn transient_local(mut self) -> Self {
        self.durability = Durability::TransientLocal;
        self
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.durability = Durability::Transient;
        self
    }

    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.durability = Durability::Persistent;
        self
    }

    #[must_use]
    pub fn keep_last(mut self, depth: u32) -> Self {
        self.history = History::KeepLast(depth.max(1));
        self
    }

    #[must_use]
    pub fn keep_all(mut self) -> Self {
        self.history = History::KeepAll;
        self
    }

    #[must_use]
    pub fn max_samples(mut self, max_samples: usize) -> Self {
        self.resource_limits.max_samples = max_samples;
        self
    }

    #[must_use]
    pub fn deadline(mut self, period: Duration) -> Self {
        self.deadline = Deadline { period };
        self
    }

    #[must_use]
    pub fn exclusive_ownership(mut self, strength: i32) -> Self {
        self.ownership = Ownership {
            kind: OwnershipKind::Exclusive,
            strength,
        };
        self
    }

    #[must_use]
    pub fn liveliness(mut self, kind: LivelinessKind, lease_duration: Duration) -> Self {
        self.liveliness = Liveliness {
            kind,
            lease_duration,
        };
        self
    }

    #[must_use]
    pub fn partitions(mut self, names: &[&str]) -> Self {
        self.partition = Partition {
            names: names.iter().map(|n| (*n).to_string()).collect(),
        };
        self
    }

    #[must_use]
    pub fn max_blocking_time(mut self, timeout: Duration) -> Self {
        self.max_blocking_time = timeout;
        self
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.reliability == Reliability::Reliable
    }

    /// Effective per-instance depth of a writer history.
    #[must_use]
    pub fn history_capacity(&self) -> usize {
        match self.history {
            History::KeepLast(depth) => (depth as usize)
                .min(self.resource_limits.max_samples_per_instance)
                .min(self.resource_limits.max_samples),
            History::KeepAll => self
                .resource_limits
                .max_samples_per_instance
                .min(self.resource_limits.max_samples),
        }
    }
}
