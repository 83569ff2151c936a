// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant lease expiration tracking.
//!
//! Only directly connected participants hold a lease. The tracker is pure
//! bookkeeping: the participant's lease-check timer calls
//! [`LeaseTracker::expired`] once per check period and removes what it returns.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::GuidPrefix;

#[derive(Debug, Clone, Copy)]
struct Lease {
    duration: Duration,
    last_refresh: Instant,
}

impl Lease {
    /// `None` when the lease outlasts the clock: it never expires.
    fn deadline(&self) -> Option<Instant> {
        self.last_refresh.checked_add(self.duration)
    }
}

/// Lease deadlines of directly connected participants.
#[derive(Debug, Default)]
pub struct LeaseTracker {
    leases: HashMap<GuidPrefix, Lease>,
}

impl LeaseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or renew the lease of `prefix`.
    pub fn refresh(&mut self, prefix: GuidPrefix, duration: Duration, now: Instant) {
        self.leases.insert(
            prefix,
            Lease {
                duration,
                last_refresh: now,
            },
        );
    }

    /// Stop tracking `prefix`. Returns `true` if it was tracked.
    pub fn remove(&mut self, prefix: &GuidPrefix) -> bool {
        self.leases.remove(prefix).is_some()
    }

    #[must_use]
    pub fn contains(&self, prefix: &GuidPrefix) -> bool {
        self.leases.contains_key(prefix)
    }

    /// Remove and return every participant whose lease elapsed at `now`.
    pub fn expired(&mut self, now: Instant) -> Vec<GuidPrefix> {
        let mut expired: Vec<GuidPrefix> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline().is_some_and(|deadline| deadline <= now))
            .map(|(prefix, _)| *prefix)
            .collect();
        expired.sort();
        for prefix in &expired {
            self.leases.remove(prefix);
            log::info!("[LEASE] Participant {} lease expired", prefix);
        }
        expired
    }

    /// Earliest lease deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.leases.values().filter_map(Lease::deadline).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn clear(&mut self) {
        self.leases.clear();
    }
}
