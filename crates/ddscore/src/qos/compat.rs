// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS compatibility checking (RxO - Requested vs Offered).
//!
//! # Compatibility Rules
//!
//! | Policy      | Rule                                                        |
//! |-------------|-------------------------------------------------------------|
//! | Reliability | Offered >= Requested (Reliable > BestEffort)                 |
//! | Durability  | Offered >= Requested (Persistent > Transient > TransientLocal > Volatile) |
//! | Deadline    | Offered period <= Requested period                          |
//! | Ownership   | Kinds must match exactly                                    |
//! | Liveliness  | Offered kind >= Requested kind, offered lease <= requested  |
//!
//! Partition is not an RxO policy: disjoint partitions simply never match and
//! produce no incompatibility notification (see [`partitions_match`]).
//! History and resource limits are local policies and are not compared.

use serde::{Deserialize, Serialize};

use super::{Partition, QoS, Reliability};

/// Policy identifiers reported in incompatible-QoS statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QosPolicyId {
    Durability,
    Deadline,
    Ownership,
    Liveliness,
    Reliability,
}

impl QosPolicyId {
    /// Numeric policy id as assigned by the DDS standard.
    #[must_use]
    pub fn id(&self) -> u32 {
        match self {
            QosPolicyId::Durability => 2,
            QosPolicyId::Deadline => 4,
            QosPolicyId::Ownership => 6,
            QosPolicyId::Liveliness => 8,
            QosPolicyId::Reliability => 11,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            QosPolicyId::Durability => "DURABILITY",
            QosPolicyId::Deadline => "DEADLINE",
            QosPolicyId::Ownership => "OWNERSHIP",
            QosPolicyId::Liveliness => "LIVELINESS",
            QosPolicyId::Reliability => "RELIABILITY",
        }
    }
}

/// Compare a writer's offered QoS with a reader's requested QoS.
///
/// Returns every incompatible policy; an empty vector means the pair may match.
pub fn check_compatibility(offered: &QoS, requested: &QoS) -> Vec<QosPolicyId> {
    let mut failed = Vec::new();

    // 1. Reliability
    if offered.reliability == Reliability::BestEffort
        && requested.reliability == Reliability::Reliable
    {
        log::debug!(
            "[MATCH-QOS] Reliability mismatch (writer={:?}, reader={:?})",
            offered.reliability,
            requested.reliability
        );
        failed.push(QosPolicyId::Reliability);
    }

    // 2. Durability
    if offered.durability < requested.durability {
        log::debug!(
            "[MATCH-QOS] Durability mismatch (writer={:?}, reader={:?})",
            offered.durability,
            requested.durability
        );
        failed.push(QosPolicyId::Durability);
    }

    // 3. Deadline: a faster writer satisfies a slower reader
    if offered.deadline.period > requested.deadline.period {
        log::debug!(
            "[MATCH-QOS] Deadline mismatch (writer={:?}, reader={:?})",
            offered.deadline,
            requested.deadline
        );
        failed.push(QosPolicyId::Deadline);
    }

    // 4. Ownership
    if offered.ownership.kind != requested.ownership.kind {
        log::debug!(
            "[MATCH-QOS] Ownership mismatch (writer={:?}, reader={:?})",
            offered.ownership,
            requested.ownership
        );
        failed.push(QosPolicyId::Ownership);
    }

    // 5. Liveliness
    if offered.liveliness.kind < requested.liveliness.kind
        || offered.liveliness.lease_duration > requested.liveliness.lease_duration
    {
        log::debug!(
            "[MATCH-QOS] Liveliness mismatch (writer={:?}, reader={:?})",
            offered.liveliness,
            requested.liveliness
        );
        failed.push(QosPolicyId::Liveliness);
    }

    failed
}

/// Partition filter: both default, or at least one common name.
pub fn partitions_match(a: &Partition, b: &Partition) -> bool {
    match (a.is_default(), b.is_default()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => a.names.iter().any(|name| b.names.contains(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::{Durability, LivelinessKind};
    use std::time::Duration;

    #[test]
    fn test_reliability_best_effort_writer_reliable_reader_incompatible() {
        let failed = check_compatibility(&QoS::best_effort(), &QoS::reliable());
        assert_eq!(failed, vec![QosPolicyId::Reliability]);
    }

    #[test]
    fn test_reliability_reliable_writer_best_effort_reader_compatible() {
        assert!(check_compatibility(&QoS::reliable(), &QoS::best_effort()).is_empty());
    }

    #[test]
    fn test_durability_volatile_writer_transient_reader_incompatible() {
        let writer = QoS::reliable().volatile();
        let reader = QoS::reliable().transient_local();
        assert_eq!(
            check_compatibility(&writer, &reader),
            vec![QosPolicyId::Durability]
        );
        assert!(check_compatibility(&reader, &writer).is_empty());
    }

    #[test]
    fn test_deadline_rules() {
        let fast = QoS::default().deadline(Duration::from_millis(100));
        let slow = QoS::default().deadline(Duration::from_millis(200));
        assert!(check_compatibility(&fast, &slow).is_empty());
        assert_eq!(
            check_compatibility(&slow, &fast),
            vec![QosPolicyId::Deadline]
        );
    }

    #[test]
    fn test_ownership_must_match() {
        let exclusive = QoS::default().exclusive_ownership(10);
        assert_eq!(
            check_compatibility(&exclusive, &QoS::default()),
            vec![QosPolicyId::Ownership]
        );
    }

    #[test]
    fn test_liveliness_kind_and_lease() {
        let writer = QoS::default().liveliness(LivelinessKind::Automatic, Duration::from_secs(1));
        let reader =
            QoS::default().liveliness(LivelinessKind::ManualByTopic, Duration::from_secs(5));
        assert_eq!(
            check_compatibility(&writer, &reader),
            vec![QosPolicyId::Liveliness]
        );

        let writer =
            QoS::default().liveliness(LivelinessKind::ManualByTopic, Duration::from_secs(10));
        assert_eq!(
            check_compatibility(&writer, &reader),
            vec![QosPolicyId::Liveliness],
            "offered lease longer than requested"
        );
    }

    #[test]
    fn test_reports_all_failed_policies() {
        let writer = QoS::best_effort().volatile();
        let reader = QoS {
            durability: Durability::Persistent,
            ..QoS::reliable()
        };
        let failed = check_compatibility(&writer, &reader);
        assert!(failed.contains(&QosPolicyId::Reliability));
        assert!(failed.contains(&QosPolicyId::Durability));
        assert_eq!(QosPolicyId::Reliability.id(), 11);
    }

    #[test]
    fn test_partitions() {
        let default = Partition::default();
        let a = QoS::default().partitions(&["a", "b"]).partition;
        let b = QoS::default().partitions(&["b"]).partition;
        let c = QoS::default().partitions(&["c"]).partition;
        assert!(partitions_match(&default, &default));
        assert!(!partitions_match(&default, &a));
        assert!(partitions_match(&a, &b));
        assert!(!partitions_match(&a, &c));
    }
}
