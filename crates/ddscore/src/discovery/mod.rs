// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Discovery
//!
//! Participant discovery (PDP), endpoint discovery (EDP) and the discovery
//! database shared by all roles.
//!
//! | Module | Role |
//! |--------|------|
//! | `record` | [`DiscoveryChangeRecord`]: one alive/dispose/unregister change |
//! | `database` | Merge rules (idempotence, tombstones, locality) and backup |
//! | `validation` | Screening of participant announcements |
//! | `pdp` | Announcement schedule, leases, announcement targets |
//! | `edp` | Local endpoint registry and QoS matching |
//! | `relay` | Server-side forwarding and expiry retractions |
//! | `engine` | [`DiscoveryEngine`]: all of the above behind one lock |
//!
//! Roles:
//!
//! - **Simple**: multicast announcements, every participant talks to every
//!   other one.
//! - **Server / Backup**: accept clients and peer servers, relay what they
//!   learn. Backup servers also persist their database.
//! - **Client / SuperClient**: talk only to their configured servers and learn
//!   everybody else through them.

pub mod backup;
pub mod database;
pub mod edp;
pub mod engine;
pub mod lease;
pub mod pdp;
pub mod record;
pub mod relay;
pub mod validation;

pub use database::{DatabaseSnapshot, DiscoveryDatabase, Locality};
pub use edp::{evaluate, Edp, MatchDecision};
pub use engine::{DiscoveryEngine, Effect, MatchInfo};
pub use lease::LeaseTracker;
pub use pdp::{Pdp, PdpState, PdpVerdict};
pub use record::{ChangeKind, DiscoveryChangeRecord, Origin};
pub use relay::{ExpiryRetractions, RelayPlan};
pub use validation::{LocalIdentity, Rejection};
