// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ddscore - DDS discovery and reliable delivery engine
//!
//! RTPS-style participant discovery (PDP), endpoint discovery and matching
//! (EDP), the discovery database behind discovery servers, and the reliable
//! writer/reader protocol that carries both user data and discovery records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Instant;
//! use ddscore::{LoopbackHub, Participant, QoS, Result};
//!
//! fn main() -> Result<()> {
//!     let hub = LoopbackHub::new();
//!     let participant = Participant::builder("my_app")
//!         .transport(hub.attach(1, &[0])?)
//!         .build()?;
//!     participant.start(Instant::now())?;
//!
//!     let writer = participant.create_writer("Square", "ShapeType", QoS::reliable())?;
//!     writer.write(b"payload")?;
//!     participant.shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                           Participant                               |
//! |   builder | timers | event loop | WriterHandle / ReaderHandle       |
//! +---------------------------------------------------------------------+
//! |                        Discovery Engine                             |
//! |   PDP (leases, announcements) | EDP (matching) | Database | Relay   |
//! +---------------------------------------------------------------------+
//! |                     Reliability + Proxy Cache                       |
//! |   ReliableWriter / ReliableReader | writer history | QoS matching   |
//! +---------------------------------------------------------------------+
//! |                   Wire codec + Transport                            |
//! |   JsonCodec | LoopbackHub (in-memory) | custom Transport impls      |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Participant`] | Owns discovery, endpoints and timers of one participant |
//! | [`WriterHandle`] | Publishes samples through a reliable writer |
//! | [`ReaderHandle`] | Takes samples delivered in order |
//! | [`QoS`] | Reliability, durability, history and matching policies |
//! | [`Listener`] | Receives discovery and match events |

/// Compile-time defaults and `ParticipantConfig`.
pub mod config;
/// Guids, locators, sequence numbers and protocol versions.
pub mod core;
/// PDP, EDP, the discovery database and server relay.
pub mod discovery;
pub mod error;
/// Discovery events, match statuses and listener dispatch.
pub mod listener;
/// Participant context object, builder, timers and handles.
pub mod participant;
pub mod payload_pool;
/// Durable storage for writer histories and reader acknowledgment state.
pub mod persistence;
/// Proxy data and the proxy cache projected from the discovery database.
pub mod proxy;
/// QoS policies and offered-vs-requested compatibility.
pub mod qos;
/// Reliable writer and reader protocol machines.
pub mod reliability;
pub mod transport;
/// Envelope, submessages and the wire codec.
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::config::{DiscoveryRole, ParticipantConfig, RemoteServer};
pub use crate::core::{
    EntityId, Guid, GuidPrefix, InstanceHandle, Locator, LocatorKind, LocatorList,
    SequenceNumber,
};
pub use crate::error::{Error, ErrorCategory, Result};
pub use crate::listener::{
    ChannelListener, DiscoveryEvent, IncompatibleQosStatus, Listener, PublicationMatchedStatus,
    RemovalReason, SampleLostStatus, SubscriptionMatchedStatus,
};
pub use crate::participant::{Participant, ParticipantBuilder, ParticipantState, ReaderHandle, WriterHandle};
pub use crate::payload_pool::{HeapPayloadPool, PayloadPool};
pub use crate::persistence::{InMemoryPersistence, JsonFilePersistence, Persistence};
pub use crate::proxy::{ParticipantKind, ParticipantProxyData, ProxyData};
pub use crate::qos::{Durability, History, QoS, Reliability};
pub use crate::reliability::Sample;
pub use crate::transport::{LoopbackHub, LoopbackTransport, ReceiveHandler, Transport};
pub use crate::wire::{Codec, Envelope, JsonCodec, Submessage};
