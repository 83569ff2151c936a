// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Reliable delivery
//!
//! Writer and reader state machines shared by user endpoints and the
//! builtin discovery endpoints.
//!
//! ## Protocol Flow
//!
//! ```text
//! Writer                                    Reader
//!   |                                          |
//!   |--- DATA (seq=1) ------------------------>|
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>|
//!   |                                          |
//!   |--- HEARTBEAT (first=1, last=3) --------->|
//!   |                                          | (seq=2 missing)
//!   |<-- ACKNACK (base=2, set=[2]) ------------|
//!   |                                          |
//!   |--- DATA (seq=2) [resend] --------------->|
//!   |                                          |
//!   |    (seq=2 evicted by KEEP_LAST instead)  |
//!   |--- GAP (2) ----------------------------->|
//! ```
//!
//! ## Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`ReliableWriter`] | History, sequence numbers, per-reader ack state, resends |
//! | [`ReliableReader`] | In-order delivery, ACKNACK scheduling, loss accounting |
//! | [`WriterHistory`] | Bounded sample store (KEEP_LAST eviction, KEEP_ALL blocking) |
//! | [`GapTracker`] | Received / irrelevant / missing sequence bookkeeping |
//!
//! Both state machines return [`Outgoing`](crate::wire::Outgoing) messages
//! instead of sending; the participant sends them after releasing its locks.

mod gap_tracker;
mod history;
mod messages;
mod reader;
mod writer;

pub use gap_tracker::GapTracker;
pub use history::{WriterHistory, WriterHistoryEntry};
pub use messages::{AckNackMsg, DataMsg, GapMsg, HeartbeatMsg};
pub use reader::{ReaderMatchState, ReaderProxyState, ReliableReader, Sample};
pub use writer::{AckNackOutcome, ReliableWriter, WriterMatchState, WriterProxyState};
