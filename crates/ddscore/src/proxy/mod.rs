// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote entity proxies.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`data`] | Participant and endpoint proxy data, change detection |
//! | [`cache`] | [`ProxyCache`]: Guid-keyed lookup with delta reporting |

pub mod cache;
pub mod data;

pub use cache::{ProxyCache, UpsertResult};
pub use data::{
    BuiltinEndpoints, EndpointProxyData, ParticipantKind, ParticipantProxyData, ProxyData,
    ProxyField, ReaderProxyData, WriterProxyData,
};
