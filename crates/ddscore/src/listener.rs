// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery and matching notifications.
//!
//! Every user-visible transition of the engine is a [`DiscoveryEvent`]. The
//! participant collects events while it holds its locks and delivers them
//! afterwards, so a listener may call back into the participant.
//!
//! # Usage
//!
//! ```
//! use ddscore::listener::{ChannelListener, DiscoveryEvent};
//!
//! let (listener, events) = ChannelListener::new();
//! // participant.add_listener(std::sync::Arc::new(listener));
//! assert!(events.try_recv().is_err());
//! # drop(listener);
//! ```
//!
//! # Thread Safety
//!
//! Listeners are called from the participant event thread or from the thread
//! calling into the participant. They must be `Send + Sync` and should not block.

use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, Sender};

use crate::core::Guid;
use crate::proxy::{ParticipantProxyData, ProxyField, ReaderProxyData, WriterProxyData};
use crate::qos::QosPolicyId;

// ============================================================================
// STATUS STRUCTS
// ============================================================================

/// Status information for publication matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationMatchedStatus {
    /// Total cumulative count of matched subscriptions.
    pub total_count: u32,
    /// Change in total_count since last notification.
    pub total_count_change: i32,
    /// Current number of matched subscriptions.
    pub current_count: u32,
    /// Change in current_count since last notification.
    pub current_count_change: i32,
    /// Guid of the last matched/unmatched subscription.
    pub last_subscription_handle: Option<Guid>,
}

/// Status information for subscription matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    /// Guid of the last matched/unmatched publication.
    pub last_publication_handle: Option<Guid>,
}

/// Per-policy counter of an incompatible-QoS status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosPolicyCount {
    pub policy_id: QosPolicyId,
    pub count: u32,
}

/// Offered or requested incompatible QoS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncompatibleQosStatus {
    /// Total cumulative count of incompatible remote endpoints.
    pub total_count: u32,
    pub total_count_change: i32,
    /// Last policy found incompatible.
    pub last_policy_id: Option<QosPolicyId>,
    /// Counts per policy.
    pub policies: Vec<QosPolicyCount>,
}

impl IncompatibleQosStatus {
    /// Account one incompatible remote endpoint.
    pub fn record(&mut self, failed: &[QosPolicyId]) {
        self.total_count += 1;
        self.total_count_change = 1;
        self.last_policy_id = failed.last().copied();
        for policy in failed {
            match self.policies.iter_mut().find(|p| p.policy_id == *policy) {
                Some(entry) => entry.count += 1,
                None => self.policies.push(QosPolicyCount {
                    policy_id: *policy,
                    count: 1,
                }),
            }
        }
    }
}

/// Status information for sample lost events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    pub total_count: u32,
    pub total_count_change: i32,
}

/// Why a participant proxy disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// No announcement within the lease duration.
    LeaseExpired,
    /// The participant (or a server on its behalf) disposed it.
    Disposed,
    /// The only server it was relayed through is gone.
    RelayLost,
    /// Torn down after a protocol violation.
    Violation,
}

// ============================================================================
// EVENTS
// ============================================================================

/// One discovery or matching transition.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    ParticipantDiscovered(ParticipantProxyData),
    ParticipantUpdated {
        data: ParticipantProxyData,
        changed: Vec<ProxyField>,
    },
    ParticipantRemoved {
        guid: Guid,
        reason: RemovalReason,
    },
    WriterDiscovered(WriterProxyData),
    WriterUpdated {
        data: WriterProxyData,
        changed: Vec<ProxyField>,
    },
    WriterRemoved {
        guid: Guid,
    },
    ReaderDiscovered(ReaderProxyData),
    ReaderUpdated {
        data: ReaderProxyData,
        changed: Vec<ProxyField>,
    },
    ReaderRemoved {
        guid: Guid,
    },
    /// A local writer matched (`current_count_change > 0`) or unmatched a reader.
    PublicationMatched {
        writer: Guid,
        status: PublicationMatchedStatus,
    },
    /// A local reader matched or unmatched a writer.
    SubscriptionMatched {
        reader: Guid,
        status: SubscriptionMatchedStatus,
    },
    OfferedIncompatibleQos {
        writer: Guid,
        reader: Guid,
        status: IncompatibleQosStatus,
    },
    RequestedIncompatibleQos {
        reader: Guid,
        writer: Guid,
        status: IncompatibleQosStatus,
    },
    /// Same topic name, different type name.
    InconsistentTopic {
        local: Guid,
        remote: Guid,
        topic: String,
    },
    SampleLost {
        reader: Guid,
        writer: Guid,
        status: SampleLostStatus,
    },
}

// ============================================================================
// LISTENER TRAIT
// ============================================================================

/// Receiver of discovery events.
///
/// All methods have default no-op implementations; `on_event` dispatches to
/// the narrower callbacks, so implement either.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &DiscoveryEvent) {
        match event {
            DiscoveryEvent::ParticipantDiscovered(data) => self.on_participant_discovered(data),
            DiscoveryEvent::ParticipantRemoved { guid, reason } => {
                self.on_participant_removed(*guid, *reason);
            }
            DiscoveryEvent::PublicationMatched { writer, status } => {
                if let Some(remote) = status.last_subscription_handle {
                    if status.current_count_change > 0 {
                        self.on_endpoint_matched(*writer, remote);
                    } else {
                        self.on_endpoint_unmatched(*writer, remote);
                    }
                }
            }
            DiscoveryEvent::SubscriptionMatched { reader, status } => {
                if let Some(remote) = status.last_publication_handle {
                    if status.current_count_change > 0 {
                        self.on_endpoint_matched(*reader, remote);
                    } else {
                        self.on_endpoint_unmatched(*reader, remote);
                    }
                }
            }
            DiscoveryEvent::OfferedIncompatibleQos {
                writer,
                reader,
                status,
            } => self.on_incompatible_qos(*writer, *reader, status),
            DiscoveryEvent::RequestedIncompatibleQos {
                reader,
                writer,
                status,
            } => self.on_incompatible_qos(*reader, *writer, status),
            _ => {}
        }
    }

    fn on_participant_discovered(&self, _data: &ParticipantProxyData) {}

    fn on_participant_removed(&self, _guid: Guid, _reason: RemovalReason) {}

    fn on_endpoint_matched(&self, _local: Guid, _remote: Guid) {}

    fn on_endpoint_unmatched(&self, _local: Guid, _remote: Guid) {}

    fn on_incompatible_qos(&self, _local: Guid, _remote: Guid, _status: &IncompatibleQosStatus) {}
}

/// Listener forwarding every event into a channel.
pub struct ChannelListener {
    tx: Sender<DiscoveryEvent>,
}

impl ChannelListener {
    /// Create the listener and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, Receiver<DiscoveryEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self { tx }, rx)
    }
}

impl Listener for ChannelListener {
    fn on_event(&self, event: &DiscoveryEvent) {
        // Receiver dropped: nobody is interested anymore.
        let _ = self.tx.send(event.clone());
    }
}

/// Replaceable set of listeners, read without locking on every dispatch.
pub struct ListenerSet {
    listeners: ArcSwap<Vec<Arc<dyn Listener>>>,
}

impl ListenerSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn Listener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    pub fn clear(&self) {
        self.listeners.store(Arc::new(Vec::new()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `events` in order to every listener.
    pub fn dispatch(&self, events: &[DiscoveryEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.load();
        for event in events {
            for listener in listeners.iter() {
                listener.on_event(event);
            }
        }
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}
