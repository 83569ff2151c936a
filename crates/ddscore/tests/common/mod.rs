// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared harness: participants on one `LoopbackHub`, driven by a manual
//! clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use ddscore::transport::Frame;
use ddscore::wire::{decode_record, Codec, JsonCodec};
use ddscore::{
    ChannelListener, DiscoveryEvent, DiscoveryRole, Guid, GuidPrefix, Locator, LoopbackHub,
    Participant, ParticipantConfig, RemoteServer, Submessage,
};

pub const STEP: Duration = Duration::from_millis(10);

/// Short timings so scenarios run in a few simulated seconds.
pub fn fast_config(role: DiscoveryRole) -> ParticipantConfig {
    ParticipantConfig::default()
        .with_role(role)
        .with_lease_duration(Duration::from_secs(2))
        .with_announcement_period(Duration::from_millis(500))
        .with_initial_announcements(3, Duration::from_millis(50))
        .with_heartbeat_period(Duration::from_millis(50))
        .with_nack_response_max_delay(Duration::from_millis(5))
}

pub fn simple() -> ParticipantConfig {
    fast_config(DiscoveryRole::Simple {
        initial_peers: vec![],
    })
}

pub fn prefix(n: u8) -> GuidPrefix {
    GuidPrefix::new([n; 12])
}

pub fn server_ref(n: u8) -> RemoteServer {
    RemoteServer::new(prefix(n), vec![Locator::loopback(u32::from(n))])
}

pub struct Node {
    pub id: u32,
    pub participant: Arc<Participant>,
    pub events: Receiver<DiscoveryEvent>,
}

impl Node {
    pub fn guid(&self) -> Guid {
        self.participant.guid()
    }

    /// Drain the events received so far.
    pub fn drain(&self) -> Vec<DiscoveryEvent> {
        self.events.try_iter().collect()
    }
}

/// A hub, its participants and the shared simulated time.
pub struct Net {
    pub hub: Arc<LoopbackHub>,
    pub nodes: Vec<Node>,
    pub now: Instant,
}

impl Net {
    pub fn new() -> Self {
        Self {
            hub: LoopbackHub::new(),
            nodes: Vec::new(),
            now: Instant::now(),
        }
    }

    /// Add and start a participant on port `id` with prefix `[id; 12]`.
    /// Simple participants join multicast group 0.
    pub fn add(&mut self, id: u8, config: ParticipantConfig) -> usize {
        let groups: &[u32] = if matches!(config.role, DiscoveryRole::Simple { .. }) {
            &[0]
        } else {
            &[]
        };
        let transport = self
            .hub
            .attach(u32::from(id), groups)
            .expect("attach transport");
        let (listener, events) = ChannelListener::new();
        let participant = Participant::builder(&format!("node-{}", id))
            .config(config.with_name(&format!("node-{}", id)).with_guid_prefix(prefix(id)))
            .transport(transport)
            .listener(Arc::new(listener))
            .build()
            .expect("build participant");
        participant.start(self.now).expect("start participant");
        self.nodes.push(Node {
            id: u32::from(id),
            participant,
            events,
        });
        self.nodes.len() - 1
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Advance the clock by `duration`, ticking every participant each step.
    pub fn run(&mut self, duration: Duration) {
        let end = self.now + duration;
        while self.now < end {
            self.now += STEP;
            for node in &self.nodes {
                node.participant.tick(self.now);
            }
        }
    }

    /// Advance the clock ticking only `index`, until `done` holds or
    /// `limit` elapsed. Returns whether `done` held.
    pub fn run_one_until(&mut self, index: usize, limit: Duration, done: impl Fn() -> bool) -> bool {
        let end = self.now + limit;
        while self.now < end {
            if done() {
                return true;
            }
            self.now += STEP;
            self.nodes[index].participant.tick(self.now);
        }
        done()
    }

    /// True when every node has discovered every other node.
    pub fn fully_discovered(&self) -> bool {
        self.nodes.iter().all(|a| {
            self.nodes
                .iter()
                .filter(|b| b.id != a.id)
                .all(|b| a.participant.contains_alive(&b.guid()))
        })
    }
}

/// What crossed the hub, decoded.
#[derive(Debug, Clone)]
pub struct Seen {
    pub from: Locator,
    pub to: Locator,
    pub submessage: Submessage,
}

/// Record every frame; frames for which `drop` returns true are lost.
pub fn capture(
    hub: &LoopbackHub,
    drop: impl Fn(&Seen) -> bool + Send + Sync + 'static,
) -> Arc<Mutex<Vec<Seen>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    hub.set_filter(move |frame: &Frame| {
        let Ok(envelope) = JsonCodec.decode(&frame.bytes) else {
            return true;
        };
        let mut deliver = true;
        for submessage in envelope.submessages {
            let seen = Seen {
                from: frame.source,
                to: frame.destination,
                submessage,
            };
            if drop(&seen) {
                deliver = false;
            }
            sink.lock().push(seen);
        }
        deliver
    });
    log
}

/// Subject prefix of a discovery record carried by a DATA submessage.
pub fn record_subject(submessage: &Submessage) -> Option<GuidPrefix> {
    match submessage {
        Submessage::Data(data) if data.writer.entity_id.is_builtin() => {
            decode_record(&data.payload).ok().map(|r| r.subject.prefix)
        }
        _ => None,
    }
}
