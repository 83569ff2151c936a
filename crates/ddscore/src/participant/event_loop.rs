// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background event context of a participant.
//!
//! One thread per participant drains the work queue (datagrams handed over
//! by the transport, wake-ups after a timer was armed earlier) and fires due
//! timers. The thread holds only a `Weak` reference, upgraded per iteration,
//! so dropping the last user handle ends it.

use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::core::Locator;
use crate::error::{Error, Result};

use super::Participant;

/// Upper bound on one wait, so a missed wake-up costs at most this much.
const MAX_IDLE: Duration = Duration::from_millis(500);

/// Work queued for the event thread.
#[derive(Debug)]
pub(crate) enum Work {
    Inbound { bytes: Vec<u8>, source: Locator },
    /// A timer was armed earlier than the current wait.
    Wake,
    Shutdown,
}

/// Sender side plus the thread handle, owned by the participant.
#[derive(Debug)]
pub(crate) struct EventLoop {
    tx: Sender<Work>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub(crate) fn spawn(participant: Weak<Participant>, name: &str) -> Result<Self> {
        let (tx, rx) = crossbeam::channel::unbounded();
        let thread = std::thread::Builder::new()
            .name(format!("ddscore-{}", name))
            .spawn(move || run(&participant, &rx))
            .map_err(Error::Io)?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub(crate) fn submit(&self, work: Work) {
        // The thread is gone only after shutdown; late work is dropped.
        let _ = self.tx.send(work);
    }

    /// Ask the thread to stop and wait for it, unless called from it.
    pub(crate) fn stop(&mut self) {
        let _ = self.tx.send(Work::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[PARTICIPANT] Event thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(participant: &Weak<Participant>, rx: &Receiver<Work>) {
    log::debug!("[PARTICIPANT] Event thread started");
    loop {
        let deadline = match participant.upgrade() {
            Some(p) => p.next_deadline(),
            None => break,
        };
        let now = Instant::now();
        let wait = deadline.map_or(MAX_IDLE, |d| d.saturating_duration_since(now).min(MAX_IDLE));

        let work = match rx.recv_timeout(wait) {
            Ok(Work::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(work) => Some(work),
            Err(RecvTimeoutError::Timeout) => None,
        };

        let Some(p) = participant.upgrade() else {
            break;
        };
        if let Some(Work::Inbound { bytes, source }) = work {
            p.process_datagram(&bytes, source, Instant::now());
        }
        p.tick(Instant::now());
    }
    log::debug!("[PARTICIPANT] Event thread stopped");
}
