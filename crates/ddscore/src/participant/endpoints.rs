// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry entries and the handles given to applications.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::{Guid, InstanceHandle, SequenceNumber};
use crate::error::{Error, Result};
use crate::listener::SampleLostStatus;
use crate::reliability::{ReliableReader, ReliableWriter, Sample};

use super::Participant;

/// A registered writer and the condition its blocked callers wait on.
#[derive(Debug)]
pub(crate) struct WriterSlot {
    pub(crate) writer: Mutex<ReliableWriter>,
    /// Signalled when history space may have been freed.
    pub(crate) space: Condvar,
    pub(crate) topic: String,
}

impl WriterSlot {
    pub(crate) fn new(writer: ReliableWriter, topic: &str) -> Self {
        Self {
            writer: Mutex::new(writer),
            space: Condvar::new(),
            topic: topic.to_string(),
        }
    }

    /// Drop acknowledged samples and wake blocked writers if any went.
    pub(crate) fn reclaim(&self, writer: &mut ReliableWriter) {
        if writer.remove_acknowledged() > 0 {
            self.space.notify_all();
        }
    }
}

#[derive(Debug)]
pub(crate) struct ReaderSlot {
    pub(crate) reader: Mutex<ReliableReader>,
    /// Signalled when samples became available.
    pub(crate) data: Condvar,
    pub(crate) topic: String,
}

impl ReaderSlot {
    pub(crate) fn new(reader: ReliableReader, topic: &str) -> Self {
        Self {
            reader: Mutex::new(reader),
            data: Condvar::new(),
            topic: topic.to_string(),
        }
    }
}

/// Application handle of a local writer.
#[derive(Clone)]
pub struct WriterHandle {
    pub(crate) participant: Arc<Participant>,
    pub(crate) guid: Guid,
    pub(crate) slot: Arc<WriterSlot>,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("guid", &self.guid)
            .field("topic", &self.slot.topic)
            .finish()
    }
}

impl WriterHandle {
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.slot.topic
    }

    /// Publish one sample.
    ///
    /// When the history is full (`KeepAll`) or the payload pool is
    /// exhausted, the call waits up to the writer's `max_blocking_time` for
    /// acknowledgments to free space and then fails with `WriteTimeout`. A
    /// zero `max_blocking_time` fails immediately with the underlying
    /// `WouldBlock` or `PoolExhausted`. Data is never dropped silently.
    pub fn write(&self, payload: &[u8]) -> Result<SequenceNumber> {
        self.participant.check_usable()?;
        let outgoing = {
            let mut writer = self.slot.writer.lock();
            let max_blocking = writer.qos().max_blocking_time;
            let deadline = Instant::now().checked_add(max_blocking);
            loop {
                match writer.write(payload, InstanceHandle::UNKEYED, None, Vec::new()) {
                    Ok((sequence, outgoing)) => break (sequence, outgoing),
                    Err(e @ (Error::WouldBlock | Error::PoolExhausted { .. })) => {
                        if writer.remove_acknowledged() > 0 {
                            continue;
                        }
                        if max_blocking == Duration::ZERO {
                            return Err(e);
                        }
                        log::trace!("[RELIABLE] Writer {} blocked: {}", self.guid, e);
                        match deadline {
                            Some(deadline) => {
                                if self.slot.space.wait_until(&mut writer, deadline).timed_out() {
                                    return Err(Error::WriteTimeout);
                                }
                            }
                            None => self.slot.space.wait(&mut writer),
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        let (sequence, outgoing) = outgoing;
        self.participant.send_all(outgoing);
        Ok(sequence)
    }

    #[must_use]
    pub fn matched_readers(&self) -> Vec<Guid> {
        self.slot.writer.lock().matched_readers()
    }

    /// True once every matched reliable reader acknowledged `sequence`.
    #[must_use]
    pub fn is_acked_by_all(&self, sequence: SequenceNumber) -> bool {
        self.slot.writer.lock().is_acked_by_all(sequence)
    }

    /// Samples currently held in the writer history.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.slot.writer.lock().history().len()
    }
}

/// Application handle of a local reader.
#[derive(Clone)]
pub struct ReaderHandle {
    pub(crate) participant: Arc<Participant>,
    pub(crate) guid: Guid,
    pub(crate) slot: Arc<ReaderSlot>,
}

impl std::fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("guid", &self.guid)
            .field("topic", &self.slot.topic)
            .finish()
    }
}

impl ReaderHandle {
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.slot.topic
    }

    /// Samples delivered in order since the previous call.
    pub fn take(&self) -> Vec<Sample> {
        self.slot.reader.lock().take()
    }

    /// Like [`ReaderHandle::take`], waiting up to `timeout` for at least one
    /// sample.
    pub fn wait_take(&self, timeout: Duration) -> Vec<Sample> {
        let deadline = Instant::now() + timeout;
        let mut reader = self.slot.reader.lock();
        while reader.available() == 0 {
            if self.slot.data.wait_until(&mut reader, deadline).timed_out() {
                break;
            }
        }
        reader.take()
    }

    #[must_use]
    pub fn matched_writers(&self) -> Vec<Guid> {
        self.slot.reader.lock().matched_writers()
    }

    #[must_use]
    pub fn sample_lost_status(&self) -> SampleLostStatus {
        self.slot.reader.lock().sample_lost_status().clone()
    }
}
