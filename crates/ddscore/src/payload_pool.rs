// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted payload buffers.
//!
//! Writer histories store [`BufferHandle`]s, never the bytes themselves, so a
//! pool backed by shared memory can hand the same buffer to several readers
//! without copying. [`HeapPayloadPool`] is the in-process implementation:
//! buffers live in a `DashMap`, published handles wait in a lock-free queue
//! until a reader picks them up with [`PayloadPool::next_unread`].
//!
//! `acquire` may fail with [`Error::PoolExhausted`]; writers treat it exactly
//! like a full history (block up to `max_blocking_time`, then give up).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// Handle to a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle {
    id: u64,
    len: usize,
}

impl BufferHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size requested at acquisition.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Buffer allocator shared by writers and readers.
pub trait PayloadPool: Send + Sync {
    /// Reserve a buffer of `size` bytes with one reference.
    fn acquire(&self, size: usize) -> Result<BufferHandle>;

    /// Fill an acquired buffer. `bytes` must not exceed the acquired size.
    fn write(&self, handle: &BufferHandle, bytes: &[u8]) -> Result<()>;

    /// Contents of a live buffer.
    fn read(&self, handle: &BufferHandle) -> Option<Arc<[u8]>>;

    /// Add a reference.
    fn retain(&self, handle: &BufferHandle) -> bool;

    /// Drop a reference; the buffer is freed with the last one.
    fn release(&self, handle: BufferHandle);

    /// Make a filled buffer visible to [`PayloadPool::next_unread`].
    fn publish(&self, handle: &BufferHandle) -> bool;

    /// Oldest published buffer not yet read. The caller owns one reference.
    fn next_unread(&self) -> Option<BufferHandle>;

    /// Bytes currently reserved.
    fn in_use(&self) -> usize;

    /// Acquire and fill in one step.
    fn store(&self, bytes: &[u8]) -> Result<BufferHandle> {
        let handle = self.acquire(bytes.len())?;
        if let Err(e) = self.write(&handle, bytes) {
            self.release(handle);
            return Err(e);
        }
        Ok(handle)
    }
}

#[derive(Debug)]
struct Slot {
    data: Arc<[u8]>,
    refs: u32,
}

/// Heap-backed pool with an optional byte budget.
#[derive(Debug)]
pub struct HeapPayloadPool {
    slots: DashMap<u64, Slot>,
    unread: SegQueue<BufferHandle>,
    next_id: AtomicU64,
    in_use: AtomicUsize,
    capacity: usize,
    exhausted_count: AtomicU64,
}

impl HeapPayloadPool {
    /// Pool without a byte budget.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Pool holding at most `capacity` bytes at once.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            unread: SegQueue::new(),
            next_id: AtomicU64::new(1),
            in_use: AtomicUsize::new(0),
            capacity,
            exhausted_count: AtomicU64::new(0),
        }
    }

    /// Number of failed acquisitions (diagnostic).
    #[must_use]
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted_count.load(Ordering::Relaxed)
    }

    /// Live buffers.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.slots.len()
    }
}

impl Default for HeapPayloadPool {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl PayloadPool for HeapPayloadPool {
    fn acquire(&self, size: usize) -> Result<BufferHandle> {
        let reserved = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.capacity)
            });
        if reserved.is_err() {
            self.exhausted_count.fetch_add(1, Ordering::Relaxed);
            log::debug!("[POOL] Exhausted: {} bytes requested", size);
            return Err(Error::PoolExhausted { requested: size });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.insert(
            id,
            Slot {
                data: Arc::from(vec![0u8; size]),
                refs: 1,
            },
        );
        Ok(BufferHandle { id, len: size })
    }

    fn write(&self, handle: &BufferHandle, bytes: &[u8]) -> Result<()> {
        if bytes.len() > handle.len {
            return Err(Error::ResourceLimitExceeded(format!(
                "{} bytes do not fit buffer of {}",
                bytes.len(),
                handle.len
            )));
        }
        let mut slot = self
            .slots
            .get_mut(&handle.id)
            .ok_or_else(|| Error::InvalidState(format!("buffer {} released", handle.id)))?;
        let mut data = vec![0u8; handle.len];
        data[..bytes.len()].copy_from_slice(bytes);
        slot.data = Arc::from(data);
        Ok(())
    }

    fn read(&self, handle: &BufferHandle) -> Option<Arc<[u8]>> {
        self.slots.get(&handle.id).map(|slot| Arc::clone(&slot.data))
    }

    fn retain(&self, handle: &BufferHandle) -> bool {
        match self.slots.get_mut(&handle.id) {
            Some(mut slot) => {
                slot.refs += 1;
                true
            }
            None => false,
        }
    }

    fn release(&self, handle: BufferHandle) {
        let freed = match self.slots.get_mut(&handle.id) {
            Some(mut slot) => {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if freed && self.slots.remove(&handle.id).is_some() {
            self.in_use.fetch_sub(handle.len, Ordering::AcqRel);
        }
    }

    fn publish(&self, handle: &BufferHandle) -> bool {
        if !self.retain(handle) {
            return false;
        }
        self.unread.push(*handle);
        true
    }

    fn next_unread(&self) -> Option<BufferHandle> {
        while let Some(handle) = self.unread.pop() {
            if self.slots.contains_key(&handle.id) {
                return Some(handle);
            }
        }
        None
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_read() {
        let pool = HeapPayloadPool::unbounded();
        let handle = pool.store(b"hello").expect("store");
        assert_eq!(handle.len(), 5);
        assert_eq!(pool.read(&handle).as_deref(), Some(&b"hello"[..]));
        pool.release(handle);
        assert!(pool.read(&handle).is_none());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let pool = HeapPayloadPool::with_capacity(8);
        let first = pool.acquire(6).expect("fits");
        assert!(matches!(
            pool.acquire(4),
            Err(Error::PoolExhausted { requested: 4 })
        ));
        assert_eq!(pool.exhausted_count(), 1);
        pool.release(first);
        assert!(pool.acquire(4).is_ok(), "space is reusable after release");
    }

    #[test]
    fn test_refcount_keeps_buffer_alive() {
        let pool = HeapPayloadPool::unbounded();
        let handle = pool.store(b"x").expect("store");
        assert!(pool.retain(&handle));
        pool.release(handle);
        assert!(pool.read(&handle).is_some(), "one reference left");
        pool.release(handle);
        assert_eq!(pool.live_buffers(), 0);
    }

    #[test]
    fn test_publish_and_next_unread() {
        let pool = HeapPayloadPool::unbounded();
        let a = pool.store(b"a").expect("store");
        let b = pool.store(b"b").expect("store");
        assert!(pool.publish(&a));
        assert!(pool.publish(&b));
        pool.release(a);
        pool.release(b);

        let first = pool.next_unread().expect("a published");
        assert_eq!(pool.read(&first).as_deref(), Some(&b"a"[..]));
        pool.release(first);
        let second = pool.next_unread().expect("b published");
        assert_eq!(second, b);
        pool.release(second);
        assert!(pool.next_unread().is_none());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_write_rejects_oversized() {
        let pool = HeapPayloadPool::unbounded();
        let handle = pool.acquire(2).expect("acquire");
        assert!(pool.write(&handle, b"abc").is_err());
    }
}
