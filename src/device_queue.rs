//! Bounded device queues: drivers stage inbound byte packets (input events,
//! network frames) for consumers that pop them FIFO, blocking when empty.
//!
//! Producers tolerate loss: an append against a full queue drops the packet
//! and reports [`IoError::QueueFull`]. Consumers either poll with
//! [`PickupFlags::NOWAIT`] or park until a producer wakes them.

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use crossbeam_queue::ArrayQueue;
use log::debug;

use crate::services::TaskScheduler;
use crate::status::IoError;
use crate::structs::wait_queue::WaitQueue;

/// Conventional queue depth for drivers with no special sizing needs.
pub const DEVICE_QUEUE_DEPTH: usize = 128;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PickupFlags: u32 {
        /// Fail with `QueueEmpty` instead of blocking.
        const NOWAIT = 1 << 0;
    }
}

pub struct DeviceQueue {
    entries: ArrayQueue<Vec<u8>>,
    waiters: WaitQueue,
    scheduler: Arc<dyn TaskScheduler>,
}

impl DeviceQueue {
    pub fn new(capacity: usize, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            entries: ArrayQueue::new(capacity),
            waiters: WaitQueue::new(),
            scheduler,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a copy of `data` at the tail and wake one waiting consumer.
    pub fn append(&self, data: &[u8]) -> Result<(), IoError> {
        if self.entries.is_full() {
            debug!("device queue full, dropping {} byte packet", data.len());
            return Err(IoError::QueueFull);
        }
        let mut entry = Vec::new();
        entry
            .try_reserve_exact(data.len())
            .map_err(|_| IoError::AllocFailed)?;
        entry.extend_from_slice(data);
        if self.entries.push(entry).is_err() {
            // Raced with another producer for the last slot.
            debug!("device queue full, dropping {} byte packet", data.len());
            return Err(IoError::QueueFull);
        }
        if let Some(task) = self.waiters.dequeue_one() {
            self.scheduler.unpark(task);
        }
        Ok(())
    }

    /// Pop the oldest entry into `buf`, returning the copied length (silently
    /// truncated to `buf.len()`). Blocks while the queue is empty unless
    /// `NOWAIT` is set, in which case it fails with `QueueEmpty`.
    pub fn pickup(&self, buf: &mut [u8], flags: PickupFlags) -> Result<usize, IoError> {
        let me = self.scheduler.current();
        loop {
            if let Some(entry) = self.entries.pop() {
                self.waiters.remove(me);
                let len = entry.len().min(buf.len());
                buf[..len].copy_from_slice(&entry[..len]);
                // A wakeup consumed by us while more data is queued belongs
                // to the next waiter.
                if !self.entries.is_empty() {
                    if let Some(task) = self.waiters.dequeue_one() {
                        self.scheduler.unpark(task);
                    }
                }
                return Ok(len);
            }
            if flags.contains(PickupFlags::NOWAIT) {
                return Err(IoError::QueueEmpty);
            }
            self.waiters.enqueue(me);
            // Recheck after publishing ourselves: a producer that appended in
            // between has either woken us (token) or will find us queued.
            if self.entries.is_empty() {
                self.scheduler.park_current();
            }
        }
    }

    /// Drop all queued entries. Used at device teardown.
    pub fn cleanup(&self) {
        while self.entries.pop().is_some() {}
    }
}
