//! Sleepable device lock that blocks tasks via the scheduler instead of
//! spinning, with explicit acquire/release. There is no guard type: the
//! acquire and the release happen in different call frames of the dispatch
//! protocol.
//!
//! The held flag is the serialization point: waiters publish themselves on
//! the wait queue while holding it, so a releaser either sees the waiter or
//! the waiter sees the lock free. The scheduler's unpark-before-park
//! guarantee covers the window between publishing and parking, and a task
//! whose park returns spuriously re-checks and cancels its stale entry.

use alloc::sync::Arc;

use spin::Mutex;

use crate::services::TaskScheduler;
use crate::structs::wait_queue::WaitQueue;

pub struct SleepLock {
    held: Mutex<bool>,
    waiters: WaitQueue,
    scheduler: Arc<dyn TaskScheduler>,
}

impl SleepLock {
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            held: Mutex::new(false),
            waiters: WaitQueue::new(),
            scheduler,
        }
    }

    /// Acquire the lock, sleeping until it is free.
    pub fn acquire(&self) {
        let me = self.scheduler.current();
        loop {
            {
                let mut held = self.held.lock();
                if !*held {
                    *held = true;
                    self.waiters.remove(me);
                    return;
                }
                self.waiters.enqueue(me);
            }
            self.scheduler.park_current();
        }
    }

    /// Release the lock and wake one waiting task.
    pub fn release(&self) {
        let next = {
            let mut held = self.held.lock();
            *held = false;
            self.waiters.dequeue_one()
        };
        if let Some(task) = next {
            self.scheduler.unpark(task);
        }
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HostScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_acquire_release() {
        let lock = SleepLock::new(Arc::new(HostScheduler::new()));
        assert!(!lock.is_held());
        lock.acquire();
        assert!(lock.is_held());
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_contended_handoff() {
        let sched = Arc::new(HostScheduler::new());
        let lock = Arc::new(SleepLock::new(sched));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = lock.clone();
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    lock.acquire();
                    let v = counter.load(Ordering::Relaxed);
                    counter.store(v + 1, Ordering::Relaxed);
                    lock.release();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 2000);
        assert!(!lock.is_held());
    }
}
