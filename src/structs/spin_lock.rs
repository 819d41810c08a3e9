//! Raw spin lock with explicit acquire/release.
//!
//! The per-device lock is taken in `io_call_driver` and dropped in the
//! request's completion, two different call frames, so no guard type can
//! scope it. Short critical sections only; holders must not sleep.

use core::hint;
use core::sync::atomic::{AtomicBool, Ordering};

pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}
