//! Kernel service contracts the framework is built against.
//!
//! Scheduling, page-pinning and address-space mapping are owned by other
//! subsystems; the framework consumes them through these traits so the whole
//! I/O layer can be driven without the rest of the kernel linked in.

use alloc::sync::Arc;

use crate::status::IoError;

/// Identifier of a kernel task, as assigned by the scheduler.
pub type TaskId = u64;

/// Blocking and wakeup primitives provided by the scheduler.
///
/// Contract: an `unpark` that is issued before the target task has actually
/// parked must not be lost; the next `park_current` of that task returns
/// immediately. The wait-queue and sleep-lock primitives rely on this to
/// close the window between publishing themselves as waiters and parking.
pub trait TaskScheduler: Send + Sync {
    /// Returns the id of the calling task.
    fn current(&self) -> TaskId;

    /// Blocks the calling task until it is unparked.
    fn park_current(&self);

    /// Makes the given task runnable again.
    fn unpark(&self, task: TaskId);
}

/// Memory descriptor for direct I/O: the caller's buffer described by base
/// address and length, with its pages pinned by the builder for the lifetime
/// of the descriptor. `write` is set when the device will store into the
/// described memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mdl {
    pub base: usize,
    pub length: usize,
    pub write: bool,
}

/// Builds and tears down memory descriptors for direct I/O.
pub trait MdlBuilder: Send + Sync {
    fn build(&self, base: usize, length: usize, write: bool) -> Result<Mdl, IoError>;

    /// Releases a descriptor previously returned by [`build`](Self::build),
    /// unpinning its pages.
    fn release(&self, mdl: Mdl);
}

/// Maps physical ranges reported by `mmap` dispatches into an address space.
pub trait AddressSpace: Send + Sync {
    /// Maps the range into kernel address space. `None` on exhaustion.
    fn map_kernel(&self, phys: usize, length: usize) -> Option<usize>;

    /// Maps the range into the calling task's address space as a shared,
    /// remap-capable mapping.
    fn map_user(&self, phys: usize, length: usize) -> Option<usize>;
}

/// The bundle of collaborator services handed to
/// [`IoManager::new`](crate::manager::IoManager::new).
#[derive(Clone)]
pub struct IoServices {
    pub scheduler: Arc<dyn TaskScheduler>,
    pub mdl: Arc<dyn MdlBuilder>,
    pub address_space: Arc<dyn AddressSpace>,
}
