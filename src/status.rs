use strum::Display;

/// Result reported by a dispatch routine and carried in a request's status
/// block. Framework callers use [`IoError`] for the richer failure taxonomy;
/// drivers only ever report success or failure.
#[repr(i32)]
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Success = 0,
    Failed = -1,
}

/// Status block of an in-flight request: the driver-reported status plus an
/// operation-specific magnitude (bytes transferred, mapped physical address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoStatusBlock {
    pub status: IoStatus,
    pub information: usize,
}

impl IoStatusBlock {
    #[inline]
    pub const fn success(information: usize) -> Self {
        Self {
            status: IoStatus::Success,
            information,
        }
    }

    #[inline]
    pub const fn failed() -> Self {
        Self {
            status: IoStatus::Failed,
            information: 0,
        }
    }
}

/// Failure taxonomy of the framework entry points.
///
/// `QueueFull` and `QueueEmpty` are non-fatal flow-control results;
/// `RefcountCorrupt` reports a negative open-reference count, and the
/// operation that observed it is aborted.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    AllocFailed,
    NotFound,
    BadHandle,
    RefcountCorrupt,
    DispatchFailed,
    QueueFull,
    QueueEmpty,
    HandleTableFull,
    SetupFailed,
    EnterFailed,
    ExitFailed,
}
