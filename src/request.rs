//! I/O request packets and the dispatch/completion protocol.
//!
//! A request is built, synchronously dispatched to the owning driver's
//! routine for its operation, completed by that routine, then inspected and
//! freed by the issuing entry point. It never outlives that call path and is
//! never shared across tasks.
//!
//! The device lock is acquired in [`io_call_driver`] and released in
//! [`IoRequest::complete`], deliberately split across the two calls so the
//! routine runs with the device serialized and the current-request pointer
//! consistent. The request's state machine (`Allocated` → `Dispatched`, lock
//! held → `Completed`, lock released) makes the pairing checkable: each
//! transition happens at most once, so the lock is released exactly once no
//! matter how the dispatch went.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use log::error;

use crate::device::{DeviceObject, DeviceType};
use crate::driver_object::{FastFunction, IoFunction};
use crate::services::Mdl;
use crate::status::{IoStatus, IoStatusBlock};

/// Cap on the system-side copy buffer of buffered-mode transfers. Oversize
/// requests are truncated to this, not failed.
pub const MAX_TRANSFER_SIZE: usize = 128 * 1024;

bitflags! {
    /// Flags of an `mmap` dispatch. `KERNEL` maps the reported physical
    /// range into kernel space instead of the caller's address space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MmapFlags: u32 {
        const KERNEL = 1 << 0;
    }
}

/// Caller memory handed to a request at build time.
pub enum IoBuffer<'a> {
    /// Destination of a read: the device stores into it on completion.
    Read(&'a mut [u8]),
    /// Source of a write: captured into the system buffer in buffered mode.
    Write(&'a [u8]),
    None,
}

impl IoBuffer<'_> {
    pub(crate) fn location(&self) -> Option<(usize, usize)> {
        match self {
            IoBuffer::Read(buf) => Some((buf.as_ptr() as usize, buf.len())),
            IoBuffer::Write(buf) => Some((buf.as_ptr() as usize, buf.len())),
            IoBuffer::None => None,
        }
    }
}

/// Data carried by a request. Exactly one variant is chosen at build time
/// from the device's data-movement mode, and it is owned by the request
/// until the issuing entry point takes it back after completion.
pub enum TransferData {
    None,
    /// Buffered mode: the framework-owned intermediate copy.
    System(Vec<u8>),
    /// Direct mode: descriptor of the caller's pages, no copy.
    Direct(Mdl),
    /// Neither mode: the caller's buffer used in place.
    Raw { addr: usize, len: usize },
}

/// Operation parameters, keyed by the operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParams {
    Open { name: String, flags: u32 },
    Close,
    Read { length: usize, offset: u64 },
    Write { length: usize, offset: u64 },
    DevCtl { code: u32, arg: usize },
    Mmap { flags: MmapFlags, length: usize },
}

/// Lifecycle of a request. `Dispatched` implies the device lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Allocated,
    Dispatched,
    Completed,
}

/// One in-flight synchronous device operation.
pub struct IoRequest {
    id: u64,
    device: Arc<DeviceObject>,
    function: IoFunction,
    pub params: RequestParams,
    pub status: IoStatusBlock,
    data: TransferData,
    state: RequestState,
}

impl IoRequest {
    pub(crate) fn new(
        id: u64,
        device: Arc<DeviceObject>,
        function: IoFunction,
        params: RequestParams,
        data: TransferData,
        status: IoStatusBlock,
    ) -> Self {
        Self {
            id,
            device,
            function,
            params,
            status,
            data,
            state: RequestState::Allocated,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &Arc<DeviceObject> {
        &self.device
    }

    pub fn function(&self) -> IoFunction {
        self.function
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn completed(&self) -> bool {
        self.state == RequestState::Completed
    }

    /// The system copy buffer, when the request moves data in buffered mode.
    pub fn system_buffer(&self) -> Option<&[u8]> {
        match &self.data {
            TransferData::System(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn system_buffer_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            TransferData::System(buf) => Some(buf),
            _ => None,
        }
    }

    /// The memory descriptor, when the request moves data in direct mode.
    pub fn mdl(&self) -> Option<&Mdl> {
        match &self.data {
            TransferData::Direct(mdl) => Some(mdl),
            _ => None,
        }
    }

    /// Caller buffer location for devices with neither movement flag.
    pub fn raw_buffer(&self) -> Option<(usize, usize)> {
        match self.data {
            TransferData::Raw { addr, len } => Some((addr, len)),
            _ => None,
        }
    }

    pub(crate) fn take_data(&mut self) -> TransferData {
        core::mem::replace(&mut self.data, TransferData::None)
    }

    /// Complete the request: force the failure sentinel if the routine
    /// reported failure, mark it completed, and release the device lock
    /// taken by [`io_call_driver`].
    ///
    /// Every dispatch routine must call this exactly once before returning.
    /// A second call (or a call on a request that was never dispatched) is
    /// detected by the state machine and does not release the lock again.
    pub fn complete(&mut self) {
        if self.status.status == IoStatus::Failed {
            self.status.information = usize::MAX;
        }
        if self.state != RequestState::Dispatched {
            error!(
                "request {:#x}: completion outside dispatch (state {:?})",
                self.id, self.state
            );
            return;
        }
        self.state = RequestState::Completed;
        self.device.set_current_request(0);
        self.device.lock.release();
    }
}

/// Dispatch a request to the routine its target's driver installed for the
/// operation. Acquires the device lock (spin or sleeping, per the device
/// class) and leaves it held: releasing is the completion's job.
pub fn io_call_driver(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    if request.state != RequestState::Allocated {
        error!(
            "request {:#x}: dispatched in state {:?}",
            request.id, request.state
        );
        return IoStatus::Failed;
    }
    device.lock.acquire();
    request.state = RequestState::Dispatched;
    device.set_current_request(request.id);
    let Some(driver) = device.driver() else {
        error!("device {}: owning driver is gone", device.name());
        request.status = IoStatusBlock::failed();
        request.complete();
        return IoStatus::Failed;
    };
    let routine = driver.dispatch.get(request.function);
    routine(device, request)
}

/// A dispatch counts as successful only if the routine returned success, the
/// request's own status block says success, and the request was completed.
pub fn complete_check(request: &IoRequest, status: IoStatus) -> bool {
    status == IoStatus::Success
        && request.status.status == IoStatus::Success
        && request.completed()
}

/// Reduced dispatch path for latency-sensitive operations on view/window
/// devices: the spin lock around a direct two-argument routine, no request
/// packet. Devices of any other class are called without the lock.
pub fn fast_call(
    device: &Arc<DeviceObject>,
    function: FastFunction,
    arg: usize,
    buf: &mut [u8],
) -> IoStatus {
    let locked = device.device_type() == DeviceType::View;
    if locked {
        device.lock.acquire();
    }
    let status = match device.driver() {
        Some(driver) => driver.dispatch.get_fast(function)(device, arg, buf),
        None => {
            error!("device {}: owning driver is gone", device.name());
            IoStatus::Failed
        }
    };
    if locked {
        device.lock.release();
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFlags;
    use crate::testing::test_manager;

    fn complete_twice(_device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
        request.status = IoStatusBlock::success(5);
        request.complete();
        request.complete();
        IoStatus::Success
    }

    fn never_complete(_device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
        request.status = IoStatusBlock::success(0);
        IoStatus::Success
    }

    fn fail_dispatch(_device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
        request.status = IoStatusBlock::failed();
        request.complete();
        IoStatus::Failed
    }

    #[test]
    fn test_double_complete_releases_lock_once() {
        let manager = test_manager();
        let driver = manager
            .create_driver(|drv| {
                drv.name = "dbl".into();
                drv.dispatch.set(IoFunction::DevCtl, complete_twice);
                IoStatus::Success
            })
            .unwrap();
        let device = manager
            .create_device(
                &driver,
                None,
                "dbl0",
                DeviceType::VirtualChar,
                DeviceFlags::empty(),
            )
            .unwrap();

        let mut req = manager
            .build_sync_request(IoFunction::DevCtl, &device, IoBuffer::None, 0, 0, None)
            .unwrap();
        let status = io_call_driver(&device, &mut req);
        assert!(complete_check(&req, status));
        assert!(!device.lock.is_held());

        // A second dispatch must be able to take the lock again.
        let mut req = manager
            .build_sync_request(IoFunction::DevCtl, &device, IoBuffer::None, 0, 0, None)
            .unwrap();
        let status = io_call_driver(&device, &mut req);
        assert!(complete_check(&req, status));
        assert!(!device.lock.is_held());
    }

    #[test]
    fn test_uncompleted_dispatch_fails_check_and_holds_lock() {
        let manager = test_manager();
        let driver = manager
            .create_driver(|drv| {
                drv.name = "stuck".into();
                drv.dispatch.set(IoFunction::DevCtl, never_complete);
                IoStatus::Success
            })
            .unwrap();
        let device = manager
            .create_device(
                &driver,
                None,
                "stuck0",
                DeviceType::VirtualChar,
                DeviceFlags::empty(),
            )
            .unwrap();

        let mut req = manager
            .build_sync_request(IoFunction::DevCtl, &device, IoBuffer::None, 0, 0, None)
            .unwrap();
        let status = io_call_driver(&device, &mut req);
        assert!(!complete_check(&req, status));
        // Contract violation by the driver: the lock stays held.
        assert!(device.lock.is_held());
        device.lock.release();
    }

    #[test]
    fn test_failed_dispatch_forces_information_sentinel() {
        let manager = test_manager();
        let driver = manager
            .create_driver(|drv| {
                drv.name = "fail".into();
                drv.dispatch.set(IoFunction::DevCtl, fail_dispatch);
                IoStatus::Success
            })
            .unwrap();
        let device = manager
            .create_device(
                &driver,
                None,
                "fail0",
                DeviceType::VirtualChar,
                DeviceFlags::empty(),
            )
            .unwrap();

        let mut req = manager
            .build_sync_request(IoFunction::DevCtl, &device, IoBuffer::None, 0, 0, None)
            .unwrap();
        let status = io_call_driver(&device, &mut req);
        assert!(!complete_check(&req, status));
        assert!(req.completed());
        assert_eq!(req.status.information, usize::MAX);
        assert!(!device.lock.is_held());
    }

    #[test]
    fn test_fast_call_locks_view_devices_only() {
        fn fast_fill(_device: &Arc<DeviceObject>, arg: usize, buf: &mut [u8]) -> IoStatus {
            for b in buf.iter_mut() {
                *b = arg as u8;
            }
            IoStatus::Success
        }

        let manager = test_manager();
        let driver = manager
            .create_driver(|drv| {
                drv.name = "view".into();
                drv.dispatch.set_fast(FastFunction::FastRead, fast_fill);
                IoStatus::Success
            })
            .unwrap();
        let device = manager
            .create_device(
                &driver,
                None,
                "view0",
                DeviceType::View,
                DeviceFlags::empty(),
            )
            .unwrap();

        let mut buf = [0u8; 4];
        let status = fast_call(&device, FastFunction::FastRead, 0x5a, &mut buf);
        assert_eq!(status, IoStatus::Success);
        assert_eq!(buf, [0x5a; 4]);
        assert!(!device.lock.is_held());
    }
}
