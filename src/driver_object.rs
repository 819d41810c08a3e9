//! Driver objects and their dispatch tables.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::DeviceObject;
use crate::manager::IoManager;
use crate::request::IoRequest;
use crate::status::{IoStatus, IoStatusBlock};

/// A dispatch routine for one request-packet operation. The routine must
/// complete the request exactly once before returning (see
/// [`IoRequest::complete`]).
pub type DispatchFn = fn(&Arc<DeviceObject>, &mut IoRequest) -> IoStatus;

/// A fast-path dispatch routine: no request packet, just an argument word and
/// a caller buffer. The framework handles the locking around the call.
pub type FastDispatchFn = fn(&Arc<DeviceObject>, usize, &mut [u8]) -> IoStatus;

/// Driver lifecycle hook, invoked at install (enter) and uninstall (exit).
pub type DriverHook = fn(&IoManager, &Arc<DriverObject>) -> IoStatus;

/// Request-packet operation kinds, indexing the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum IoFunction {
    Open,
    Close,
    Read,
    Write,
    DevCtl,
    Mmap,
}

impl IoFunction {
    pub const COUNT: usize = 6;
}

/// Fast-path operation kinds, indexing the fast slots of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FastFunction {
    FastIo,
    FastRead,
    FastWrite,
}

impl FastFunction {
    pub const COUNT: usize = 3;
}

/// Default routine installed in every slot: report success with no
/// information and complete the request.
fn default_dispatch(_device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    request.status = IoStatusBlock::success(0);
    request.complete();
    IoStatus::Success
}

fn default_fast_dispatch(_device: &Arc<DeviceObject>, _arg: usize, _buf: &mut [u8]) -> IoStatus {
    IoStatus::Success
}

/// Per-operation routine table of a driver. Every slot starts as a
/// no-op-success routine and is overridden during driver setup.
pub struct DispatchTable {
    ops: [DispatchFn; IoFunction::COUNT],
    fast: [FastDispatchFn; FastFunction::COUNT],
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            ops: [default_dispatch; IoFunction::COUNT],
            fast: [default_fast_dispatch; FastFunction::COUNT],
        }
    }

    pub fn set(&mut self, function: IoFunction, routine: DispatchFn) {
        self.ops[function as usize] = routine;
    }

    pub fn set_fast(&mut self, function: FastFunction, routine: FastDispatchFn) {
        self.fast[function as usize] = routine;
    }

    pub fn get(&self, function: IoFunction) -> DispatchFn {
        self.ops[function as usize]
    }

    pub fn get_fast(&self, function: FastFunction) -> FastDispatchFn {
        self.fast[function as usize]
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One loaded driver: its name, dispatch table, lifecycle hooks, and the
/// list of devices it owns. A driver object is in the registry iff it is
/// live and fully initialized; setup and the enter hook both ran before
/// registration, and the exit hook must succeed before removal.
pub struct DriverObject {
    pub name: String,
    pub dispatch: DispatchTable,
    pub driver_enter: Option<DriverHook>,
    pub driver_exit: Option<DriverHook>,
    pub(crate) devices: Mutex<Vec<Arc<DeviceObject>>>,
}

impl DriverObject {
    pub(crate) fn new() -> Self {
        Self {
            name: String::new(),
            dispatch: DispatchTable::new(),
            driver_enter: None,
            driver_exit: None,
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// Snapshot of the owned devices, for enumeration outside the device-list
    /// lock.
    pub fn devices(&self) -> Vec<Arc<DeviceObject>> {
        self.devices.lock().clone()
    }
}
