//! Host-side implementations of the collaborator services and shared driver
//! fixtures for the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, Thread, ThreadId};

use crate::device::{DeviceFlags, DeviceObject, DeviceType};
use crate::driver_object::{DriverObject, IoFunction};
use crate::manager::IoManager;
use crate::request::IoRequest;
use crate::services::{AddressSpace, IoServices, Mdl, MdlBuilder, TaskId, TaskScheduler};
use crate::status::{IoError, IoStatus, IoStatusBlock};

/// Scheduler backed by std thread park/unpark. Task ids are assigned lazily
/// per thread; `unpark` before `park` is covered by std's park token.
pub struct HostScheduler {
    next: AtomicU64,
    ids: Mutex<HashMap<ThreadId, TaskId>>,
    threads: Mutex<HashMap<TaskId, Thread>>,
}

impl HostScheduler {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            ids: Mutex::new(HashMap::new()),
            threads: Mutex::new(HashMap::new()),
        }
    }
}

impl TaskScheduler for HostScheduler {
    fn current(&self) -> TaskId {
        let tid = thread::current().id();
        let mut ids = self.ids.lock().unwrap();
        if let Some(id) = ids.get(&tid) {
            return *id;
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        ids.insert(tid, id);
        self.threads
            .lock()
            .unwrap()
            .insert(id, thread::current());
        id
    }

    fn park_current(&self) {
        thread::park();
    }

    fn unpark(&self, task: TaskId) {
        if let Some(t) = self.threads.lock().unwrap().get(&task) {
            t.unpark();
        }
    }
}

/// MDL builder that records build/release pairing.
pub struct RecordingMdlBuilder {
    pub built: AtomicUsize,
    pub released: AtomicUsize,
}

impl RecordingMdlBuilder {
    pub fn new() -> Self {
        Self {
            built: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }
}

impl MdlBuilder for RecordingMdlBuilder {
    fn build(&self, base: usize, length: usize, write: bool) -> Result<Mdl, IoError> {
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(Mdl {
            base,
            length,
            write,
        })
    }

    fn release(&self, _mdl: Mdl) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub const KERNEL_MAP_BASE: usize = 0xffff_8000_0000_0000;
pub const USER_MAP_BASE: usize = 0x4000_0000;

/// Address-space mapper returning fixed-base translations.
pub struct FixedAddressSpace {
    pub kernel_maps: AtomicUsize,
    pub user_maps: AtomicUsize,
}

impl FixedAddressSpace {
    pub fn new() -> Self {
        Self {
            kernel_maps: AtomicUsize::new(0),
            user_maps: AtomicUsize::new(0),
        }
    }
}

impl AddressSpace for FixedAddressSpace {
    fn map_kernel(&self, phys: usize, _length: usize) -> Option<usize> {
        self.kernel_maps.fetch_add(1, Ordering::SeqCst);
        Some(KERNEL_MAP_BASE + phys)
    }

    fn map_user(&self, phys: usize, _length: usize) -> Option<usize> {
        self.user_maps.fetch_add(1, Ordering::SeqCst);
        Some(USER_MAP_BASE + phys)
    }
}

/// Service bundle that keeps the concrete instances visible to assertions.
pub struct TestServices {
    pub scheduler: Arc<HostScheduler>,
    pub mdl: Arc<RecordingMdlBuilder>,
    pub address_space: Arc<FixedAddressSpace>,
}

impl TestServices {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(HostScheduler::new()),
            mdl: Arc::new(RecordingMdlBuilder::new()),
            address_space: Arc::new(FixedAddressSpace::new()),
        }
    }

    pub fn services(&self) -> IoServices {
        IoServices {
            scheduler: self.scheduler.clone(),
            mdl: self.mdl.clone(),
            address_space: self.address_space.clone(),
        }
    }
}

pub fn test_manager() -> IoManager {
    IoManager::new(TestServices::new().services())
}

/// Dispatch counters kept in a device extension by the counting driver.
#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

fn bump(device: &Arc<DeviceObject>, pick: fn(&Counters) -> &AtomicUsize) {
    if let Some(counters) = device.extension::<Counters>() {
        pick(counters).fetch_add(1, Ordering::SeqCst);
    }
}

pub fn counting_open(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    bump(device, |c| &c.opens);
    request.status = IoStatusBlock::success(0);
    request.complete();
    IoStatus::Success
}

pub fn counting_close(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    bump(device, |c| &c.closes);
    request.status = IoStatusBlock::success(0);
    request.complete();
    IoStatus::Success
}

pub fn counting_read(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    bump(device, |c| &c.reads);
    request.status = IoStatusBlock::success(0);
    request.complete();
    IoStatus::Success
}

pub fn counting_write(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    bump(device, |c| &c.writes);
    request.status = IoStatusBlock::success(0);
    request.complete();
    IoStatus::Success
}

/// Register a driver whose OPEN/CLOSE/READ/WRITE dispatches count into the
/// device extension and succeed.
pub fn install_counting_driver(manager: &IoManager, name: &str) -> Arc<DriverObject> {
    let name = name.to_string();
    manager
        .create_driver(move |drv| {
            drv.name = name;
            drv.dispatch.set(IoFunction::Open, counting_open);
            drv.dispatch.set(IoFunction::Close, counting_close);
            drv.dispatch.set(IoFunction::Read, counting_read);
            drv.dispatch.set(IoFunction::Write, counting_write);
            IoStatus::Success
        })
        .expect("driver setup cannot fail")
}

/// Create a device with fresh [`Counters`] as its extension.
pub fn counting_device(
    manager: &IoManager,
    driver: &Arc<DriverObject>,
    name: &str,
    device_type: DeviceType,
) -> Arc<DeviceObject> {
    manager
        .create_device(
            driver,
            Some(Box::new(Counters::default())),
            name,
            device_type,
            DeviceFlags::empty(),
        )
        .expect("device creation cannot fail")
}

/// Byte store used by the buffered ram-disk fixture.
pub struct RamDisk {
    pub data: spin::Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(size: usize) -> Self {
        Self {
            data: spin::Mutex::new(vec![0; size]),
        }
    }
}

pub fn ram_disk_read(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    let params = request.params.clone();
    let (length, offset) = match params {
        crate::request::RequestParams::Read { length, offset } => (length, offset as usize),
        _ => {
            request.status = IoStatusBlock::failed();
            request.complete();
            return IoStatus::Failed;
        }
    };
    let transferred = {
        let Some(disk) = device.extension::<RamDisk>() else {
            request.status = IoStatusBlock::failed();
            request.complete();
            return IoStatus::Failed;
        };
        let data = disk.data.lock();
        let n = length.min(data.len().saturating_sub(offset));
        if let Some(system) = request.system_buffer_mut() {
            let n = n.min(system.len());
            system[..n].copy_from_slice(&data[offset..offset + n]);
        }
        n
    };
    request.status = IoStatusBlock::success(transferred);
    request.complete();
    IoStatus::Success
}

pub fn ram_disk_write(device: &Arc<DeviceObject>, request: &mut IoRequest) -> IoStatus {
    let params = request.params.clone();
    let (length, offset) = match params {
        crate::request::RequestParams::Write { length, offset } => (length, offset as usize),
        _ => {
            request.status = IoStatusBlock::failed();
            request.complete();
            return IoStatus::Failed;
        }
    };
    let transferred = {
        let Some(disk) = device.extension::<RamDisk>() else {
            request.status = IoStatusBlock::failed();
            request.complete();
            return IoStatus::Failed;
        };
        let mut data = disk.data.lock();
        let n = length.min(data.len().saturating_sub(offset));
        if let Some(system) = request.system_buffer() {
            let n = n.min(system.len());
            data[offset..offset + n].copy_from_slice(&system[..n]);
        }
        n
    };
    request.status = IoStatusBlock::success(transferred);
    request.complete();
    IoStatus::Success
}

/// Register a buffered-I/O ram-disk driver and one disk device of `size`
/// bytes named `devname`.
pub fn install_ram_disk(
    manager: &IoManager,
    drvname: &str,
    devname: &str,
    size: usize,
) -> Arc<DeviceObject> {
    let name = drvname.to_string();
    let driver = manager
        .create_driver(move |drv| {
            drv.name = name;
            drv.dispatch.set(IoFunction::Read, ram_disk_read);
            drv.dispatch.set(IoFunction::Write, ram_disk_write);
            IoStatus::Success
        })
        .expect("driver setup cannot fail");
    manager
        .create_device(
            &driver,
            Some(Box::new(RamDisk::new(size))),
            devname,
            DeviceType::Disk,
            DeviceFlags::BUFFERED_IO,
        )
        .expect("device creation cannot fail")
}
