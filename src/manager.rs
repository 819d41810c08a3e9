//! The I/O manager: driver registry, device handle table, and the public
//! synchronous entry points built on the request-packet protocol.
//!
//! One `IoManager` is constructed at subsystem initialization and handed to
//! every caller; it owns the only process-wide mutable state of the
//! framework. The registry lock and the handle-table lock are held only for
//! the duration of a scan or link/unlink, never across a dispatch. The
//! open/close transitions additionally serialize on `open_lock` so that two
//! racing first opens of the same device cannot both dispatch OPEN.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::array;

use log::{error, info, warn};
use rand_core::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use spin::Mutex;

use crate::device::{DeviceFlags, DeviceObject, DeviceType};
use crate::driver_object::{DriverObject, FastFunction, IoFunction};
use crate::request::{
    complete_check, fast_call, io_call_driver, IoBuffer, IoRequest, MmapFlags, RequestParams,
    TransferData, MAX_TRANSFER_SIZE,
};
use crate::services::IoServices;
use crate::status::{IoError, IoStatus, IoStatusBlock};

/// Capacity of the device handle table.
pub const DEVICE_HANDLE_MAX: usize = 64;

/// Index of an open device in the handle table.
pub type Handle = usize;

pub struct IoManager {
    drivers: Mutex<Vec<Arc<DriverObject>>>,
    handles: Mutex<[Option<Arc<DeviceObject>>; DEVICE_HANDLE_MAX]>,
    open_lock: Mutex<()>,
    services: IoServices,
    id_rng: Mutex<Xoshiro256PlusPlus>,
}

impl IoManager {
    pub fn new(services: IoServices) -> Self {
        Self {
            drivers: Mutex::new(Vec::new()),
            handles: Mutex::new(array::from_fn(|_| None)),
            open_lock: Mutex::new(()),
            services,
            id_rng: Mutex::new(Xoshiro256PlusPlus::seed_from_u64(0x93c4_67e3_7db0_c7a4)),
        }
    }

    pub fn services(&self) -> &IoServices {
        &self.services
    }

    fn request_id(&self) -> u64 {
        let mut rng = self.id_rng.lock();
        loop {
            // 0 is the "no in-flight request" marker on devices.
            let id = rng.next_u64();
            if id != 0 {
                return id;
            }
        }
    }

    // ---- driver registry ---------------------------------------------------

    /// Create and register a driver object. The setup callback populates the
    /// name and dispatch table; the enter hook, if the setup installed one,
    /// runs next. Registration happens only after both succeed; on any
    /// failure nothing is registered.
    pub fn create_driver<F>(&self, setup: F) -> Result<Arc<DriverObject>, IoError>
    where
        F: FnOnce(&mut DriverObject) -> IoStatus,
    {
        let mut driver = DriverObject::new();
        if setup(&mut driver) != IoStatus::Success {
            return Err(IoError::SetupFailed);
        }
        let driver = Arc::new(driver);
        if let Some(enter) = driver.driver_enter {
            if enter(self, &driver) != IoStatus::Success {
                return Err(IoError::EnterFailed);
            }
        }
        self.drivers.lock().push(driver.clone());
        Ok(driver)
    }

    /// Unregister a driver. The exit hook must agree; if it declines the
    /// driver stays registered.
    pub fn delete_driver(&self, driver: &Arc<DriverObject>) -> Result<(), IoError> {
        if let Some(exit) = driver.driver_exit {
            if exit(self, driver) != IoStatus::Success {
                return Err(IoError::ExitFailed);
            }
        }
        let mut drivers = self.drivers.lock();
        match drivers.iter().position(|d| Arc::ptr_eq(d, driver)) {
            Some(pos) => {
                drivers.remove(pos);
                Ok(())
            }
            None => Err(IoError::NotFound),
        }
    }

    /// Look a driver up by name and delete it.
    pub fn uninstall_driver(&self, name: &str) -> Result<(), IoError> {
        let driver = self.find_driver_by_name(name).ok_or(IoError::NotFound)?;
        self.delete_driver(&driver).map_err(|e| {
            error!("uninstall_driver: delete driver {name} failed: {e}");
            e
        })
    }

    pub fn find_driver_by_name(&self, name: &str) -> Option<Arc<DriverObject>> {
        self.drivers
            .lock()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    /// Find a device by name: currently-open devices (handle table) first,
    /// then every registered driver's device list.
    pub fn find_device_by_name(&self, name: &str) -> Option<Arc<DeviceObject>> {
        if let Some(device) = self.handle_find_by_name(name) {
            return Some(device);
        }
        let drivers = self.drivers.lock();
        for driver in drivers.iter() {
            for device in driver.devices() {
                if device.name() == name {
                    return Some(device);
                }
            }
        }
        None
    }

    /// Find the next device of the given type after `cursor`, in registry
    /// order. `None` as the cursor starts from the beginning; a cursor that
    /// is no longer registered degrades to a fresh scan. Returns `None` on
    /// exhaustion; callers restart with `None` for round-robin discovery.
    pub fn find_device_by_type(
        &self,
        device_type: DeviceType,
        cursor: Option<&Arc<DeviceObject>>,
    ) -> Option<Arc<DeviceObject>> {
        let drivers = self.drivers.lock();
        let mut first_match = None;
        let mut cursor_passed = cursor.is_none();
        for driver in drivers.iter() {
            for device in driver.devices() {
                if device.device_type() != device_type {
                    continue;
                }
                if cursor_passed {
                    return Some(device);
                }
                if first_match.is_none() {
                    first_match = Some(device.clone());
                }
                if cursor.is_some_and(|c| Arc::ptr_eq(c, &device)) {
                    cursor_passed = true;
                }
            }
        }
        if !cursor_passed {
            // Stale cursor: behave as if the scan started fresh.
            return first_match;
        }
        None
    }

    /// Name-token variant of the type scan, for enumeration tooling that
    /// cannot hold object references between probes.
    pub fn scan_devices(&self, device_type: DeviceType, cursor: Option<&str>) -> Option<String> {
        let drivers = self.drivers.lock();
        let mut first_match = None;
        let mut cursor_passed = cursor.is_none();
        for driver in drivers.iter() {
            for device in driver.devices() {
                if device.device_type() != device_type {
                    continue;
                }
                if cursor_passed {
                    return Some(device.name().to_string());
                }
                if first_match.is_none() {
                    first_match = Some(device.name().to_string());
                }
                if cursor == Some(device.name()) {
                    cursor_passed = true;
                }
            }
        }
        if !cursor_passed {
            return first_match;
        }
        None
    }

    /// First registered device whose name starts with `prefix` and that has
    /// no open references.
    pub fn probe_unused_device(&self, prefix: &str) -> Option<String> {
        let drivers = self.drivers.lock();
        for driver in drivers.iter() {
            for device in driver.devices() {
                if device.name().starts_with(prefix) && device.references() == 0 {
                    return Some(device.name().to_string());
                }
            }
        }
        None
    }

    /// Log every registered driver with the devices it owns.
    pub fn dump_drivers(&self) {
        info!("io system info-> drivers");
        let drivers = self.drivers.lock();
        for driver in drivers.iter() {
            info!("driver: name={}", driver.name);
            let devices = driver.devices();
            for device in &devices {
                info!("        device: name={}", device.name());
            }
            info!("        device: count={}", devices.len());
        }
    }

    // ---- device objects ----------------------------------------------------

    /// Create a device owned by `driver` and append it to the driver's device
    /// list. The lock discipline is resolved here from the device type and
    /// fixed for the device's lifetime.
    pub fn create_device(
        &self,
        driver: &Arc<DriverObject>,
        extension: Option<Box<dyn Any + Send + Sync>>,
        name: &str,
        device_type: DeviceType,
        flags: DeviceFlags,
    ) -> Result<Arc<DeviceObject>, IoError> {
        let device = DeviceObject::new(
            name.into(),
            device_type,
            flags,
            Arc::downgrade(driver),
            extension,
            self.services.scheduler.clone(),
        );
        driver.devices.lock().push(device.clone());
        Ok(device)
    }

    /// Remove a device from its owning driver's list. A device that is still
    /// open (present in the handle table) is force-evicted first: that is a
    /// contract violation by the caller, degraded to a diagnostic rather than
    /// a dangling handle.
    pub fn delete_device(&self, device: &Arc<DeviceObject>) {
        {
            let mut handles = self.handles.lock();
            for slot in handles.iter_mut() {
                if slot.as_ref().is_some_and(|d| Arc::ptr_eq(d, device)) {
                    warn!("delete_device: device {} is in use", device.name());
                    *slot = None;
                }
            }
        }
        if let Some(driver) = device.driver() {
            let mut devices = driver.devices.lock();
            if let Some(pos) = devices.iter().position(|d| Arc::ptr_eq(d, device)) {
                devices.remove(pos);
            }
        }
    }

    // ---- request construction ----------------------------------------------

    /// Build a request for a synchronous dispatch, preparing data movement
    /// according to the device's mode: buffered devices get a system-side
    /// copy (capped at [`MAX_TRANSFER_SIZE`], oversize silently truncated),
    /// direct devices get a memory descriptor of the caller's buffer, and
    /// devices with neither flag carry the caller's buffer location as-is.
    pub fn build_sync_request(
        &self,
        function: IoFunction,
        device: &Arc<DeviceObject>,
        buffer: IoBuffer<'_>,
        length: usize,
        offset: u64,
        status: Option<IoStatusBlock>,
    ) -> Result<IoRequest, IoError> {
        let mut length = length;
        let status = status.unwrap_or_else(IoStatusBlock::failed);
        let data = match buffer.location() {
            None => TransferData::None,
            Some((addr, buf_len)) => {
                if device.flags().contains(DeviceFlags::BUFFERED_IO) {
                    if length >= MAX_TRANSFER_SIZE {
                        warn!(
                            "build_sync_request: {length} byte transfer truncated to {MAX_TRANSFER_SIZE}"
                        );
                        length = MAX_TRANSFER_SIZE;
                    }
                    let mut system = Vec::new();
                    system
                        .try_reserve_exact(length)
                        .map_err(|_| IoError::AllocFailed)?;
                    match buffer {
                        IoBuffer::Write(src) => {
                            system.extend_from_slice(&src[..length.min(src.len())]);
                        }
                        _ => system.resize(length, 0),
                    }
                    TransferData::System(system)
                } else if device.flags().contains(DeviceFlags::DIRECT_IO) {
                    let stores = function == IoFunction::Read;
                    let mdl = self.services.mdl.build(addr, buf_len, stores)?;
                    TransferData::Direct(mdl)
                } else {
                    TransferData::Raw { addr, len: buf_len }
                }
            }
        };
        let params = match function {
            IoFunction::Open => RequestParams::Open {
                name: String::new(),
                flags: 0,
            },
            IoFunction::Close => RequestParams::Close,
            IoFunction::Read => RequestParams::Read { length, offset },
            IoFunction::Write => RequestParams::Write { length, offset },
            IoFunction::DevCtl => RequestParams::DevCtl { code: 0, arg: 0 },
            IoFunction::Mmap => RequestParams::Mmap {
                flags: MmapFlags::from_bits_truncate(offset as u32),
                length,
            },
        };
        Ok(IoRequest::new(
            self.request_id(),
            device.clone(),
            function,
            params,
            data,
            status,
        ))
    }

    // ---- handle table ------------------------------------------------------

    fn handle_get(&self, handle: Handle) -> Option<Arc<DeviceObject>> {
        if handle >= DEVICE_HANDLE_MAX {
            return None;
        }
        self.handles.lock()[handle].clone()
    }

    fn handle_insert(&self, device: &Arc<DeviceObject>) -> Option<Handle> {
        let mut handles = self.handles.lock();
        for (i, slot) in handles.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(device.clone());
                return Some(i);
            }
        }
        None
    }

    fn handle_remove(&self, device: &Arc<DeviceObject>) -> bool {
        let mut handles = self.handles.lock();
        for slot in handles.iter_mut() {
            if slot.as_ref().is_some_and(|d| Arc::ptr_eq(d, device)) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Handle of a currently-open device, by object identity.
    pub fn handle_of(&self, device: &Arc<DeviceObject>) -> Option<Handle> {
        let handles = self.handles.lock();
        handles
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|d| Arc::ptr_eq(d, device)))
    }

    fn handle_find_by_name(&self, name: &str) -> Option<Arc<DeviceObject>> {
        let handles = self.handles.lock();
        handles
            .iter()
            .flatten()
            .find(|d| d.name() == name)
            .cloned()
    }

    // ---- open/close/reference protocol -------------------------------------

    /// Open a device by name. The first open of a device dispatches OPEN to
    /// its driver and inserts it into the handle table; later opens share
    /// the session and return the existing handle with no dispatch.
    ///
    /// When the table is full the driver-level open is *not* rolled back:
    /// the device stays open with its reference taken, and the caller gets
    /// [`IoError::HandleTableFull`].
    pub fn open_device(&self, name: &str, flags: u32) -> Result<Handle, IoError> {
        let _open = self.open_lock.lock();
        let Some(device) = self.find_device_by_name(name) else {
            error!("open_device: device {name} not found");
            return Err(IoError::NotFound);
        };
        device.increase_reference()?;
        if device.references() == 1 {
            let mut request = match self.build_sync_request(
                IoFunction::Open,
                &device,
                IoBuffer::None,
                0,
                0,
                None,
            ) {
                Ok(request) => request,
                Err(e) => {
                    error!("open_device: building open request for {name} failed");
                    let _ = device.decrease_reference();
                    return Err(e);
                }
            };
            request.params = RequestParams::Open {
                name: name.into(),
                flags,
            };
            let status = io_call_driver(&device, &mut request);
            if complete_check(&request, status) {
                match self.handle_insert(&device) {
                    Some(handle) => Ok(handle),
                    None => {
                        error!("open_device: handle table full opening {name}");
                        Err(IoError::HandleTableFull)
                    }
                }
            } else {
                error!("open_device: dispatch failed for {name}");
                let _ = device.decrease_reference();
                Err(IoError::DispatchFailed)
            }
        } else {
            self.handle_of(&device).ok_or(IoError::NotFound)
        }
    }

    /// Close a handle. Only the last holder's close dispatches CLOSE and
    /// vacates the handle table entry; earlier closes just drop a reference.
    pub fn close_device(&self, handle: Handle) -> Result<(), IoError> {
        let _open = self.open_lock.lock();
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        device.decrease_reference()?;
        if device.references() == 0 {
            let mut request = match self.build_sync_request(
                IoFunction::Close,
                &device,
                IoBuffer::None,
                0,
                0,
                None,
            ) {
                Ok(request) => request,
                Err(e) => {
                    error!("close_device: building close request failed");
                    let _ = device.increase_reference();
                    return Err(e);
                }
            };
            let status = io_call_driver(&device, &mut request);
            if complete_check(&request, status) {
                if !self.handle_remove(&device) {
                    error!(
                        "close_device: device {} missing from handle table",
                        device.name()
                    );
                    return Err(IoError::BadHandle);
                }
                Ok(())
            } else {
                let _ = device.increase_reference();
                Err(IoError::DispatchFailed)
            }
        } else {
            Ok(())
        }
    }

    /// Pin a device open without re-running OPEN side effects.
    pub fn incref(&self, handle: Handle) -> Result<(), IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        device.increase_reference()
    }

    pub fn decref(&self, handle: Handle) -> Result<(), IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        device.decrease_reference()
    }

    // ---- data-path entry points ---------------------------------------------

    /// Read from an open device into `buf`. Returns the transferred byte
    /// count reported by the driver.
    pub fn read(&self, handle: Handle, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        let length = buf.len();
        let mut request = self.build_sync_request(
            IoFunction::Read,
            &device,
            IoBuffer::Read(buf),
            length,
            offset,
            None,
        )?;
        let status = io_call_driver(&device, &mut request);
        if complete_check(&request, status) {
            let transferred = request.status.information;
            match request.take_data() {
                TransferData::System(system) => {
                    let len = transferred.min(system.len()).min(buf.len());
                    buf[..len].copy_from_slice(&system[..len]);
                    Ok(len)
                }
                TransferData::Direct(mdl) => {
                    self.services.mdl.release(mdl);
                    Ok(transferred)
                }
                _ => Ok(transferred),
            }
        } else {
            Err(IoError::DispatchFailed)
        }
    }

    /// Write `buf` to an open device. Returns the transferred byte count.
    pub fn write(&self, handle: Handle, buf: &[u8], offset: u64) -> Result<usize, IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        let mut request = self.build_sync_request(
            IoFunction::Write,
            &device,
            IoBuffer::Write(buf),
            buf.len(),
            offset,
            None,
        )?;
        let status = io_call_driver(&device, &mut request);
        if complete_check(&request, status) {
            if let TransferData::Direct(mdl) = request.take_data() {
                self.services.mdl.release(mdl);
            }
            Ok(request.status.information)
        } else {
            Err(IoError::DispatchFailed)
        }
    }

    /// Device control: the driver interprets `code` and `arg` and reports a
    /// result magnitude through the status block.
    pub fn devctl(&self, handle: Handle, code: u32, arg: usize) -> Result<usize, IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        let mut request =
            self.build_sync_request(IoFunction::DevCtl, &device, IoBuffer::None, 0, 0, None)?;
        request.params = RequestParams::DevCtl { code, arg };
        let status = io_call_driver(&device, &mut request);
        if complete_check(&request, status) {
            Ok(request.status.information)
        } else {
            Err(IoError::DispatchFailed)
        }
    }

    /// Map device memory. The driver reports a physical address through the
    /// status block; a non-zero address is mapped into kernel space or the
    /// caller's space per `flags`. Returns the mapped address, or 0 when the
    /// driver reported nothing mappable.
    pub fn mmap(&self, handle: Handle, length: usize, flags: MmapFlags) -> Result<usize, IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        let mut request = self.build_sync_request(
            IoFunction::Mmap,
            &device,
            IoBuffer::None,
            length,
            flags.bits() as u64,
            None,
        )?;
        let status = io_call_driver(&device, &mut request);
        if complete_check(&request, status) {
            let phys = request.status.information;
            if phys == 0 {
                return Ok(0);
            }
            let mapped = if flags.contains(MmapFlags::KERNEL) {
                self.services.address_space.map_kernel(phys, length)
            } else {
                self.services.address_space.map_user(phys, length)
            };
            Ok(mapped.unwrap_or(0))
        } else {
            Err(IoError::DispatchFailed)
        }
    }

    // ---- fast path ----------------------------------------------------------

    pub fn fastio(&self, handle: Handle, cmd: usize, arg: &mut [u8]) -> Result<(), IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        match fast_call(&device, FastFunction::FastIo, cmd, arg) {
            IoStatus::Success => Ok(()),
            IoStatus::Failed => Err(IoError::DispatchFailed),
        }
    }

    pub fn fastread(&self, handle: Handle, buf: &mut [u8]) -> Result<(), IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        match fast_call(&device, FastFunction::FastRead, buf.len(), buf) {
            IoStatus::Success => Ok(()),
            IoStatus::Failed => Err(IoError::DispatchFailed),
        }
    }

    pub fn fastwrite(&self, handle: Handle, buf: &mut [u8]) -> Result<(), IoError> {
        let device = self.handle_get(handle).ok_or(IoError::BadHandle)?;
        match fast_call(&device, FastFunction::FastWrite, buf.len(), buf) {
            IoStatus::Success => Ok(()),
            IoStatus::Failed => Err(IoError::DispatchFailed),
        }
    }
}
