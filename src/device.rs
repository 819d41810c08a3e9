//! Device objects and the per-device lock.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::any::Any;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bitflags::bitflags;
use log::error;
use strum::Display;

use crate::driver_object::DriverObject;
use crate::services::TaskScheduler;
use crate::status::IoError;
use crate::structs::sleep_lock::SleepLock;
use crate::structs::spin_lock::RawSpinLock;

/// Device class. Selects the lock discipline of the device and routes the
/// fast-path calls (only [`View`](DeviceType::View) devices take the fast
/// path).
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    SerialPort,
    Screen,
    Keyboard,
    Mouse,
    VirtualChar,
    Beep,
    View,
    Disk,
    Network,
    PhysicalNetcard,
}

impl DeviceType {
    /// Fixed class-to-lock mapping: character-like devices dispatch in
    /// bounded time under a spin lock, block/network devices may sleep and
    /// get a blocking mutex.
    pub fn lock_strategy(self) -> LockStrategy {
        match self {
            DeviceType::SerialPort
            | DeviceType::Screen
            | DeviceType::Keyboard
            | DeviceType::Mouse
            | DeviceType::VirtualChar
            | DeviceType::Beep
            | DeviceType::View => LockStrategy::Spin,
            DeviceType::Disk | DeviceType::Network | DeviceType::PhysicalNetcard => {
                LockStrategy::Sleep
            }
        }
    }
}

/// Lock discipline of a device, resolved once at creation from its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    Spin,
    Sleep,
}

bitflags! {
    /// Device behavior flags. `BUFFERED_IO` and `DIRECT_IO` select the
    /// data-movement mode of requests targeting the device; a device with
    /// neither operates on caller memory in place.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        const BUFFERED_IO = 1 << 0;
        const DIRECT_IO = 1 << 1;
    }
}

/// The per-device dispatch lock. Both kinds are initialized; the strategy
/// chosen at creation decides which one is ever used.
pub(crate) struct DeviceLock {
    strategy: LockStrategy,
    spin: RawSpinLock,
    sleep: SleepLock,
}

impl DeviceLock {
    pub(crate) fn new(strategy: LockStrategy, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            strategy,
            spin: RawSpinLock::new(),
            sleep: SleepLock::new(scheduler),
        }
    }

    pub(crate) fn acquire(&self) {
        match self.strategy {
            LockStrategy::Spin => self.spin.acquire(),
            LockStrategy::Sleep => self.sleep.acquire(),
        }
    }

    pub(crate) fn release(&self) {
        match self.strategy {
            LockStrategy::Spin => self.spin.release(),
            LockStrategy::Sleep => self.sleep.release(),
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        match self.strategy {
            LockStrategy::Spin => self.spin.is_held(),
            LockStrategy::Sleep => self.sleep.is_held(),
        }
    }
}

/// One addressable device, owned by exactly one driver. Membership in that
/// driver's device list is the sole ownership record; the handle table and
/// requests hold non-owning extra references.
pub struct DeviceObject {
    name: String,
    device_type: DeviceType,
    flags: DeviceFlags,
    driver: Weak<DriverObject>,
    extension: Option<Box<dyn Any + Send + Sync>>,
    references: AtomicI64,
    pub(crate) lock: DeviceLock,
    current_request: AtomicU64,
}

impl DeviceObject {
    pub(crate) fn new(
        name: String,
        device_type: DeviceType,
        flags: DeviceFlags,
        driver: Weak<DriverObject>,
        extension: Option<Box<dyn Any + Send + Sync>>,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            device_type,
            flags,
            driver,
            extension,
            references: AtomicI64::new(0),
            lock: DeviceLock::new(device_type.lock_strategy(), scheduler),
            current_request: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    /// The owning driver, if it is still registered.
    pub fn driver(&self) -> Option<Arc<DriverObject>> {
        self.driver.upgrade()
    }

    /// Typed access to the device-private extension created with the device.
    /// `None` if there is no extension or the type does not match.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extension.as_deref().and_then(|e| e.downcast_ref())
    }

    pub fn references(&self) -> i64 {
        self.references.load(Ordering::Acquire)
    }

    /// Id of the request currently being dispatched, if any. Informational.
    pub fn current_request(&self) -> Option<u64> {
        match self.current_request.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_current_request(&self, id: u64) {
        self.current_request.store(id, Ordering::Release);
    }

    pub(crate) fn increase_reference(&self) -> Result<(), IoError> {
        let refs = self.references();
        if refs < 0 {
            error!("device {}: reference {} corrupt", self.name, refs);
            return Err(IoError::RefcountCorrupt);
        }
        self.references.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub(crate) fn decrease_reference(&self) -> Result<(), IoError> {
        let refs = self.references();
        if refs < 0 {
            error!("device {}: reference {} corrupt", self.name, refs);
            return Err(IoError::RefcountCorrupt);
        }
        self.references.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Log the object state, mirroring what the console diagnostics print.
    pub fn dump(&self) {
        log::debug!(
            "device object: type={} flags={:?} reference={} name={}",
            self.device_type,
            self.flags,
            self.references(),
            self.name
        );
    }
}
