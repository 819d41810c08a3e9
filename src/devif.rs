//! Device path surface for the generic file layer.
//!
//! The file-system abstraction layer reaches devices through a fixed
//! operation set registered under the name `"devif"`. Each operation is a
//! thin translation onto an [`IoManager`] entry point; seek/size/tell are
//! conventions over `devctl` using the disk-I/O control codes below.

use alloc::sync::Arc;

use crate::manager::{Handle, IoManager};
use crate::request::MmapFlags;
use crate::status::IoError;

/// Name the shim registers under in the file layer.
pub const DEVIF_NAME: &str = "devif";

/// Offset sentinel for read/write through the file interface: the device
/// tracks its own position (see [`DISKIO_SETOFF`]).
pub const DISKOFF_MAX: u64 = u64::MAX;

/// Set the device-tracked byte offset (`arg` = new offset).
pub const DISKIO_SETOFF: u32 = 0x1701;
/// Get the device-tracked byte offset (returned as `information`).
pub const DISKIO_GETOFF: u32 = 0x1702;
/// Get the device capacity in bytes (returned as `information`).
pub const DISKIO_GETSIZE: u32 = 0x1700;

/// The device file interface: every file-layer operation mapped onto the
/// framework's handle entry points.
pub struct DevIf {
    manager: Arc<IoManager>,
}

impl DevIf {
    pub fn new(manager: Arc<IoManager>) -> Self {
        Self { manager }
    }

    pub fn name(&self) -> &'static str {
        DEVIF_NAME
    }

    pub fn open(&self, path: &str, flags: u32) -> Result<Handle, IoError> {
        self.manager.open_device(path, flags)
    }

    pub fn close(&self, handle: Handle) -> Result<(), IoError> {
        self.manager.close_device(handle)
    }

    pub fn incref(&self, handle: Handle) -> Result<(), IoError> {
        self.manager.incref(handle)
    }

    pub fn decref(&self, handle: Handle) -> Result<(), IoError> {
        self.manager.decref(handle)
    }

    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<usize, IoError> {
        self.manager.read(handle, buf, DISKOFF_MAX)
    }

    pub fn write(&self, handle: Handle, buf: &[u8]) -> Result<usize, IoError> {
        self.manager.write(handle, buf, DISKOFF_MAX)
    }

    pub fn ioctl(&self, handle: Handle, cmd: u32, arg: usize) -> Result<usize, IoError> {
        self.manager.devctl(handle, cmd, arg)
    }

    pub fn lseek(&self, handle: Handle, offset: usize) -> Result<usize, IoError> {
        self.manager.devctl(handle, DISKIO_SETOFF, offset)
    }

    /// Device capacity in bytes; 0 if the device does not implement it.
    pub fn fsize(&self, handle: Handle) -> usize {
        self.manager.devctl(handle, DISKIO_GETSIZE, 0).unwrap_or(0)
    }

    /// Current device-tracked offset; 0 if the device does not implement it.
    pub fn ftell(&self, handle: Handle) -> usize {
        self.manager.devctl(handle, DISKIO_GETOFF, 0).unwrap_or(0)
    }

    pub fn mmap(&self, handle: Handle, length: usize, flags: MmapFlags) -> Result<usize, IoError> {
        self.manager.mmap(handle, length, flags)
    }

    pub fn fastio(&self, handle: Handle, cmd: usize, arg: &mut [u8]) -> Result<(), IoError> {
        self.manager.fastio(handle, cmd, arg)
    }

    pub fn fastread(&self, handle: Handle, buf: &mut [u8]) -> Result<(), IoError> {
        self.manager.fastread(handle, buf)
    }

    pub fn fastwrite(&self, handle: Handle, buf: &mut [u8]) -> Result<(), IoError> {
        self.manager.fastwrite(handle, buf)
    }
}
