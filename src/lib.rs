//! Driver/device I/O framework for a monolithic kernel.
//!
//! Independently-authored drivers register themselves through an
//! [`IoManager`], expose named devices, and serve synchronous I/O through a
//! request-packet dispatch protocol: a caller's operation becomes an
//! [`IoRequest`] handed to the driver's routine for that operation, which
//! fills in a status block and completes the request before returning.
//!
//! Highlights of the model:
//!
//! - per-device locking chosen by device class (character-like devices
//!   dispatch under a spin lock, block/network devices under a sleeping
//!   mutex), resolved once at device creation;
//! - buffered or direct (memory-descriptor) data movement, chosen per
//!   device;
//! - reference-counted open/close: only the 0→1 open and the 1→0 close
//!   reach the driver, everything in between shares the session and the
//!   handle;
//! - bounded device queues with blocking consumers for driver-to-consumer
//!   staging;
//! - a fast-path dispatch bypassing request construction for view devices.
//!
//! Scheduling, page pinning and address-space mapping are injected as
//! [`services`] so the framework runs anywhere those three contracts can be
//! provided.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod device;
pub mod device_queue;
pub mod devif;
pub mod driver_object;
pub mod input_event;
pub mod manager;
pub mod request;
pub mod services;
pub mod status;
pub mod structs;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{DeviceFlags, DeviceObject, DeviceType, LockStrategy};
pub use device_queue::{DeviceQueue, PickupFlags, DEVICE_QUEUE_DEPTH};
pub use devif::{DevIf, DEVIF_NAME};
pub use driver_object::{
    DispatchFn, DispatchTable, DriverHook, DriverObject, FastDispatchFn, FastFunction, IoFunction,
};
pub use input_event::{InputEvent, InputEventBuffer, EVENT_BUFFER_SIZE};
pub use manager::{Handle, IoManager, DEVICE_HANDLE_MAX};
pub use request::{
    complete_check, fast_call, io_call_driver, IoBuffer, IoRequest, MmapFlags, RequestParams,
    RequestState, TransferData, MAX_TRANSFER_SIZE,
};
pub use services::{AddressSpace, IoServices, Mdl, MdlBuilder, TaskId, TaskScheduler};
pub use status::{IoError, IoStatus, IoStatusBlock};
