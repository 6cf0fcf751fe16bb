//! # Disk Layer
//!
//! Interface to the driver that moves whole blocks between the disk and
//! memory, plus a RAM disk for hosted use.

pub mod device;

pub use device::{BlockDevice, DeviceStats, MemoryDisk};
