//! PATA/IDE block driver with bus-master DMA.
//!
//! Devices are probed with [`AtaDevice::initialize`] and then move sectors either by
//! polled PIO or by DMA completed from the device's interrupt. Everything the driver
//! needs from the kernel (port I/O, DMA memory, interrupts, a wait primitive) comes
//! in through the traits in [`hal`] and [`io`].

#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod config;
pub mod consts;
pub mod device;
pub mod disk;
pub mod error;
pub mod event;
pub mod hal;
pub mod identify;
pub mod interrupt;
pub mod io;
pub mod lock;
pub mod logger;
pub mod pci;
pub mod prdt;
pub mod registers;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use config::{AtaConfig, WaitPolicy};
pub use device::{AtaDevice, Direction, IoBuffer, TransferMode};
pub use disk::Disk;
pub use error::AtaError;
pub use event::SpinEvent;
pub use pci::{Channel, PciIdeController, PciLocation};
pub use registers::DrivePosition;
