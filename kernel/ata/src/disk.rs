//! A device shared between threads, with requests split into command-sized pieces.

use core::cell::UnsafeCell;
use core::ops::Range;

use crate::config::AtaConfig;
use crate::consts::{MAX_SECTORS_PER_REQUEST, SECTOR_SIZE};
use crate::device::{AtaDevice, TransferMode};
use crate::error::AtaError;
use crate::hal::{CompletionEvent, DmaMemory};
use crate::io::PortIo;
use crate::lock::KernelLock;

pub struct Disk<P: PortIo, M: DmaMemory, E: CompletionEvent> {
    lock: KernelLock,
    sectors: u64,
    device: UnsafeCell<AtaDevice<P, M, E>>,
}

// Safety: `device` is only reached while `lock` is held.
unsafe impl<P: PortIo, M: DmaMemory, E: CompletionEvent> Sync for Disk<P, M, E> where
    AtaDevice<P, M, E>: Send
{
}

impl<P, M, E> Disk<P, M, E>
where
    P: PortIo + 'static,
    M: DmaMemory,
    E: CompletionEvent + 'static,
{
    pub fn new(device: AtaDevice<P, M, E>, config: &AtaConfig) -> Self {
        Self {
            lock: KernelLock::new(config.lock, config.owner_id),
            sectors: device.total_sectors(),
            device: UnsafeCell::new(device),
        }
    }

    fn with_device<R>(&self, f: impl FnOnce(&mut AtaDevice<P, M, E>) -> R) -> R {
        let _guard = self.lock.lock();
        debug_assert!(self.lock.is_owner());
        // Safety: the lock gives us exclusive access until `_guard` drops.
        f(unsafe { &mut *self.device.get() })
    }

    pub fn sector_count(&self) -> u64 {
        self.sectors
    }

    /// Fills `buffer` (a whole number of sectors) starting at `lba`.
    ///
    /// The request is checked as a whole before any command is issued.
    pub fn read(&self, lba: u64, buffer: &mut [u8], mode: TransferMode) -> Result<u64, AtaError> {
        let sectors = self.check_request(lba, buffer.len())?;
        self.with_device(|device| -> Result<u64, AtaError> {
            for (start, count, range) in split(lba, buffer.len()) {
                device.read_sectors(start, count, &mut buffer[range], mode)?;
            }
            Ok(sectors)
        })
    }

    pub fn write(&self, lba: u64, buffer: &[u8], mode: TransferMode) -> Result<u64, AtaError> {
        let sectors = self.check_request(lba, buffer.len())?;
        self.with_device(|device| -> Result<u64, AtaError> {
            for (start, count, range) in split(lba, buffer.len()) {
                device.write_sectors(start, count, &buffer[range], mode)?;
            }
            Ok(sectors)
        })
    }

    pub fn flush(&self) -> Result<(), AtaError> {
        self.with_device(|device| device.flush_cache())
    }

    fn check_request(&self, lba: u64, len: usize) -> Result<u64, AtaError> {
        if len == 0 || len % SECTOR_SIZE != 0 {
            return Err(AtaError::InvalidSectorCount);
        }
        let sectors = (len / SECTOR_SIZE) as u64;
        let end = lba.checked_add(sectors).ok_or(AtaError::OutOfRange)?;
        if end > self.sectors {
            return Err(AtaError::OutOfRange);
        }
        Ok(sectors)
    }
}

/// Start sector, sector count and byte range of each command a `len` byte request
/// at `lba` needs. `len` must be a whole number of sectors.
fn split(lba: u64, len: usize) -> impl Iterator<Item = (u64, u16, Range<usize>)> {
    let chunk = usize::from(MAX_SECTORS_PER_REQUEST) * SECTOR_SIZE;
    (0..len).step_by(chunk).map(move |offset| {
        let end = len.min(offset + chunk);
        let start = lba + (offset / SECTOR_SIZE) as u64;
        // At most MAX_SECTORS_PER_REQUEST.
        let count = ((end - offset) / SECTOR_SIZE) as u16;
        (start, count, offset..end)
    })
}
