//! Register access for one device on an IDE channel.
//!
//! Logical register offsets are spread over three port ranges: the command block,
//! the control block and the bus-master block. The 48-bit "high order" task file
//! registers share their port with the low-order register and are reached by
//! flipping the HOB bit in device control around the access.

use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use crate::config::WaitPolicy;
use crate::error::AtaError;
use crate::io::PortIo;
use crate::pci::ChannelAddresses;
use crate::prdt::PhysAddr32;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const ERR = 0x01;
        const DRQ = 0x08;
        const DF = 0x20;
        const DRDY = 0x40;
        const BSY = 0x80;

        const _ = !0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceControl: u8 {
        /// Mask INTRQ
        const NIEN = 0x02;
        const SRST = 0x04;
        /// Read back the previous (high order) byte of the task file FIFO
        const HOB = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceSelect: u8 {
        const DEV = 0x10;
        const LBA = 0x40;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusCommand: u8 {
        const START = 0x01;
        /// Bus master writes to memory (a device read)
        const READ = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusStatus: u8 {
        const ACTIVE = 0x01;
        /// Write 1 to clear
        const ERROR = 0x02;
        /// Write 1 to clear
        const IRQ = 0x04;
        const DRIVE0_DMA = 0x20;
        const DRIVE1_DMA = 0x40;
        const SIMPLEX = 0x80;
    }
}

/// Logical register identifier. Several names alias the same offset where the
/// hardware overlays a read register and a write register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register(u8);

impl Register {
    pub const DATA: Self = Self(0);
    pub const ERROR: Self = Self(1);
    pub const FEATURES: Self = Self(1);
    pub const SECTOR_COUNT: Self = Self(2);
    pub const LBA_LOW: Self = Self(3);
    pub const LBA_MID: Self = Self(4);
    pub const LBA_HIGH: Self = Self(5);
    pub const DEVICE: Self = Self(6);
    pub const STATUS: Self = Self(7);
    pub const COMMAND: Self = Self(7);

    pub const SECTOR_COUNT_HIGH: Self = Self(8);
    pub const LBA_LOW_HIGH: Self = Self(9);
    pub const LBA_MID_HIGH: Self = Self(10);
    pub const LBA_HIGH_HIGH: Self = Self(11);

    pub const ALTERNATE_STATUS: Self = Self(12);
    pub const DEVICE_CONTROL: Self = Self(12);
    pub const DEVICE_ADDRESS: Self = Self(13);

    pub const BUS_COMMAND: Self = Self(14);
    pub const BUS_STATUS: Self = Self(16);

    pub const fn offset(self) -> u8 {
        self.0
    }
}

// First offset of each range
const HIGH_ORDER_START: u8 = Register::SECTOR_COUNT_HIGH.0;
const CONTROL_START: u8 = Register::ALTERNATE_STATUS.0;
const BUS_MASTER_START: u8 = Register::BUS_COMMAND.0;
/// The 32-bit PRDT register; only [`DeviceRegisters::write_prdt_address`] reaches it.
const PRDT_START: u8 = 18;
const HIGH_ORDER_SHIFT: u8 = HIGH_ORDER_START - Register::SECTOR_COUNT.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivePosition {
    Master,
    Slave,
}

impl DrivePosition {
    pub fn select_bits(self) -> DeviceSelect {
        match self {
            Self::Master => DeviceSelect::LBA,
            Self::Slave => DeviceSelect::LBA | DeviceSelect::DEV,
        }
    }
}

enum Target {
    Port(u16),
    /// Needs HOB set in device control for the duration of the access
    HighOrder(u16),
}

pub struct DeviceRegisters<P> {
    io: P,
    addresses: ChannelAddresses,
    interrupts_suppressed: AtomicBool,
    wait: WaitPolicy,
}

impl<P: PortIo> DeviceRegisters<P> {
    pub fn new(io: P, addresses: ChannelAddresses, wait: WaitPolicy) -> Self {
        Self {
            io,
            addresses,
            interrupts_suppressed: AtomicBool::new(true),
            wait,
        }
    }

    pub fn addresses(&self) -> ChannelAddresses {
        self.addresses
    }

    fn locate(&self, register: Register) -> Target {
        let offset = register.0;
        let a = &self.addresses;
        match offset {
            0..HIGH_ORDER_START => Target::Port(a.base + offset as u16),
            HIGH_ORDER_START..CONTROL_START => {
                Target::HighOrder(a.base + (offset - HIGH_ORDER_SHIFT) as u16)
            }
            CONTROL_START..BUS_MASTER_START => {
                Target::Port(a.control + (offset - CONTROL_START) as u16)
            }
            BUS_MASTER_START..PRDT_START => {
                Target::Port(a.bus_master + (offset - BUS_MASTER_START) as u16)
            }
            _ => unreachable!("register offset {offset} is not byte addressable"),
        }
    }

    pub fn write(&self, register: Register, value: u8) {
        match self.locate(register) {
            Target::Port(port) => self.io.write_u8(port, value),
            Target::HighOrder(port) => {
                self.write_device_control(DeviceControl::HOB);
                self.io.write_u8(port, value);
                self.write_device_control(DeviceControl::empty());
            }
        }
    }

    pub fn read(&self, register: Register) -> u8 {
        match self.locate(register) {
            Target::Port(port) => self.io.read_u8(port),
            Target::HighOrder(port) => {
                self.write_device_control(DeviceControl::HOB);
                let value = self.io.read_u8(port);
                self.write_device_control(DeviceControl::empty());
                value
            }
        }
    }

    /// Device control always carries the current interrupt suppression setting.
    fn write_device_control(&self, extra: DeviceControl) {
        let mut bits = extra;
        if self.interrupts_suppressed() {
            bits |= DeviceControl::NIEN;
        }
        self.write(Register::DEVICE_CONTROL, bits.bits());
    }

    pub fn interrupts_suppressed(&self) -> bool {
        self.interrupts_suppressed.load(Ordering::Relaxed)
    }

    /// Records the suppression setting and programs it into device control.
    pub fn set_interrupts_suppressed(&self, suppressed: bool) {
        self.interrupts_suppressed.store(suppressed, Ordering::Relaxed);
        self.write_device_control(DeviceControl::empty());
    }

    pub fn read_data(&self) -> u16 {
        self.io.read_u16(self.addresses.base + Register::DATA.0 as u16)
    }

    pub fn write_data(&self, word: u16) {
        self.io.write_u16(self.addresses.base + Register::DATA.0 as u16, word)
    }

    pub fn write_prdt_address(&self, address: PhysAddr32) {
        let offset = (PRDT_START - BUS_MASTER_START) as u16;
        self.io.write_u32(self.addresses.bus_master + offset, address.as_u32());
    }

    pub fn status(&self) -> Status {
        Status::from_bits_retain(self.read(Register::STATUS))
    }

    /// Reads alternate status `reads` times. Does not acknowledge interrupts.
    pub fn io_delay(&self, reads: usize) {
        for _ in 0..reads {
            let _ = self.read(Register::ALTERNATE_STATUS);
        }
    }

    pub fn select_device(&self, position: DrivePosition) {
        self.write(Register::DEVICE, position.select_bits().bits());
    }

    /// Builds a [`AtaError::DeviceError`] from `status` and the error register.
    pub fn device_error(&self, status: Status) -> AtaError {
        AtaError::DeviceError {
            status: status.bits(),
            error: self.read(Register::ERROR),
        }
    }

    /// Polls status until `done` accepts it or the wait budget runs out.
    pub fn wait_for(
        &self,
        mut done: impl FnMut(Status) -> Result<bool, AtaError>,
    ) -> Result<Status, AtaError> {
        let mut spins: u32 = 0;
        loop {
            let status = self.status();
            if done(status)? {
                return Ok(status);
            }
            spins = spins.saturating_add(1);
            if self.wait.exhausted(spins) {
                log::warn!("ata: status wait timed out, last status {:#04x}", status.bits());
                return Err(AtaError::Timeout);
            }
            core::hint::spin_loop();
        }
    }

    pub fn wait_idle(&self) -> Result<Status, AtaError> {
        self.wait_for(|status| Ok(!status.contains(Status::BSY)))
    }

    pub fn wait_device_ready(&self) -> Result<Status, AtaError> {
        self.wait_for(|status| Ok(!status.contains(Status::BSY) && status.contains(Status::DRDY)))
    }

    pub fn wait_data_request(&self) -> Result<Status, AtaError> {
        self.wait_for(|status| {
            if status.contains(Status::BSY) {
                return Ok(false);
            }
            if status.intersects(Status::ERR | Status::DF) {
                return Err(self.device_error(status));
            }
            Ok(status.contains(Status::DRQ))
        })
    }

    /// Polled PIO read: one sector's worth of words per DRQ block, little endian.
    pub fn read_buffer(&self, buffer: &mut [u8]) -> Result<(), AtaError> {
        for chunk in buffer.chunks_exact_mut(2) {
            self.wait_idle()?;
            self.wait_data_request()?;
            chunk.copy_from_slice(&self.read_data().to_le_bytes());
        }
        Ok(())
    }

    pub fn write_buffer(&self, buffer: &[u8]) -> Result<(), AtaError> {
        for chunk in buffer.chunks_exact(2) {
            self.wait_idle()?;
            self.wait_data_request()?;
            self.write_data(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        Ok(())
    }
}
