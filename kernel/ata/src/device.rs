//! Device bring-up and the sector read/write path.

use alloc::sync::Arc;
use core::ptr::NonNull;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::AtaConfig;
use crate::consts::{IDENTIFY_SETTLE_READS, LBA48_LIMIT, SECTOR_SIZE};
use crate::error::AtaError;
use crate::hal::{CompletionEvent, DmaMemory, InterruptRegistrar};
use crate::identify::{DeviceIdentity, IdentifyData};
use crate::interrupt::AtaInterruptHandler;
use crate::io::PortIo;
use crate::pci::{Channel, ChannelAddresses, PciIdeController};
use crate::prdt::PrdTable;
use crate::registers::{BusCommand, BusStatus, DeviceRegisters, DrivePosition, Register, Status};
use crate::transfer::{CurrentTransfer, TransferState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AtaCommand {
    ReadSectorsExt = 0x24,
    ReadDmaExt = 0x25,
    WriteSectorsExt = 0x34,
    WriteDmaExt = 0x35,
    FlushCacheExt = 0xEA,
    Identify = 0xEC,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Polled PIO with device interrupts masked
    Synchronous,
    /// Bus-master DMA completed by the interrupt handler
    Asynchronous,
}

impl AtaCommand {
    pub fn for_transfer(direction: Direction, mode: TransferMode) -> Self {
        match (direction, mode) {
            (Direction::Read, TransferMode::Synchronous) => Self::ReadSectorsExt,
            (Direction::Write, TransferMode::Synchronous) => Self::WriteSectorsExt,
            (Direction::Read, TransferMode::Asynchronous) => Self::ReadDmaExt,
            (Direction::Write, TransferMode::Asynchronous) => Self::WriteDmaExt,
        }
    }
}

pub enum IoBuffer<'a> {
    /// Sectors are copied into this buffer
    Read(&'a mut [u8]),
    /// Sectors are taken from this buffer
    Write(&'a [u8]),
}

impl IoBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Read(buffer) => buffer.len(),
            Self::Write(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Read(_) => Direction::Read,
            Self::Write(_) => Direction::Write,
        }
    }

    fn as_non_null(&mut self) -> NonNull<u8> {
        match self {
            Self::Read(buffer) => NonNull::from(&mut **buffer).cast(),
            Self::Write(buffer) => NonNull::from(&**buffer).cast(),
        }
    }
}

/// The half of a device the interrupt handler may touch.
pub(crate) struct DeviceShared<P, E> {
    pub(crate) registers: DeviceRegisters<P>,
    pub(crate) transfer: CurrentTransfer<E>,
    pub(crate) position: DrivePosition,
}

impl<P: PortIo, E: CompletionEvent> DeviceShared<P, E> {
    pub(crate) fn new(
        registers: DeviceRegisters<P>,
        transfer: CurrentTransfer<E>,
        position: DrivePosition,
    ) -> Self {
        Self {
            registers,
            transfer,
            position,
        }
    }
}

pub struct AtaDevice<P: PortIo, M: DmaMemory, E: CompletionEvent> {
    shared: Arc<DeviceShared<P, E>>,
    dma: Arc<M>,
    /// Set while a DMA transfer owns the table
    descriptor_table: Option<PrdTable<M>>,
    total_sectors: u64,
    identity: DeviceIdentity,
}

impl<P, M, E> AtaDevice<P, M, E>
where
    P: PortIo + 'static,
    M: DmaMemory,
    E: CompletionEvent + 'static,
{
    /// Probes `position` on `channel`, validates it and hooks up its interrupt.
    pub fn initialize<R: InterruptRegistrar>(
        io: P,
        pci: &PciIdeController,
        channel: Channel,
        position: DrivePosition,
        dma: Arc<M>,
        interrupts: &R,
        config: &AtaConfig,
    ) -> Result<Self, AtaError> {
        let addresses = ChannelAddresses::resolve(pci, channel)?;
        log::trace!(
            "ata::init: {:?} {:?} base {:#x} control {:#x} bus master {:#x}",
            channel,
            position,
            addresses.base,
            addresses.control,
            addresses.bus_master
        );
        let registers = DeviceRegisters::new(io, addresses, config.wait);

        let identify = match identify(&registers, position) {
            Ok(identify) => identify,
            Err(AtaError::DeviceDoesNotExist) => {
                log::info!("ata::init: no drive at {:?} {:?}", channel, position);
                return Err(AtaError::DeviceDoesNotExist);
            }
            Err(AtaError::DeviceNotSupported) => {
                log::warn!(
                    "ata::init: {:?} {:?} aborted IDENTIFY (not a plain ATA drive)",
                    channel,
                    position
                );
                return Err(AtaError::DeviceNotSupported);
            }
            Err(e) => return Err(e),
        };
        if log::log_enabled!(log::Level::Trace) {
            identify.log_fields();
        }
        if !identify.supports_lba48() {
            log::warn!("ata::init: {:?} {:?} lacks 48-bit LBA", channel, position);
            return Err(AtaError::DeviceNotSupported);
        }
        let total_sectors = identify.lba48_sectors();
        let identity = identify.identity();

        let transfer = CurrentTransfer::new(E::create()?);
        let shared = Arc::new(DeviceShared::new(registers, transfer, position));

        let handler = Arc::new(AtaInterruptHandler::new(Arc::clone(&shared)));
        interrupts.register_interrupt(addresses.interrupt_source(pci, channel), handler)?;

        shared.registers.write(Register::BUS_COMMAND, BusCommand::empty().bits());

        log::info!(
            "ata::init: {:?} {:?} \"{}\", {} sectors ({} MB)",
            channel,
            position,
            identity.model,
            total_sectors,
            total_sectors * SECTOR_SIZE as u64 / (1024 * 1024)
        );

        Ok(Self {
            shared,
            dma,
            descriptor_table: None,
            total_sectors,
            identity,
        })
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn position(&self) -> DrivePosition {
        self.shared.position
    }

    pub fn transfer_state(&self) -> TransferState {
        self.shared.transfer.state()
    }

    pub fn read_sectors(
        &mut self,
        start_sector: u64,
        sector_count: u16,
        buffer: &mut [u8],
        mode: TransferMode,
    ) -> Result<u16, AtaError> {
        self.transfer_sectors(start_sector, sector_count, IoBuffer::Read(buffer), mode)
    }

    pub fn write_sectors(
        &mut self,
        start_sector: u64,
        sector_count: u16,
        buffer: &[u8],
        mode: TransferMode,
    ) -> Result<u16, AtaError> {
        self.transfer_sectors(start_sector, sector_count, IoBuffer::Write(buffer), mode)
    }

    /// Moves `sector_count` sectors starting at `start_sector`.
    ///
    /// Returns the number of sectors transferred, which is always the full request.
    pub fn transfer_sectors(
        &mut self,
        start_sector: u64,
        sector_count: u16,
        mut buffer: IoBuffer<'_>,
        mode: TransferMode,
    ) -> Result<u16, AtaError> {
        let bytes = self.check_request(start_sector, sector_count, buffer.len())?;
        let direction = buffer.direction();
        log::trace!(
            "ata: {:?} {:?} of {} sectors at {}",
            mode,
            direction,
            sector_count,
            start_sector
        );

        let regs = &self.shared.registers;
        regs.wait_idle()?;
        regs.select_device(self.shared.position);
        regs.wait_idle()?;
        regs.wait_device_ready()?;

        regs.set_interrupts_suppressed(mode == TransferMode::Synchronous);
        self.write_io_parameters(start_sector, sector_count);

        if mode == TransferMode::Asynchronous {
            let table = self.prepare_dma(&mut buffer, bytes)?;
            self.descriptor_table = Some(table);
            self.shared.transfer.begin();
        }

        self.shared
            .registers
            .write(Register::COMMAND, AtaCommand::for_transfer(direction, mode).into());

        match mode {
            TransferMode::Asynchronous => self.finish_dma(direction)?,
            TransferMode::Synchronous => self.finish_pio(buffer, bytes as usize)?,
        }
        Ok(sector_count)
    }

    pub fn flush_cache(&mut self) -> Result<(), AtaError> {
        let regs = &self.shared.registers;
        regs.wait_idle()?;
        regs.select_device(self.shared.position);
        regs.wait_device_ready()?;
        regs.set_interrupts_suppressed(true);
        regs.write(Register::COMMAND, AtaCommand::FlushCacheExt.into());
        let status = regs.wait_idle()?;
        if status.intersects(Status::ERR | Status::DF) {
            return Err(regs.device_error(status));
        }
        Ok(())
    }

    fn check_request(
        &self,
        start_sector: u64,
        sector_count: u16,
        len: usize,
    ) -> Result<u32, AtaError> {
        if sector_count == 0 {
            return Err(AtaError::InvalidSectorCount);
        }
        let required = usize::from(sector_count) * SECTOR_SIZE;
        if len < required {
            return Err(AtaError::BufferTooSmall { required, provided: len });
        }
        let end = start_sector
            .checked_add(u64::from(sector_count))
            .ok_or(AtaError::OutOfRange)?;
        if end > self.total_sectors || end > LBA48_LIMIT {
            return Err(AtaError::OutOfRange);
        }
        Ok(required as u32)
    }

    /// The high order halves go first so they end up in the "previous" FIFO slot.
    fn write_io_parameters(&self, lba: u64, sector_count: u16) {
        let regs = &self.shared.registers;
        let lba = lba.to_le_bytes();
        let [count_low, count_high] = sector_count.to_le_bytes();

        regs.write(Register::SECTOR_COUNT_HIGH, count_high);
        regs.write(Register::LBA_HIGH_HIGH, lba[5]);
        regs.write(Register::LBA_MID_HIGH, lba[4]);
        regs.write(Register::LBA_LOW_HIGH, lba[3]);

        regs.write(Register::SECTOR_COUNT, count_low);
        regs.write(Register::LBA_HIGH, lba[2]);
        regs.write(Register::LBA_MID, lba[1]);
        regs.write(Register::LBA_LOW, lba[0]);
    }

    /// Builds the descriptor table and points the controller at it.
    fn prepare_dma(
        &self,
        buffer: &mut IoBuffer<'_>,
        bytes: u32,
    ) -> Result<PrdTable<M>, AtaError> {
        let pairs = self.dma.translate(buffer.as_non_null(), bytes as usize)?;
        let table = PrdTable::build(&self.dma, &pairs, bytes)?;

        let regs = &self.shared.registers;
        let stale = BusStatus::from_bits_retain(regs.read(Register::BUS_STATUS));
        regs.write(Register::BUS_STATUS, (stale | BusStatus::IRQ | BusStatus::ERROR).bits());
        regs.write_prdt_address(table.physical_address());
        Ok(table)
    }

    fn finish_dma(&mut self, direction: Direction) -> Result<(), AtaError> {
        let mut command = BusCommand::START;
        if direction == Direction::Read {
            command |= BusCommand::READ;
        }
        self.shared.registers.write(Register::BUS_COMMAND, command.bits());

        self.shared.transfer.wait();
        match self.shared.transfer.reclaim() {
            Ok(fault) => {
                self.descriptor_table = None;
                match fault {
                    Some(fault) => {
                        log::warn!(
                            "ata: DMA {:?} failed, status {:#04x} error {:#04x}",
                            direction,
                            fault.status.bits(),
                            fault.error
                        );
                        Err(fault.into())
                    }
                    None => Ok(()),
                }
            }
            Err(e) => {
                // The controller may still own the table.
                core::mem::forget(self.descriptor_table.take());
                Err(e)
            }
        }
    }

    fn finish_pio(&self, buffer: IoBuffer<'_>, bytes: usize) -> Result<(), AtaError> {
        let regs = &self.shared.registers;
        match buffer {
            IoBuffer::Read(data) => regs.read_buffer(&mut data[..bytes]),
            IoBuffer::Write(data) => {
                regs.write_buffer(&data[..bytes])?;
                let status = regs.wait_idle()?;
                if status.intersects(Status::ERR | Status::DF) {
                    return Err(regs.device_error(status));
                }
                Ok(())
            }
        }
    }
}

/// Runs IDENTIFY with interrupts masked and reads back the response block.
fn identify<P: PortIo>(
    registers: &DeviceRegisters<P>,
    position: DrivePosition,
) -> Result<IdentifyData, AtaError> {
    registers.set_interrupts_suppressed(true);
    registers.select_device(position);
    registers.set_interrupts_suppressed(true);
    registers.io_delay(IDENTIFY_SETTLE_READS);

    registers.write(Register::COMMAND, AtaCommand::Identify.into());
    registers.io_delay(IDENTIFY_SETTLE_READS);

    if registers.status().is_empty() {
        return Err(AtaError::DeviceDoesNotExist);
    }
    registers.wait_for(|status| {
        if status.contains(Status::ERR) {
            return Err(AtaError::DeviceNotSupported);
        }
        Ok(!status.contains(Status::BSY) && status.contains(Status::DRQ))
    })?;

    registers.set_interrupts_suppressed(true);
    let mut block = [0u8; SECTOR_SIZE];
    registers.read_buffer(&mut block)?;
    Ok(IdentifyData::from_bytes(&block))
}
