use alloc::sync::Arc;

use crate::device::DeviceShared;
use crate::hal::{CompletionEvent, InterruptContext, InterruptHandler, InterruptStatus};
use crate::io::PortIo;
use crate::registers::{BusCommand, BusStatus, Register, Status};
use crate::transfer::{DeviceFault, TransferState};

/// DMA completion handler for one device.
///
/// Only sees the registers and the transfer slot, never the allocator or the
/// descriptor table.
pub struct AtaInterruptHandler<P, E> {
    device: Arc<DeviceShared<P, E>>,
}

impl<P, E> AtaInterruptHandler<P, E> {
    pub(crate) fn new(device: Arc<DeviceShared<P, E>>) -> Self {
        Self { device }
    }
}

impl<P: PortIo, E: CompletionEvent> InterruptHandler for AtaInterruptHandler<P, E> {
    fn handle(&self, ctx: &InterruptContext) -> InterruptStatus {
        let device = &*self.device;
        let regs = &device.registers;

        regs.select_device(device.position);
        let bus_status = BusStatus::from_bits_retain(regs.read(Register::BUS_STATUS));
        if !bus_status.contains(BusStatus::IRQ) {
            return InterruptStatus::NotOurs;
        }
        // Bus master status is per channel; the other drive may own this one.
        let state = device.transfer.state();
        if state != TransferState::InProgress {
            log::debug!(
                "ata::irq: {:?} DMA IRQ with transfer {}, leaving it",
                device.position,
                state.name()
            );
            return InterruptStatus::NotOurs;
        }

        let status = regs.status();
        let fault = if status.intersects(Status::ERR | Status::DF) {
            let error = regs.read(Register::ERROR);
            log::error!(
                "ata::irq: {:?} DMA failed, status {:#04x} error {:#04x}",
                device.position,
                status.bits(),
                error
            );
            Some(DeviceFault { status, error })
        } else {
            None
        };

        regs.write(Register::BUS_COMMAND, BusCommand::empty().bits());

        match device.transfer.complete(ctx, fault) {
            Ok(()) => device.transfer.signal(),
            Err(observed) => {
                log::error!("ata::irq: completion in state {}", observed.name());
            }
        }

        regs.write(Register::BUS_STATUS, BusStatus::IRQ.bits());
        InterruptStatus::Handled
    }
}
