//! Channel address resolution from a PCI IDE function's BARs.

use crate::consts::{
    BUS_MASTER_CHANNEL_STRIDE, LEGACY_PRIMARY_BASE, LEGACY_PRIMARY_CONTROL, LEGACY_PRIMARY_IRQ,
    LEGACY_SECONDARY_BASE, LEGACY_SECONDARY_CONTROL, PCI_CONTROL_OFFSET,
};
use crate::error::AtaError;
use crate::hal::InterruptSource;

const IO_BAR_MASK: u32 = !0x3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciLocation {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

/// What the PCI enumerator knows about an IDE controller function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdeController {
    pub location: PciLocation,
    /// Raw I/O BAR values; BAR0-3 are the channel blocks, BAR4 the bus master block
    pub bars: [u32; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Primary,
    Secondary,
}

impl Channel {
    pub const fn index(self) -> u16 {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAddresses {
    pub base: u16,
    /// Device control / alternate status port
    pub control: u16,
    pub bus_master: u16,
    /// Base and control use the ISA-compatible ports
    pub legacy: bool,
}

const BUS_MASTER_BAR: usize = 4;

fn io_bar(pci: &PciIdeController, bar: usize) -> Result<u16, AtaError> {
    u16::try_from(pci.bars[bar] & IO_BAR_MASK)
        .map_err(|_| AtaError::InvalidIoBar { bar: bar as u8 })
}

impl ChannelAddresses {
    pub fn resolve(pci: &PciIdeController, channel: Channel) -> Result<Self, AtaError> {
        let index = channel.index() as usize;
        let base = io_bar(pci, 2 * index)?;
        let control = io_bar(pci, 2 * index + 1)?;
        let bus_master = Self::bus_master(pci, channel)?;

        match (base, control) {
            (0, 0) => {
                let (base, control) = match channel {
                    Channel::Primary => (LEGACY_PRIMARY_BASE, LEGACY_PRIMARY_CONTROL),
                    Channel::Secondary => (LEGACY_SECONDARY_BASE, LEGACY_SECONDARY_CONTROL),
                };
                Ok(Self { base, control, bus_master, legacy: true })
            }
            (0, _) | (_, 0) => {
                log::error!(
                    "ata::pci: {:?} channel has base {:#x} and control {:#x}",
                    channel,
                    base,
                    control
                );
                Err(AtaError::MixedIoAddressing)
            }
            (base, control) => Ok(Self {
                base,
                // Masked BARs end at 0xFFFC, so this cannot overflow.
                control: control + PCI_CONTROL_OFFSET,
                bus_master,
                legacy: false,
            }),
        }
    }

    /// Without a bus master block there is nowhere to run DMA from.
    fn bus_master(pci: &PciIdeController, channel: Channel) -> Result<u16, AtaError> {
        let invalid = AtaError::InvalidIoBar { bar: BUS_MASTER_BAR as u8 };
        let block = io_bar(pci, BUS_MASTER_BAR)?;
        if block == 0 {
            log::error!("ata::pci: controller at {:?} has no bus master BAR", pci.location);
            return Err(invalid);
        }
        block
            .checked_add(BUS_MASTER_CHANNEL_STRIDE * channel.index())
            .ok_or(invalid)
    }

    pub fn interrupt_source(&self, pci: &PciIdeController, channel: Channel) -> InterruptSource {
        if self.legacy {
            InterruptSource::Legacy { irq: LEGACY_PRIMARY_IRQ + channel.index() as u8 }
        } else {
            InterruptSource::Pci(pci.location)
        }
    }
}
