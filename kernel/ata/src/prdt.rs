//! Physical region descriptor tables for bus-master DMA.
//!
//! A table is a run of 8-byte descriptors, each naming a physical chunk of the
//! transfer. The controller walks it until it reaches the entry with
//! [`PrdFlags::LAST_ENTRY`]. A single descriptor must not cross a 64 KiB physical
//! boundary, so translation runs that do are split in two.

use alloc::sync::Arc;
use core::alloc::Layout;
use core::ptr::NonNull;

use bitflags::bitflags;
use x86_64::PhysAddr;

use crate::consts::{
    DMA_ALIGNMENT, DMA_BOUNDARY, DMA_MAX_PAIR_LENGTH, DMA_MAX_PHYSICAL_ADDRESS, MAX_PRD_ENTRIES,
};
use crate::error::AtaError;
use crate::hal::{DmaMemory, TranslationPair};

/// A physical address the controller's 32-bit registers can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr32(u32);

impl PhysAddr32 {
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl TryFrom<u64> for PhysAddr32 {
    type Error = AtaError;

    fn try_from(address: u64) -> Result<Self, Self::Error> {
        u32::try_from(address)
            .map(Self)
            .map_err(|_| AtaError::PhysicalAddressTooHigh)
    }
}

impl TryFrom<PhysAddr> for PhysAddr32 {
    type Error = AtaError;

    fn try_from(address: PhysAddr) -> Result<Self, Self::Error> {
        Self::try_from(address.as_u64())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrdFlags: u16 {
        const LAST_ENTRY = 1 << 15;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PrdEntry {
    address: u32,
    /// 0 means 64 KiB
    byte_count: u16,
    flags: u16,
}

impl PrdEntry {
    fn new(address: PhysAddr32, length: u32) -> Self {
        debug_assert!(length > 0 && length <= DMA_MAX_PAIR_LENGTH);
        Self {
            address: address.as_u32(),
            byte_count: length as u16,
            flags: 0,
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn length(&self) -> u32 {
        match self.byte_count {
            0 => DMA_MAX_PAIR_LENGTH,
            count => u32::from(count),
        }
    }

    pub fn flags(&self) -> PrdFlags {
        PrdFlags::from_bits_retain(self.flags)
    }

    pub fn is_last(&self) -> bool {
        self.flags().contains(PrdFlags::LAST_ENTRY)
    }
}

/// Rejects runs the controller cannot address.
pub fn validate_pair(pair: &TranslationPair) -> Result<(), AtaError> {
    let address = pair.address.as_u64();
    if address > DMA_MAX_PHYSICAL_ADDRESS {
        return Err(AtaError::PhysicalAddressTooHigh);
    }
    if address % DMA_ALIGNMENT != 0 {
        return Err(AtaError::AlignmentError);
    }
    if pair.length > DMA_MAX_PAIR_LENGTH {
        return Err(AtaError::SpanTooLarge);
    }
    if u64::from(pair.length) % DMA_ALIGNMENT != 0 {
        return Err(AtaError::AlignmentError);
    }
    Ok(())
}

/// Contiguous DMA memory returned to its allocator on drop.
struct DmaAllocation<M: DmaMemory> {
    dma: Arc<M>,
    ptr: NonNull<u8>,
    layout: Layout,
}

impl<M: DmaMemory> DmaAllocation<M> {
    fn new(dma: &Arc<M>, layout: Layout) -> Option<Self> {
        let ptr = dma.allocate_contiguous(layout)?;
        Some(Self {
            dma: Arc::clone(dma),
            ptr,
            layout,
        })
    }
}

impl<M: DmaMemory> Drop for DmaAllocation<M> {
    fn drop(&mut self) {
        unsafe { self.dma.free_contiguous(self.ptr, self.layout) }
    }
}

pub struct PrdTable<M: DmaMemory> {
    memory: DmaAllocation<M>,
    len: usize,
    physical: PhysAddr32,
}

// Safety: the table memory is owned exclusively by this value.
unsafe impl<M: DmaMemory> Send for PrdTable<M> {}
unsafe impl<M: DmaMemory> Sync for PrdTable<M> {}

impl<M: DmaMemory> PrdTable<M> {
    /// Builds a table describing exactly `total_bytes` of `pairs`.
    ///
    /// Runs past `total_bytes` are clipped. Nothing is leaked on failure.
    pub fn build(
        dma: &Arc<M>,
        pairs: &[TranslationPair],
        total_bytes: u32,
    ) -> Result<Self, AtaError> {
        if pairs.is_empty() {
            return Err(AtaError::TranslationMismatch { remaining: total_bytes });
        }
        if pairs.len() > MAX_PRD_ENTRIES {
            return Err(AtaError::DescriptorTableTooLarge);
        }
        // Any pair may need splitting at a 64 KiB boundary.
        let capacity = pairs.len() * 2;
        let size = capacity * size_of::<PrdEntry>();
        let layout = Layout::from_size_align(size, size.next_power_of_two())
            .map_err(|_| AtaError::DescriptorTableTooLarge)?;
        let memory = DmaAllocation::new(dma, layout).ok_or(AtaError::OutOfMemory)?;

        let entries = memory.ptr.cast::<PrdEntry>();
        let mut len = 0;
        let mut push = |address: u64, length: u32| -> Result<(), AtaError> {
            // The controller only walks the first 64 KiB of the table.
            if len == MAX_PRD_ENTRIES {
                return Err(AtaError::DescriptorTableTooLarge);
            }
            let entry = PrdEntry::new(PhysAddr32::try_from(address)?, length);
            unsafe { entries.add(len).write(entry) };
            len += 1;
            Ok(())
        };

        let mut remaining = total_bytes;
        for pair in pairs {
            if remaining == 0 {
                break;
            }
            validate_pair(pair)?;
            let length = pair.length.min(remaining);
            if length == 0 {
                continue;
            }

            let start = pair.address.as_u64();
            let boundary = (start & !(DMA_BOUNDARY - 1)) + DMA_BOUNDARY;
            if start + u64::from(length) > boundary {
                let head = (boundary - start) as u32;
                push(start, head)?;
                push(boundary, length - head)?;
            } else {
                push(start, length)?;
            }
            remaining -= length;
        }

        if remaining != 0 || len == 0 {
            log::error!("ata::prdt: translation left {} of {} bytes", remaining, total_bytes);
            return Err(AtaError::TranslationMismatch { remaining });
        }

        let last = unsafe { &mut *entries.add(len - 1).as_ptr() };
        last.flags |= PrdFlags::LAST_ENTRY.bits();

        let physical = PhysAddr32::try_from(dma.physical_address(memory.ptr))?;

        let table = Self { memory, len, physical };
        for (index, entry) in table.entries().iter().enumerate() {
            log::trace!(
                "ata::prdt: [{}] {:#010x} +{:#x}{}",
                index,
                entry.address(),
                entry.length(),
                if entry.is_last() { " last" } else { "" }
            );
        }
        Ok(table)
    }

    pub fn entries(&self) -> &[PrdEntry] {
        let base = self.memory.ptr.cast::<PrdEntry>().as_ptr();
        unsafe { core::slice::from_raw_parts(base, self.len) }
    }

    pub fn physical_address(&self) -> PhysAddr32 {
        self.physical
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries().iter().map(|entry| u64::from(entry.length())).sum()
    }
}
