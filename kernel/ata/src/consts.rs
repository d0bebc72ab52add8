pub const SECTOR_SIZE: usize = 512;
/// Words in one IDENTIFY block.
pub const IDENTIFY_WORDS: usize = SECTOR_SIZE / 2;

/// Largest sector count one EXT command can carry.
pub const MAX_SECTORS_PER_REQUEST: u16 = u16::MAX;
/// First sector number past the 48-bit LBA space.
pub const LBA48_LIMIT: u64 = 1 << 48;

// Legacy ISA-compatible channel resources
pub const LEGACY_PRIMARY_BASE: u16 = 0x1F0;
pub const LEGACY_PRIMARY_CONTROL: u16 = 0x3F6;
pub const LEGACY_SECONDARY_BASE: u16 = 0x170;
pub const LEGACY_SECONDARY_CONTROL: u16 = 0x376;
pub const LEGACY_PRIMARY_IRQ: u8 = 14;

/// The device control register sits 2 bytes into the PCI control block BAR.
pub const PCI_CONTROL_OFFSET: u16 = 2;
/// Size of one channel's bus-master register block.
pub const BUS_MASTER_CHANNEL_STRIDE: u16 = 8;

// Bus-master DMA constraints
pub const DMA_MAX_PHYSICAL_ADDRESS: u64 = u32::MAX as u64;
pub const DMA_ALIGNMENT: u64 = 2;
pub const DMA_MAX_PAIR_LENGTH: u32 = 0x1_0000;
/// A PRD entry must not cross this physical boundary.
pub const DMA_BOUNDARY: u64 = 0x1_0000;
/// One 64 KiB descriptor table.
pub const MAX_PRD_ENTRIES: usize = 8192;

/// Alternate status reads used to let the device settle after select and IDENTIFY.
pub const IDENTIFY_SETTLE_READS: usize = 10;
pub const DEFAULT_SPIN_BUDGET: u32 = 1_000_000;
