use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaError {
    /// A request asked for zero sectors
    InvalidSectorCount,

    /// The caller's buffer cannot hold the requested sectors
    BufferTooSmall { required: usize, provided: usize },

    /// The request runs past the end of the device or the 48-bit LBA space
    OutOfRange,

    /// Nothing answered IDENTIFY on the selected position
    DeviceDoesNotExist,

    /// The device aborted IDENTIFY or lacks 48-bit addressing
    DeviceNotSupported,

    /// One of the command/control addresses came from PCI and the other did not
    MixedIoAddressing,

    /// A BAR the channel needs is missing or outside the 16-bit port space
    InvalidIoBar { bar: u8 },

    /// A physical address does not fit in the controller's 32-bit fields
    PhysicalAddressTooHigh,

    /// A DMA region address or length is not word aligned
    AlignmentError,

    /// One translation run is longer than a single region may describe
    SpanTooLarge,

    /// The buffer needs more descriptors than one table can hold
    DescriptorTableTooLarge,

    OutOfMemory,

    /// The translation list did not cover the requested length
    TranslationMismatch { remaining: u32 },

    /// The memory collaborator could not translate the buffer
    TranslationFailed,

    /// The device reported ERR or DF
    DeviceError { status: u8, error: u8 },

    /// A status wait exhausted its spin budget
    Timeout,

    /// The transfer state machine was not where the submitter expected it
    TransferStateCorrupted,

    EventCreationFailed,
    InterruptRegistrationFailed,
}

impl fmt::Display for AtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSectorCount => write!(f, "sector count must be non-zero"),
            Self::BufferTooSmall { required, provided } => {
                write!(f, "buffer holds {provided} bytes, request needs {required}")
            }
            Self::OutOfRange => write!(f, "sector range outside the device"),
            Self::DeviceDoesNotExist => write!(f, "no device present"),
            Self::DeviceNotSupported => write!(f, "device not supported"),
            Self::MixedIoAddressing => write!(f, "mixed legacy and PCI I/O addresses"),
            Self::InvalidIoBar { bar } => write!(f, "BAR{bar} is not a usable I/O range"),
            Self::PhysicalAddressTooHigh => write!(f, "physical address above 4 GiB"),
            Self::AlignmentError => write!(f, "DMA region not word aligned"),
            Self::SpanTooLarge => write!(f, "DMA region longer than 64 KiB"),
            Self::DescriptorTableTooLarge => write!(f, "too many DMA regions"),
            Self::OutOfMemory => write!(f, "out of DMA memory"),
            Self::TranslationMismatch { remaining } => {
                write!(f, "translation left {remaining} bytes uncovered")
            }
            Self::TranslationFailed => write!(f, "buffer translation failed"),
            Self::DeviceError { status, error } => {
                write!(f, "device error (status {status:#04x}, error {error:#04x})")
            }
            Self::Timeout => write!(f, "device timed out"),
            Self::TransferStateCorrupted => write!(f, "transfer state corrupted"),
            Self::EventCreationFailed => write!(f, "completion event creation failed"),
            Self::InterruptRegistrationFailed => write!(f, "interrupt registration failed"),
        }
    }
}
