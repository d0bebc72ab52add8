//! The one in-flight DMA transfer a device may have.
//!
//! The submitter and the interrupt handler hand the transfer back and forth through
//! a single atomic state word:
//!
//! ```text
//! Free --begin()--> InProgress --complete()--> Finished --reclaim()--> Free
//!       submitter               interrupt                 submitter
//! ```

use core::sync::atomic::{AtomicU16, Ordering};

use atomic_enum::atomic_enum;

use crate::error::AtaError;
use crate::hal::{CompletionEvent, InterruptContext};
use crate::registers::Status;

#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum TransferState {
    /// No transfer owns the slot.
    Free,
    /// Descriptor table programmed and command dispatched, waiting for the interrupt.
    InProgress,
    /// The interrupt handler saw the transfer complete; cleanup pending.
    Finished,
}

impl TransferState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::InProgress => "InProgress",
            Self::Finished => "Finished",
        }
    }
}

/// Status and error registers captured by the interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFault {
    pub status: Status,
    pub error: u8,
}

impl DeviceFault {
    fn pack(self) -> u16 {
        (u16::from(self.status.bits()) << 8) | u16::from(self.error)
    }

    // ERR or DF is always set in a recorded fault, so 0 means none.
    fn unpack(word: u16) -> Option<Self> {
        (word != 0).then(|| Self {
            status: Status::from_bits_retain((word >> 8) as u8),
            error: word as u8,
        })
    }
}

impl From<DeviceFault> for AtaError {
    fn from(fault: DeviceFault) -> Self {
        AtaError::DeviceError {
            status: fault.status.bits(),
            error: fault.error,
        }
    }
}

pub struct CurrentTransfer<E> {
    state: AtomicTransferState,
    fault: AtomicU16,
    done: E,
}

impl<E: CompletionEvent> CurrentTransfer<E> {
    pub fn new(done: E) -> Self {
        Self {
            state: AtomicTransferState::new(TransferState::Free),
            fault: AtomicU16::new(0),
            done,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state.load(Ordering::Acquire)
    }

    /// Claims the slot for a new transfer. Called right before the command is issued.
    pub(crate) fn begin(&self) {
        self.fault.store(0, Ordering::Relaxed);
        let previous = self.state.swap(TransferState::InProgress, Ordering::AcqRel);
        if previous != TransferState::Free {
            log::error!("ata::transfer: began a transfer while {}", previous.name());
        }
    }

    /// `InProgress -> Finished`. Fails with the observed state on a spurious completion.
    pub(crate) fn complete(
        &self,
        _ctx: &InterruptContext,
        fault: Option<DeviceFault>,
    ) -> Result<(), TransferState> {
        if let Some(fault) = fault {
            self.fault.store(fault.pack(), Ordering::Relaxed);
        }
        self.state
            .compare_exchange(
                TransferState::InProgress,
                TransferState::Finished,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
    }

    pub(crate) fn signal(&self) {
        self.done.signal();
    }

    pub(crate) fn wait(&self) {
        self.done.wait();
    }

    /// `Finished -> Free`, returning whatever fault the interrupt handler recorded.
    pub(crate) fn reclaim(&self) -> Result<Option<DeviceFault>, AtaError> {
        match self.state.compare_exchange(
            TransferState::Finished,
            TransferState::Free,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(DeviceFault::unpack(self.fault.swap(0, Ordering::Relaxed))),
            Err(observed) => {
                log::error!("ata::transfer: woke up in state {}", observed.name());
                Err(AtaError::TransferStateCorrupted)
            }
        }
    }
}
