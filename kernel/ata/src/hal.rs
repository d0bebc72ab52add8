//! Services the driver borrows from the rest of the kernel.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;

use x86_64::PhysAddr;

use crate::error::AtaError;
use crate::pci::PciLocation;

/// One physically contiguous run backing part of a virtual buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationPair {
    pub address: PhysAddr,
    pub length: u32,
}

pub trait DmaMemory: Send + Sync {
    /// Physical runs covering `[buffer, buffer + length)`, in buffer order.
    fn translate(
        &self,
        buffer: NonNull<u8>,
        length: usize,
    ) -> Result<Vec<TranslationPair>, AtaError>;

    /// Physically contiguous memory aligned to `layout.align()`.
    fn allocate_contiguous(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from [`DmaMemory::allocate_contiguous`] on `self` with the same
    /// `layout`, and no device may still be reading it.
    unsafe fn free_contiguous(&self, ptr: NonNull<u8>, layout: Layout);

    fn physical_address(&self, ptr: NonNull<u8>) -> PhysAddr;
}

/// Auto-reset binary event the submitter sleeps on until the interrupt handler fires.
pub trait CompletionEvent: Send + Sync {
    fn create() -> Result<Self, AtaError>
    where
        Self: Sized;

    /// Blocks until signaled and consumes the signal.
    fn wait(&self);

    /// Must be safe to call from interrupt context.
    fn signal(&self);
}

/// Proof that the caller is running inside an interrupt handler.
pub struct InterruptContext(());

impl InterruptContext {
    /// # Safety
    /// Only the platform's interrupt entry path may create a context, and only for the
    /// duration of the handler call.
    pub unsafe fn enter() -> Self {
        Self(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStatus {
    Handled,
    NotOurs,
}

/// Runs on a possibly shared line. Must not block or allocate.
pub trait InterruptHandler: Send + Sync {
    fn handle(&self, ctx: &InterruptContext) -> InterruptStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Legacy { irq: u8 },
    Pci(PciLocation),
}

pub trait InterruptRegistrar {
    /// Attaches `handler` to `source` as a shared (non-exclusive) line.
    fn register_interrupt(
        &self,
        source: InterruptSource,
        handler: Arc<dyn InterruptHandler>,
    ) -> Result<(), AtaError>;
}
