use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::AtaError;
use crate::hal::CompletionEvent;

/// Auto-reset event for kernels without a scheduler to park on.
#[derive(Debug, Default)]
pub struct SpinEvent {
    signaled: AtomicBool,
}

impl CompletionEvent for SpinEvent {
    fn create() -> Result<Self, AtaError> {
        Ok(Self::default())
    }

    fn wait(&self) {
        while self
            .signaled
            .compare_exchange_weak(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }

    fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }
}
