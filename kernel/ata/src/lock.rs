//! Ownership-tracking lock used to serialize access to a shared disk.
//!
//! The waiting strategy is chosen once at boot. CPUs that support MONITOR/MWAIT
//! park on the owner word instead of hammering it.
//!
//! Interrupts stay enabled while the lock is held and the holder may sleep, so
//! owners are threads. `owner_id` must return the same value for a thread on every
//! CPU it runs on.

use core::sync::atomic::{AtomicU64, Ordering};

use raw_cpuid::CpuId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Spin,
    Monitor,
}

impl LockKind {
    pub fn detect() -> Self {
        let monitor = CpuId::new()
            .get_feature_info()
            .is_some_and(|info| info.has_monitor_mwait());
        if monitor { Self::Monitor } else { Self::Spin }
    }
}

const UNOWNED: u64 = 0;

pub struct KernelLock {
    kind: LockKind,
    /// `owner_id() + 1` of the holder, or [`UNOWNED`]
    owner: AtomicU64,
    owner_id: fn() -> u32,
}

impl KernelLock {
    pub const fn new(kind: LockKind, owner_id: fn() -> u32) -> Self {
        Self {
            kind,
            owner: AtomicU64::new(UNOWNED),
            owner_id,
        }
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    fn current(&self) -> u64 {
        u64::from((self.owner_id)()) + 1
    }

    pub fn try_acquire(&self) -> bool {
        self.owner
            .compare_exchange(UNOWNED, self.current(), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn acquire(&self) {
        let me = self.current();
        loop {
            if self
                .owner
                .compare_exchange_weak(UNOWNED, me, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            while self.owner.load(Ordering::Relaxed) != UNOWNED {
                match self.kind {
                    LockKind::Spin => core::hint::spin_loop(),
                    LockKind::Monitor => monitor_wait(&self.owner),
                }
            }
        }
    }

    /// Panics if the caller does not hold the lock.
    pub fn release(&self) {
        let me = self.current();
        if self
            .owner
            .compare_exchange(me, UNOWNED, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            panic!("KernelLock released by a context that does not own it");
        }
    }

    pub fn is_owner(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == self.current()
    }

    pub fn lock(&self) -> KernelLockGuard<'_> {
        self.acquire();
        KernelLockGuard { lock: self }
    }
}

pub struct KernelLockGuard<'a> {
    lock: &'a KernelLock,
}

impl Drop for KernelLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Sleeps until `word` is written or some other wake event arrives.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn monitor_wait(word: &AtomicU64) {
    unsafe {
        core::arch::asm!(
            "monitor",
            in("rax") word.as_ptr(),
            in("ecx") 0,
            in("edx") 0,
            options(nostack, preserves_flags)
        );
        if word.load(Ordering::Relaxed) != UNOWNED {
            core::arch::asm!("mwait", in("eax") 0, in("ecx") 0, options(nostack, preserves_flags));
        }
    }
}

// MWAIT is privileged; hosted builds fall back to spinning.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
fn monitor_wait(_word: &AtomicU64) {
    core::hint::spin_loop();
}
