use crate::consts::DEFAULT_SPIN_BUDGET;
use crate::lock::LockKind;

/// How long status polls may spin before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    Forever,
    /// Give up with [`crate::AtaError::Timeout`] after this many status reads
    Spins(u32),
}

impl WaitPolicy {
    pub fn exhausted(self, spins: u32) -> bool {
        match self {
            Self::Forever => false,
            Self::Spins(budget) => spins >= budget,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::Spins(DEFAULT_SPIN_BUDGET)
    }
}

/// Driver settings chosen once at boot and handed to every device.
#[derive(Debug, Clone, Copy)]
pub struct AtaConfig {
    pub wait: WaitPolicy,
    pub lock: LockKind,
    /// Names the current thread for lock ownership. Must not change when the
    /// thread migrates, since a [`crate::Disk`] stays locked across DMA waits.
    pub owner_id: fn() -> u32,
}

impl AtaConfig {
    /// Picks the lock flavor from CPUID. `owner_id` comes from the scheduler.
    pub fn detect(owner_id: fn() -> u32) -> Self {
        let config = Self {
            wait: WaitPolicy::default(),
            lock: LockKind::detect(),
            owner_id,
        };
        log::info!("ata::config: using {:?} locks, wait policy {:?}", config.lock, config.wait);
        config
    }
}
