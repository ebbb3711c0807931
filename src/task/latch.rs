//! One-shot settle latch
//!
//! Both reconciliation paths race to settle a task. Only the first caller
//! wins; every later attempt is refused without side effects.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SettleLatch {
    settled: AtomicBool,
}

impl SettleLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the latch. Returns true exactly once.
    pub fn try_settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}
