//! Agent core: rule engine, position monitor driver, and scan scheduling.

mod classifier;
mod monitor;
mod rules;
mod scanner;

pub use classifier::{AiClassifier, HeuristicClassifier, ScanClassifier};
pub use monitor::{PositionMonitor, SessionContext, SessionHandle, TickSummary};
pub use rules::evaluate;
pub use scanner::{
    next_scan_delay, scan_due, should_run_new_scan, ScanScheduler, ScanState, DEFAULT_TARGET_HOUR,
};

use std::sync::atomic::{AtomicBool, Ordering};

/// Scoped check-and-set over an atomic flag. Acquisition fails while another
/// holder exists; release happens on drop, covering every exit path.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
