//! The shared result cell (spec.md §4.7, §5): whichever of the Timer or
//! the Test driver decides the run's [`Outcome`] first wins; later
//! attempts are dropped.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::outcome::Outcome;

/// A single-assignment, multi-reader cell. `watch` lets every interested
/// task (engine shutdown, driver's early-exit check) observe the result
/// without consuming it, unlike a `oneshot::Receiver`.
pub struct ResultSlot {
    tx: watch::Sender<Option<Outcome>>,
    claimed: AtomicBool,
}

impl ResultSlot {
    pub fn new() -> (Self, watch::Receiver<Option<Outcome>>) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                tx,
                claimed: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Records `outcome` if no result has been set yet. Spec.md §5: "at
    /// most one value is recorded before cleanup begins; additional
    /// `setResult` calls are dropped."
    pub fn set(&self, outcome: Outcome) {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.tx.send(Some(outcome));
        }
    }
}
