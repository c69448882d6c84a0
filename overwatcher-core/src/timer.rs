//! The main timer (spec.md §4.7, §9 design note): a single shared
//! deadline the driver restarts on every successful step.
//!
//! Implemented as a deadline cell plus a generation counter rather than
//! the Python original's `threading.Timer` per call site, so a restart
//! invalidates any in-flight sleep without racing a callback that fired
//! just before cancellation landed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::logging::TestLogger;
use crate::outcome::Outcome;
use crate::result::ResultSlot;

pub struct MainTimer {
    deadline: Mutex<Option<(Instant, u64)>>,
    generation: AtomicU64,
    notify: Notify,
}

impl MainTimer {
    pub fn new() -> Self {
        Self {
            deadline: Mutex::new(None),
            generation: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// (Re)arms the timer for `duration` from now, invalidating whatever
    /// deadline was previously pending.
    pub fn restart(&self, duration: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.deadline.lock().expect("timer mutex poisoned") =
            Some((Instant::now() + duration, generation));
        self.notify.notify_one();
    }

    /// Disarms the timer. A step that doesn't need a fresh deadline
    /// (a modifier, a user prompt) stops it rather than letting a stale
    /// one fire mid-step.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.deadline.lock().expect("timer mutex poisoned") = None;
        self.notify.notify_one();
    }
}

impl Default for MainTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the timer task until it fires a decisive [`Outcome::Timeout`],
/// the result is already decided by someone else, or `shutdown` fires.
pub async fn run_timer(
    timer: Arc<MainTimer>,
    ctx: Arc<EngineContext>,
    tx_tx: UnboundedSender<String>,
    result: Arc<ResultSlot>,
    logger: Arc<TestLogger>,
    timeout_duration: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let target = *timer.deadline.lock().expect("timer mutex poisoned");

        let Some((deadline, generation)) = target else {
            tokio::select! {
                _ = timer.notify.notified() => continue,
                _ = shutdown.cancelled() => return,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let still_current = matches!(
                    *timer.deadline.lock().expect("timer mutex poisoned"),
                    Some((_, g)) if g == generation
                );
                if !still_current {
                    continue;
                }
                *timer.deadline.lock().expect("timer mutex poisoned") = None;

                // Spec.md §4.7: the *current* (pre-decrement) budget
                // decides whether this fire is tolerated. A budget of 2
                // therefore survives two fires and records timeout on
                // the third, not the second.
                if ctx.test_timeouts() > 0 {
                    let remaining = ctx.decrement_test_timeouts();
                    logger.log(&[
                        "TIMEOUT, BUDGET REMAINING:",
                        &remaining.to_string(),
                    ]);
                    if !ctx.telnet {
                        let _ = tx_tx.send(String::new());
                    }
                    timer.restart(timeout_duration);
                } else {
                    logger.log(&["TIMEOUT, BUDGET EXHAUSTED"]);
                    result.set(Outcome::Timeout);
                    return;
                }
            }
            _ = timer.notify.notified() => continue,
            _ = shutdown.cancelled() => return,
        }
    }
}
