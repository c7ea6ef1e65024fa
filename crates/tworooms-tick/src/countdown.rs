//! Cancellable countdown tasks.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::TickScheduler;

/// Spawns countdown tasks.
pub struct Countdown;

impl Countdown {
    /// Spawns a task that ticks `seconds` times, one `period` apart,
    /// calling `on_tick` with the count remaining after each tick
    /// (`seconds - 1` down to `0`).
    ///
    /// The task ends after the zero tick or as soon as `on_tick` returns
    /// [`ControlFlow::Break`]. A zero-length countdown ends immediately
    /// without calling back.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(seconds: u32, period: Duration, mut on_tick: F) -> TimerHandle
    where
        F: FnMut(u32) -> ControlFlow<()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut scheduler = TickScheduler::new(period);
            let mut remaining = seconds;
            while remaining > 0 {
                scheduler.wait_for_tick().await;
                remaining -= 1;
                if on_tick(remaining).is_break() {
                    tracing::trace!(remaining, "countdown stopped by callback");
                    return;
                }
            }
            tracing::trace!("countdown finished");
        });

        TimerHandle {
            abort: task.abort_handle(),
        }
    }
}

/// Handle to a running [`Countdown`].
///
/// Dropping the handle does not stop the countdown; call
/// [`cancel`](Self::cancel).
#[derive(Debug, Clone)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Stops the countdown. Safe to call more than once and from any task,
    /// including from inside the countdown's own callback, in which case
    /// the task stops at its next tick boundary.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the countdown task has ended, for any reason.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
