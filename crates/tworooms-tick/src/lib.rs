//! Fixed-rate scheduling for tworooms timers.
//!
//! Two layers:
//!
//! - [`TickScheduler`] fires at a fixed period and skips ahead when a tick
//!   wakes late, so a stalled runtime never produces a burst of ticks.
//! - [`Countdown`] drives a scheduler inside its own task and calls back
//!   once per tick with the seconds remaining. The returned
//!   [`TimerHandle`] cancels it from anywhere.
//!
//! # Integration
//!
//! The round engine keeps one [`TimerHandle`] per room:
//!
//! ```ignore
//! let handle = Countdown::spawn(duration, Duration::from_secs(1), move |remaining| {
//!     engine.on_tick(&code, remaining)
//! });
//! timers.insert(code, handle);
//! ```

mod countdown;

pub use countdown::{Countdown, TimerHandle};

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Period used by round countdowns.
pub const ONE_SECOND: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Tick info (returned to caller each tick)
// ---------------------------------------------------------------------------

/// Information about a completed tick, returned by
/// [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` if this tick fired more than a tenth of a period late.
    pub overrun: bool,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period tick scheduler.
pub struct TickScheduler {
    period: Duration,
    tick_count: u64,
    next_tick: Instant,
}

impl TickScheduler {
    /// Create a scheduler whose first tick fires one `period` from now.
    ///
    /// A zero period is raised to one millisecond.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        debug!(period_ms = period.as_millis() as u64, "tick scheduler created");
        Self {
            period,
            tick_count: 0,
            next_tick: Instant::now() + period,
        }
    }

    /// Wait until the next tick is due.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let next = self.next_tick;
        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > self.period / 10;
        if overrun {
            if late_by >= self.period {
                warn!(
                    tick = self.tick_count,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "tick overrun, skipping ahead"
                );
            }
            // Reschedule from now, not from the missed deadline.
            self.next_tick = now + self.period;
        } else {
            self.next_tick = next + self.period;
        }

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
