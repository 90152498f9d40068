use crate::storage::checkpoint::Checkpoint;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Shortest tick period the provider API is polled with
pub const MIN_PERIOD: Duration = Duration::from_secs(60);

/// Longest tick period the provider API is polled with
pub const MAX_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Period substituted when the configured one is out of range
pub const FALLBACK_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Bring a configured tick period into the supported range.
///
/// Out-of-range values are replaced by [`FALLBACK_PERIOD`] with a warning;
/// this never fails.
pub fn clamp_period(period: Duration) -> Duration {
    if period < MIN_PERIOD || period > MAX_PERIOD {
        warn!(
            configured = ?period,
            fallback = ?FALLBACK_PERIOD,
            "Configured period is outside 1m..=30m, using fallback"
        );
        FALLBACK_PERIOD
    } else {
        period
    }
}

/// Time range fetched by one tick, in Unix seconds with an inclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// `end - start`, the quantity the segmenter partitions
    pub fn span(&self) -> i64 {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// What the orchestrator does before settling into the regular cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAction {
    /// No checkpoint yet: fetch the first window right away
    FirstRun(TimeWindow),
    /// The checkpoint is more than one period behind: close the gap in one fetch
    CatchUp(TimeWindow),
    /// The checkpoint is recent: sleep until the next window is available
    Wait(Duration),
}

/// Computes fetch windows from the clock and the persisted checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    period: i64,
    safety_lag: i64,
}

impl WindowPlanner {
    pub fn new(period: Duration, safety_lag: Duration) -> Self {
        let period = clamp_period(period);
        Self {
            period: period.as_secs() as i64,
            safety_lag: safety_lag.as_secs() as i64,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period as u64)
    }

    /// Latest second the provider is expected to have complete data for
    pub fn horizon(&self, now: i64) -> i64 {
        now - self.safety_lag
    }

    /// Window for a regular tick.
    pub fn next_window(&self, now: i64, checkpoint: &Checkpoint) -> TimeWindow {
        let start = if checkpoint.is_fresh() {
            self.horizon(now) - self.period
        } else {
            checkpoint.last_end_ts + 1
        };
        TimeWindow::new(start, start + self.period)
    }

    /// Decide how the first tick after process start is scheduled.
    pub fn startup_action(&self, now: i64, checkpoint: &Checkpoint) -> StartupAction {
        if checkpoint.is_fresh() {
            return StartupAction::FirstRun(self.next_window(now, checkpoint));
        }

        let horizon = self.horizon(now);
        let gap = horizon - checkpoint.last_end_ts;
        if gap > self.period {
            StartupAction::CatchUp(TimeWindow::new(checkpoint.last_end_ts + 1, horizon))
        } else {
            StartupAction::Wait(Duration::from_secs((self.period - gap) as u64))
        }
    }
}
