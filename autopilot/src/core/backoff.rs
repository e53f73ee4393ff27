//! Idle backoff for the scheduling loop.
//!
//! The caller supplies `now`, so tests drive the schedule with a synthetic
//! clock.

use std::time::{Duration, Instant};

const EMPTY_STREAK_BEFORE_SLEEP: u32 = 2;
const DEFAULT_SLEEP: Duration = Duration::from_secs(5);
const IDLE_MINUTE_SLEEP: Duration = Duration::from_secs(15);
const IDLE_LONG_SLEEP: Duration = Duration::from_secs(30);
const IDLE_MINUTE: Duration = Duration::from_secs(60);
const IDLE_LONG: Duration = Duration::from_secs(5 * 60);

/// Tracks consecutive empty cycles and time since the last successful work.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    empty_streak: u32,
    last_work: Instant,
}

impl IdleBackoff {
    pub fn new(now: Instant) -> Self {
        Self {
            empty_streak: 0,
            last_work: now,
        }
    }

    /// Record a cycle outcome and return how long to sleep before the next one.
    pub fn record(&mut self, worked: bool, now: Instant) -> Duration {
        if worked {
            self.empty_streak = 0;
            self.last_work = now;
            return Duration::ZERO;
        }
        self.empty_streak = self.empty_streak.saturating_add(1);
        if self.empty_streak < EMPTY_STREAK_BEFORE_SLEEP {
            return Duration::ZERO;
        }
        let idle = now.saturating_duration_since(self.last_work);
        if idle > IDLE_LONG {
            IDLE_LONG_SLEEP
        } else if idle > IDLE_MINUTE {
            IDLE_MINUTE_SLEEP
        } else {
            DEFAULT_SLEEP
        }
    }

    pub fn empty_streak(&self) -> u32 {
        self.empty_streak
    }
}
