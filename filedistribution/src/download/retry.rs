//! Time budget for serve-file retries.

use std::time::Duration;

use tokio::time::Instant;

/// Point in time after which no further attempt is made.
///
/// The retry loop carries the deadline rather than an attempt counter, so the
/// sleep interval and the number of attempts stay independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self(Instant::now() + budget)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Delay before the next attempt, or `None` if an attempt after sleeping
    /// `interval` would start past the deadline.
    pub fn next_retry_delay(&self, interval: Duration) -> Option<Duration> {
        if self.remaining() > interval {
            Some(interval)
        } else {
            None
        }
    }
}
