//! Event debouncing for live reload.
//!
//! Coalesces a burst of filesystem events for the watched file into a single
//! change. Bundlers often write their build-info file several times per
//! build; clients should reload once.

use std::time::Duration;

use tokio::time::Instant;

/// Longest a burst may hold back a change, in quiet periods.
const MAX_WAIT_PERIODS: u32 = 10;

/// Trailing-edge debouncer for a single watch target.
///
/// Every recorded event pushes the deadline out by the quiet period. The
/// change becomes ready once the deadline passes with no further events, or
/// at the latest `MAX_WAIT_PERIODS` quiet periods after the burst started.
#[derive(Debug)]
pub(crate) struct ChangeDebouncer {
    quiet_period: Duration,
    burst_started: Option<Instant>,
    deadline: Option<Instant>,
    coalesced: usize,
}

impl ChangeDebouncer {
    /// Create a debouncer with the given quiet period.
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            burst_started: None,
            deadline: None,
            coalesced: 0,
        }
    }

    /// Record an event observed at `now`.
    pub fn record(&mut self, now: Instant) {
        let started = *self.burst_started.get_or_insert(now);
        let cap = started + self.quiet_period * MAX_WAIT_PERIODS;
        self.deadline = Some((now + self.quiet_period).min(cap));
        self.coalesced += 1;
    }

    /// Deadline of the pending change, for timer scheduling.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending change if its deadline has passed.
    ///
    /// Returns the number of raw events that were coalesced into it.
    pub fn take_ready(&mut self, now: Instant) -> Option<usize> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.burst_started = None;
                Some(std::mem::take(&mut self.coalesced))
            }
            _ => None,
        }
    }
}
