//! Retransmission scheduling
//!
//! TFTP has no negotiated connection state, so liveness is purely a matter
//! of resending the in-flight datagram on a fixed schedule and declaring
//! the peer dead when the schedule runs out. This module provides that
//! schedule as a cancellable, awaitable timer shared by both session types.
//!
//! A schedule `[d1, .., dn]` yields a "retransmit" event after each of
//! `d1..d(n-1)` and a final "give-up" event after `dn` (counted from the
//! moment `d(n-1)` elapsed). Separating retransmission from give-up means
//! the sessions never special-case the last attempt themselves.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::{Instant, sleep_until};

/// An ordered, non-empty list of waits driving [`RetryTimer`].
///
/// The default is the classic TFTP server back-off of 1s, 3s and 7s: two
/// retransmissions, then roughly eleven seconds until the peer is
/// presumed gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    waits: Vec<Duration>,
}

impl RetrySchedule {
    /// Create a schedule from an ordered list of waits.
    ///
    /// Fails on an empty list: a schedule with no waits could neither
    /// retransmit nor give up.
    pub fn new(waits: Vec<Duration>) -> Result<Self> {
        if waits.is_empty() {
            bail!("retry schedule must contain at least one wait");
        }
        Ok(Self { waits })
    }

    /// The configured waits, in order.
    pub fn waits(&self) -> &[Duration] {
        &self.waits
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            waits: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(7),
            ],
        }
    }
}

/// What a [`RetryTimer`] tick is telling the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    /// Re-send the in-flight datagram; the schedule keeps running.
    Retransmit,
    /// The schedule is exhausted; the peer is presumed unreachable.
    GiveUp,
}

/// A single-use timer walking a [`RetrySchedule`].
///
/// Each waiting period of a transfer gets a fresh timer; a spent or
/// cancelled timer never fires again. Deadlines are absolute, so a
/// `tick` future dropped mid-wait (e.g. because a duplicate datagram won
/// the session's `select!`) and polled again does not stretch the
/// schedule.
///
/// # Examples
/// ```no_run
/// # async fn demo() {
/// use tftp::{RetryEvent, RetrySchedule, RetryTimer};
///
/// let mut timer = RetryTimer::start(RetrySchedule::default(), true);
/// // First tick resolves immediately: the initial transmission.
/// assert_eq!(timer.tick().await, RetryEvent::Retransmit);
/// # }
/// ```
#[derive(Debug)]
pub struct RetryTimer {
    waits: Vec<Duration>,
    /// Index of the wait currently pending.
    position: usize,
    /// Absolute deadline of the pending wait; `None` while an immediate
    /// first fire is still owed.
    deadline: Option<Instant>,
    spent: bool,
}

impl RetryTimer {
    /// Start walking `schedule`.
    ///
    /// With `fire_first_immediately` the first `tick` resolves at once
    /// with [`RetryEvent::Retransmit`], so the initial transmission and
    /// its retransmissions flow through the same path exactly once each.
    pub fn start(schedule: RetrySchedule, fire_first_immediately: bool) -> Self {
        let waits = schedule.waits;
        let deadline = if fire_first_immediately {
            None
        } else {
            Some(Instant::now() + waits[0])
        };
        Self {
            waits,
            position: 0,
            deadline,
            spent: false,
        }
    }

    /// Permanently stop the timer. Idempotent; safe after give-up.
    pub fn cancel(&mut self) {
        self.spent = true;
    }

    /// Wait for the next scheduled event.
    ///
    /// After [`RetryEvent::GiveUp`] (or [`cancel`](Self::cancel)) the
    /// returned future never resolves, which makes it safe to keep in a
    /// `select!` arm.
    pub async fn tick(&mut self) -> RetryEvent {
        if self.spent {
            return std::future::pending().await;
        }

        let Some(deadline) = self.deadline else {
            // Owed immediate fire; arm the first real wait.
            self.deadline = Some(Instant::now() + self.waits[0]);
            return RetryEvent::Retransmit;
        };

        sleep_until(deadline).await;

        if self.position + 1 == self.waits.len() {
            // The final wait elapsed without cancellation.
            self.spent = true;
            RetryEvent::GiveUp
        } else {
            self.position += 1;
            self.deadline = Some(Instant::now() + self.waits[self.position]);
            RetryEvent::Retransmit
        }
    }
}
