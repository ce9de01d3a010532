//! Timer Manager
//!
//! Three logical timers drive the election: the periodic interval, the
//! coordinator liveness timeout, and the candidacy settling threshold.
//! Each has at most one pending deadline; restarting supersedes the
//! pending deadline rather than stacking a second one.

use std::time::Duration;
use tokio::task::JoinHandle;

use super::{post_nowait, Event, Mailbox};

/// The three logical election timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Periodic broadcast / query cadence
    Interval,
    /// Coordinator liveness timeout (client-side failure detector)
    LeaderTimeout,
    /// Settling window before committing to a role
    LeaderThreshold,
}

impl TimerKind {
    /// The event delivered when this timer expires
    pub fn tick_event(self) -> Event {
        match self {
            TimerKind::Interval => Event::IntervalTick,
            TimerKind::LeaderTimeout => Event::LeaderTimeoutTick,
            TimerKind::LeaderThreshold => Event::LeaderThresholdTick,
        }
    }

    fn index(self) -> usize {
        match self {
            TimerKind::Interval => 0,
            TimerKind::LeaderTimeout => 1,
            TimerKind::LeaderThreshold => 2,
        }
    }
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKind::Interval => write!(f, "interval"),
            TimerKind::LeaderTimeout => write!(f, "leader-timeout"),
            TimerKind::LeaderThreshold => write!(f, "leader-threshold"),
        }
    }
}

/// Timer operations requested by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Start,
    Stop,
    /// Stop then start; used whenever a liveness signal resets a deadline
    Restart,
}

/// Arms and cancels the three logical timers
///
/// Owned by the event-loop worker; expiry is delivered as an un-acked
/// event into the mailbox.
pub struct TimerManager {
    tx: Mailbox,
    offsets: [Duration; 3],
    pending: [Option<JoinHandle<()>>; 3],
}

impl TimerManager {
    /// Create a manager with one fixed offset per timer kind
    pub fn new(
        tx: Mailbox,
        interval: Duration,
        leader_timeout: Duration,
        leader_threshold: Duration,
    ) -> Self {
        Self {
            tx,
            offsets: [interval, leader_timeout, leader_threshold],
            pending: [None, None, None],
        }
    }

    /// Apply a timer operation
    pub fn apply(&mut self, op: TimerOp, kind: TimerKind) {
        match op {
            TimerOp::Start | TimerOp::Restart => self.start(kind),
            TimerOp::Stop => self.stop(kind),
        }
    }

    /// Schedule delivery of the timer's tick event after its offset
    ///
    /// Any pending deadline for the same kind is superseded.
    pub fn start(&mut self, kind: TimerKind) {
        self.stop(kind);

        let tx = self.tx.clone();
        let offset = self.offsets[kind.index()];
        let handle = tokio::spawn(async move {
            tokio::time::sleep(offset).await;
            if let Err(e) = post_nowait(&tx, kind.tick_event()).await {
                tracing::debug!("Timer {} expired after shutdown: {}", kind, e);
            }
        });

        self.pending[kind.index()] = Some(handle);
    }

    /// Cancel any pending deadline for this timer
    pub fn stop(&mut self, kind: TimerKind) {
        if let Some(handle) = self.pending[kind.index()].take() {
            handle.abort();
        }
    }

    /// Restart: stop then start
    pub fn restart(&mut self, kind: TimerKind) {
        self.start(kind);
    }

    /// Check whether a deadline is pending (pending and not yet fired)
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.pending[kind.index()]
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        for kind in [
            TimerKind::Interval,
            TimerKind::LeaderTimeout,
            TimerKind::LeaderThreshold,
        ] {
            self.stop(kind);
        }
    }
}
