//! Timing parameters and periodic deadlines.
//!
//! Every loop in the transport is paced by a bounded wait, never by an
//! unbounded block, so the values in [`Timing`] double as scheduling ticks:
//! - the send worker collects outbound packets for `collect_interval` and
//!   retransmits the window after `ack_timeout` without progress;
//! - the receive worker waits at most `recv_timeout` for a datagram;
//! - the coordinator waits at most `dispatch_timeout` for a delivery, then
//!   services its [`Periodic`] keep-alive and statistics deadlines.

use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Nominal interval between outgoing frames.
    pub frame_period: Duration,
    /// Retransmit the whole window when no ack arrived for this long.
    pub ack_timeout: Duration,
    /// How long the send worker gathers packets into one batch.
    pub collect_interval: Duration,
    /// Upper bound on one socket wait in the receive worker.
    pub recv_timeout: Duration,
    /// Upper bound on one delivery wait in the coordinator.
    pub dispatch_timeout: Duration,
    /// Keep-alive interval while connected.
    pub ping_interval: Duration,
    /// Traffic summary interval while connected.
    pub stats_interval: Duration,
}

impl Timing {
    /// Timing derived from a frame period: the ack timeout is three periods
    /// and the collect interval a third of one.
    pub fn from_frame_period(frame_period: Duration) -> Self {
        Self {
            frame_period,
            ack_timeout: frame_period * 3,
            collect_interval: frame_period / 3,
            recv_timeout: Duration::from_millis(50),
            dispatch_timeout: Duration::from_millis(50),
            ping_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        // 30 frames per second.
        Self::from_frame_period(Duration::from_micros(33_333))
    }
}

/// A repeating deadline polled from a loop that already wakes regularly.
#[derive(Debug, Clone)]
pub struct Periodic {
    interval: Duration,
    next: Instant,
}

impl Periodic {
    /// First deadline is one `interval` from now.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    /// `true` once per elapsed interval; re-arms itself when it fires.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = now + self.interval;
        true
    }

    /// Push the next deadline a full interval past `now`.
    pub fn restart(&mut self, now: Instant) {
        self.next = now + self.interval;
    }
}
