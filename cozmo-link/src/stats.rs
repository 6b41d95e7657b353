//! Traffic counters.
//!
//! [`Stats`] is shared by all three tasks of a connection; every counter is
//! an independent relaxed atomic, so readers get a cheap approximate view.
//! [`Stats::snapshot`] copies the counters into a plain [`StatsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    bytes_sent: AtomicU64,
    frames_sent: AtomicU64,
    packets_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_received: AtomicU64,
    packets_received: AtomicU64,
    frames_dropped: AtomicU64,
    foreign_datagrams: AtomicU64,
    packets_delivered: AtomicU64,
    packets_discarded: AtomicU64,
    retransmitted_frames: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn frame_sent(&self, bytes: usize, packets: usize) {
        bump(&self.bytes_sent, bytes as u64);
        bump(&self.frames_sent, 1);
        bump(&self.packets_sent, packets as u64);
    }

    pub(crate) fn frame_received(&self, bytes: usize, packets: usize) {
        bump(&self.bytes_received, bytes as u64);
        bump(&self.frames_received, 1);
        bump(&self.packets_received, packets as u64);
    }

    /// A datagram that failed to decode.
    pub(crate) fn frame_dropped(&self) {
        bump(&self.frames_dropped, 1);
    }

    /// A datagram from an address other than the peer.
    pub(crate) fn foreign_datagram(&self) {
        bump(&self.foreign_datagrams, 1);
    }

    pub(crate) fn packet_delivered(&self) {
        bump(&self.packets_delivered, 1);
    }

    /// A sequenced packet the receive window refused (duplicate or stale).
    pub(crate) fn packet_discarded(&self) {
        bump(&self.packets_discarded, 1);
    }

    pub(crate) fn frames_retransmitted(&self, n: usize) {
        bump(&self.retransmitted_frames, n as u64);
    }

    pub(crate) fn send_error(&self) {
        bump(&self.send_errors, 1);
    }

    pub(crate) fn recv_error(&self) {
        bump(&self.recv_errors, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            bytes_sent: get(&self.bytes_sent),
            frames_sent: get(&self.frames_sent),
            packets_sent: get(&self.packets_sent),
            bytes_received: get(&self.bytes_received),
            frames_received: get(&self.frames_received),
            packets_received: get(&self.packets_received),
            frames_dropped: get(&self.frames_dropped),
            foreign_datagrams: get(&self.foreign_datagrams),
            packets_delivered: get(&self.packets_delivered),
            packets_discarded: get(&self.packets_discarded),
            retransmitted_frames: get(&self.retransmitted_frames),
            send_errors: get(&self.send_errors),
            recv_errors: get(&self.recv_errors),
        }
    }
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub frames_received: u64,
    pub packets_received: u64,
    pub frames_dropped: u64,
    pub foreign_datagrams: u64,
    pub packets_delivered: u64,
    pub packets_discarded: u64,
    pub retransmitted_frames: u64,
    pub send_errors: u64,
    pub recv_errors: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent {}B/{}f/{}p (retx {}f), recv {}B/{}f/{}p, delivered {}p, \
             discarded {}p, dropped {}f, foreign {}, errors {}tx/{}rx",
            self.bytes_sent,
            self.frames_sent,
            self.packets_sent,
            self.retransmitted_frames,
            self.bytes_received,
            self.frames_received,
            self.packets_received,
            self.packets_delivered,
            self.packets_discarded,
            self.frames_dropped,
            self.foreign_datagrams,
            self.send_errors,
            self.recv_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let s = Stats::new();
        s.frame_sent(100, 3);
        s.frame_sent(20, 1);
        s.frame_received(14, 0);
        s.frames_retransmitted(2);
        s.packet_discarded();

        let snap = s.snapshot();
        assert_eq!(snap.bytes_sent, 120);
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.packets_sent, 4);
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.retransmitted_frames, 2);
        assert_eq!(snap.packets_discarded, 1);
        assert_eq!(snap.frames_dropped, 0);
    }

    #[test]
    fn display_mentions_counts() {
        let s = Stats::new();
        s.frame_sent(42, 2);
        let line = s.snapshot().to_string();
        assert!(line.starts_with("sent 42B/1f/2p"), "{line}");
    }
}
