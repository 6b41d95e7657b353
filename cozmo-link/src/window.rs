//! Sliding windows over the sequenced packet stream.
//!
//! Both directions share one fixed-capacity ring buffer design:
//!
//! ```text
//!  expected_seq            expected_seq + size - 1
//!      │                          │
//!  ────┼──────────────────────────┼──────────▶ seq space (mod max_seq)
//!      │ <──────── size ─────────▶│
//! ```
//!
//! - [`ReceiveWindow`] buffers inbound packets that arrive early and hands
//!   them out strictly in sequence order, dropping duplicates and anything
//!   outside the window.
//! - [`SendWindow`] holds outbound packets until they are covered by a
//!   **cumulative** acknowledgement.
//!
//! Slots are indexed by `seq mod size`.  That indexing stays collision-free
//! across wraparound only while `max_seq % size == 0`, which the
//! constructors enforce.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use thiserror::Error;

use crate::seq::SeqSpace;

/// Errors raised by window construction and use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("sequence width must be 1..=16 bits, got {0}")]
    InvalidSeqBits(u32),
    #[error("window size {size} must be a power of two dividing a {max_seq} sequence space, at most half of it")]
    InvalidSize { size: usize, max_seq: u32 },
    #[error("start sequence {0} is outside the sequence space")]
    InvalidStart(u16),
    #[error("send window is full")]
    Full,
}

// ---------------------------------------------------------------------------
// Window (shared base)
// ---------------------------------------------------------------------------

/// Geometry shared by both window kinds.
#[derive(Debug, Clone, Copy)]
struct Window {
    space: SeqSpace,
    size: usize,
    /// Sequence number the window is currently waiting on.
    expected_seq: u16,
    /// Value `expected_seq` returns to on reset.
    start: u16,
}

impl Window {
    fn new(size: usize, seq_bits: u32, start: u16) -> Result<Self, WindowError> {
        let space = SeqSpace::new(seq_bits).ok_or(WindowError::InvalidSeqBits(seq_bits))?;
        let max_seq = space.max_seq();
        let fits = size.is_power_of_two()
            && size as u64 <= u64::from(max_seq / 2).max(1)
            && u64::from(max_seq) % size as u64 == 0;
        if !fits {
            return Err(WindowError::InvalidSize { size, max_seq });
        }
        if !space.contains(start) {
            return Err(WindowError::InvalidStart(start));
        }
        Ok(Self {
            space,
            size,
            expected_seq: start,
            start,
        })
    }

    fn slot(&self, seq: u16) -> usize {
        usize::from(seq) % self.size
    }
}

// ---------------------------------------------------------------------------
// ReceiveWindow
// ---------------------------------------------------------------------------

/// Reorders and deduplicates inbound sequenced packets.
#[derive(Debug, Clone)]
pub struct ReceiveWindow<T> {
    base: Window,
    /// Highest currently acceptable sequence number.
    last_seq: u16,
    slots: Vec<Option<T>>,
}

impl<T> ReceiveWindow<T> {
    /// Window starting at sequence number 0.
    pub fn new(size: usize, seq_bits: u32) -> Result<Self, WindowError> {
        Self::with_start(size, seq_bits, 0)
    }

    pub fn with_start(size: usize, seq_bits: u32, start: u16) -> Result<Self, WindowError> {
        let base = Window::new(size, seq_bits, start)?;
        Ok(Self {
            last_seq: base.space.advance(start, size as u32 - 1),
            slots: std::iter::repeat_with(|| None).take(size).collect(),
            base,
        })
    }

    pub fn size(&self) -> usize {
        self.base.size
    }

    pub fn max_seq(&self) -> u32 {
        self.base.space.max_seq()
    }

    pub fn expected_seq(&self) -> u16 {
        self.base.expected_seq
    }

    pub fn last_seq(&self) -> u16 {
        self.last_seq
    }

    /// Sequence number of the last packet handed out in order.
    ///
    /// This is the cumulative acknowledgement for the peer.
    pub fn last_delivered(&self) -> u16 {
        self.base.space.predecessor(self.base.expected_seq)
    }

    /// `true` when `seq` falls outside `[expected_seq, last_seq]`.
    pub fn is_out_of_order(&self, seq: u16) -> bool {
        !self.base.space.contains(seq)
            || !self
                .base
                .space
                .in_range(seq, self.base.expected_seq, self.last_seq)
    }

    /// Buffer `data` under `seq`.
    ///
    /// Returns `false` (and drops `data`) for invalid, out-of-window, or
    /// duplicate sequence numbers.
    pub fn put(&mut self, seq: u16, data: T) -> bool {
        if self.is_out_of_order(seq) {
            return false;
        }
        let slot = &mut self.slots[self.base.slot(seq)];
        if slot.is_some() {
            return false;
        }
        *slot = Some(data);
        true
    }

    /// Take the packet at `expected_seq`, if it has arrived, and slide the
    /// window forward by one.
    ///
    /// Call in a loop until `None` to drain every now-contiguous packet.
    pub fn get(&mut self) -> Option<T> {
        let idx = self.base.slot(self.base.expected_seq);
        let data = self.slots[idx].take()?;
        self.base.expected_seq = self.base.space.successor(self.base.expected_seq);
        self.last_seq = self.base.space.successor(self.last_seq);
        Some(data)
    }

    /// Forget everything and wait on the start sequence number again.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.base.expected_seq = self.base.start;
        self.last_seq = self
            .base
            .space
            .advance(self.base.start, self.base.size as u32 - 1);
    }
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Buffers outbound packets until they are cumulatively acknowledged.
///
/// ```text
///  expected_seq        next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug, Clone)]
pub struct SendWindow<T> {
    base: Window,
    /// Sequence number assigned by the next `put`.
    next_seq: u16,
    slots: Vec<Option<T>>,
}

impl<T> SendWindow<T> {
    /// Window starting at sequence number 0.
    pub fn new(size: usize, seq_bits: u32) -> Result<Self, WindowError> {
        Self::with_start(size, seq_bits, 0)
    }

    pub fn with_start(size: usize, seq_bits: u32, start: u16) -> Result<Self, WindowError> {
        let base = Window::new(size, seq_bits, start)?;
        Ok(Self {
            next_seq: start,
            slots: std::iter::repeat_with(|| None).take(size).collect(),
            base,
        })
    }

    pub fn size(&self) -> usize {
        self.base.size
    }

    pub fn expected_seq(&self) -> u16 {
        self.base.expected_seq
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Number of packets awaiting acknowledgement.
    pub fn len(&self) -> usize {
        self.base
            .space
            .distance(self.base.expected_seq, self.next_seq) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.base.size
    }

    /// Store `data` under the next sequence number and return that number.
    pub fn put(&mut self, data: T) -> Result<u16, WindowError> {
        if self.is_full() {
            return Err(WindowError::Full);
        }
        let seq = self.next_seq;
        let idx = self.base.slot(seq);
        self.slots[idx] = Some(data);
        self.next_seq = self.base.space.successor(seq);
        Ok(seq)
    }

    /// Release everything from `expected_seq` through `seq` inclusive.
    ///
    /// Returns the number of packets released; `0` for a duplicate, stale,
    /// or not-yet-sent `seq`.
    pub fn acknowledge(&mut self, seq: u16) -> usize {
        let space = self.base.space;
        if !space.contains(seq) {
            return 0;
        }
        let covered = space.distance(self.base.expected_seq, seq);
        if covered >= space.distance(self.base.expected_seq, self.next_seq) {
            return 0;
        }
        let released = covered as usize + 1;
        for _ in 0..released {
            let idx = self.base.slot(self.base.expected_seq);
            self.slots[idx] = None;
            self.base.expected_seq = space.successor(self.base.expected_seq);
        }
        released
    }

    /// Outstanding packets from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &T)> + '_ {
        let space = self.base.space;
        let start = self.base.expected_seq;
        (0..self.len() as u32).filter_map(move |i| {
            let seq = space.advance(start, i);
            self.slots[self.base.slot(seq)].as_ref().map(|d| (seq, d))
        })
    }

    /// Drop every outstanding packet and restart from the start sequence.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.base.expected_seq = self.base.start;
        self.next_seq = self.base.start;
    }
}
