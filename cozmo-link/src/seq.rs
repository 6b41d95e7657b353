//! Wraparound-aware sequence number arithmetic.
//!
//! Sequence numbers are fixed-width and cycle back to zero.  Every window
//! comparison ("is this number inside the window?", "how far ahead is it?")
//! goes through [`SeqSpace`] so the modular arithmetic lives in one place.
//!
//! ```text
//!   max_seq = 8
//!   distance(6, 1) = 3        6 → 7 → 0 → 1
//!   in_range(0, 6, 1) = true  [6, 7, 0, 1]
//! ```

/// Widest supported sequence space; the wire carries `u16`.
pub const MAX_SEQ_BITS: u32 = 16;

/// The modular space `[0, 2^seq_bits)` that sequence numbers live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    max_seq: u32,
}

impl SeqSpace {
    /// `None` unless `1 <= seq_bits <= 16`.
    pub fn new(seq_bits: u32) -> Option<Self> {
        if seq_bits == 0 || seq_bits > MAX_SEQ_BITS {
            return None;
        }
        Some(Self {
            max_seq: 1 << seq_bits,
        })
    }

    /// Modulus of the space (`2^seq_bits`).
    pub fn max_seq(self) -> u32 {
        self.max_seq
    }

    /// `true` when `seq` is a representable value of this space.
    pub fn contains(self, seq: u16) -> bool {
        u32::from(seq) < self.max_seq
    }

    /// `seq + n`, wrapped.
    pub fn advance(self, seq: u16, n: u32) -> u16 {
        ((u32::from(seq) + n % self.max_seq) % self.max_seq) as u16
    }

    /// `seq + 1`, wrapped.
    pub fn successor(self, seq: u16) -> u16 {
        self.advance(seq, 1)
    }

    /// `seq - 1`, wrapped.
    pub fn predecessor(self, seq: u16) -> u16 {
        self.advance(seq, self.max_seq - 1)
    }

    /// Steps needed to walk forward from `from` to `to`.
    pub fn distance(self, from: u16, to: u16) -> u32 {
        (u32::from(to) + self.max_seq - u32::from(from)) % self.max_seq
    }

    /// `true` when `seq` lies on the circular path `first ..= last`.
    pub fn in_range(self, seq: u16, first: u16, last: u16) -> bool {
        self.distance(first, seq) <= self.distance(first, last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_widths() {
        assert!(SeqSpace::new(0).is_none());
        assert!(SeqSpace::new(17).is_none());
        assert_eq!(SeqSpace::new(16).unwrap().max_seq(), 65_536);
        assert_eq!(SeqSpace::new(3).unwrap().max_seq(), 8);
    }

    #[test]
    fn successor_wraps() {
        let s = SeqSpace::new(3).unwrap();
        assert_eq!(s.successor(6), 7);
        assert_eq!(s.successor(7), 0);
        assert_eq!(s.predecessor(0), 7);

        let wide = SeqSpace::new(16).unwrap();
        assert_eq!(wide.successor(u16::MAX), 0);
        assert_eq!(wide.predecessor(0), u16::MAX);
    }

    #[test]
    fn distance_across_zero() {
        let s = SeqSpace::new(3).unwrap();
        assert_eq!(s.distance(6, 1), 3);
        assert_eq!(s.distance(1, 6), 5);
        assert_eq!(s.distance(4, 4), 0);
    }

    #[test]
    fn in_range_plain_and_wrapped() {
        let s = SeqSpace::new(3).unwrap();
        // Plain: [2, 5]
        assert!(s.in_range(2, 2, 5));
        assert!(s.in_range(5, 2, 5));
        assert!(!s.in_range(6, 2, 5));
        assert!(!s.in_range(1, 2, 5));
        // Wrapped: [6, 1]
        for seq in [6, 7, 0, 1] {
            assert!(s.in_range(seq, 6, 1), "{seq} should be inside [6, 1]");
        }
        for seq in [2, 3, 4, 5] {
            assert!(!s.in_range(seq, 6, 1), "{seq} should be outside [6, 1]");
        }
    }

    #[test]
    fn contains_checks_width() {
        let s = SeqSpace::new(3).unwrap();
        assert!(s.contains(7));
        assert!(!s.contains(8));
    }
}
