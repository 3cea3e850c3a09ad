//! Sequence Number Handling
//!
//! RTP uses 16-bit sequence numbers that wrap around. Ordering between two
//! numbers is only meaningful within half of the circle (32768), so every
//! window kept by this crate must stay well below that span.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Half of the 16-bit sequence space; no window may reach this size
pub const HALF_SPACE: usize = 1 << 15;

/// Whether `high` comes strictly after `low` on the 16-bit circle.
///
/// ```
/// use rtpq_protocol::sequence::precedes;
///
/// assert!(precedes(3, 5));
/// assert!(!precedes(3, 65534));
/// assert!(precedes(65532, 65534));
/// ```
#[inline]
pub fn precedes(low: u16, high: u16) -> bool {
    (high.wrapping_sub(low) as i16) > 0
}

/// Sequence number with 16-bit wraparound semantics
///
/// Comparisons are circular: `a.lt(b)` means `b` is ahead of `a` by less than
/// half the sequence space. The derived `Ord` is numeric and must not be used
/// for stream ordering.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNumber(u16);

impl SeqNumber {
    /// Create a new sequence number
    #[inline]
    pub const fn new(value: u16) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Get the previous sequence number
    #[inline]
    pub fn prev(self) -> Self {
        SeqNumber(self.0.wrapping_sub(1))
    }

    /// Signed distance from this sequence number to another
    ///
    /// Positive values mean `other` is ahead of `self`. The result is always
    /// in `-32768..=32767`.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        other.0.wrapping_sub(self.0) as i16 as i32
    }

    /// Whether this sequence number comes strictly before `other`
    #[inline]
    pub fn precedes(self, other: SeqNumber) -> bool {
        precedes(self.0, other.0)
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.precedes(other)
    }

    /// Check if this sequence number is less than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        other.precedes(self)
    }

    /// Check if this sequence number is greater than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNumber {
    fn from(value: u16) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u16 {
    fn from(seq: SeqNumber) -> u16 {
        seq.0
    }
}

impl Add<u16> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<u16> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u16> for SeqNumber {
    fn sub_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_sub(rhs);
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Calculate the signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i32 {
        rhs.distance_to(self)
    }
}

/// Inclusive range of sequence numbers, `start` through `end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqRange {
    /// First sequence number in range
    pub start: SeqNumber,
    /// Last sequence number in range (inclusive)
    pub end: SeqNumber,
}

impl SeqRange {
    /// Create a new range
    pub fn new(start: SeqNumber, end: SeqNumber) -> Self {
        SeqRange { start, end }
    }

    /// Create a single-packet range
    pub fn single(seq: SeqNumber) -> Self {
        SeqRange {
            start: seq,
            end: seq,
        }
    }

    /// Build the range strictly between two sequence numbers, if any
    pub fn between(after: SeqNumber, before: SeqNumber) -> Option<Self> {
        if after.distance_to(before) > 1 {
            Some(SeqRange::new(after.next(), before.prev()))
        } else {
            None
        }
    }

    /// Check if this range contains a sequence number
    pub fn contains(&self, seq: SeqNumber) -> bool {
        seq.ge(self.start) && seq.le(self.end)
    }

    /// Number of sequence numbers covered
    pub fn len(&self) -> usize {
        self.end.as_raw().wrapping_sub(self.start.as_raw()) as usize + 1
    }

    /// A range always covers at least one sequence number
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check if this is a single packet
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    /// Iterate the covered sequence numbers oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = SeqNumber> {
        let start = self.start;
        (0..self.len()).map(move |i| start + i as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedes_vectors() {
        assert!(precedes(3, 5));
        assert!(!precedes(3, 65534));
        assert!(precedes(65532, 65534));
        assert!(!precedes(7, 7));
    }

    #[test]
    fn test_precedes_across_wrap() {
        assert!(precedes(65535, 0));
        assert!(precedes(65530, 10));
        assert!(!precedes(10, 65530));
    }

    #[test]
    fn test_increment_wraparound() {
        let mut seq = SeqNumber::new(u16::MAX);
        seq.increment();
        assert_eq!(seq.as_raw(), 0);
    }

    #[test]
    fn test_prev_wraparound() {
        assert_eq!(SeqNumber::new(0).prev(), SeqNumber::new(u16::MAX));
    }

    #[test]
    fn test_distance_simple() {
        let a = SeqNumber::new(100);
        let b = SeqNumber::new(200);
        assert_eq!(a.distance_to(b), 100);
        assert_eq!(b.distance_to(a), -100);
    }

    #[test]
    fn test_distance_wraparound() {
        let a = SeqNumber::new(u16::MAX - 10);
        let b = SeqNumber::new(10);
        assert_eq!(a.distance_to(b), 21);
        assert_eq!(b.distance_to(a), -21);
    }

    #[test]
    fn test_comparison_wraparound() {
        let a = SeqNumber::new(u16::MAX - 10);
        let b = SeqNumber::new(10);

        assert!(a.lt(b));
        assert!(b.gt(a));
        assert!(a.le(a));
        assert!(a.ge(a));
    }

    #[test]
    fn test_add_sub_wraparound() {
        assert_eq!((SeqNumber::new(u16::MAX - 10) + 20).as_raw(), 9);
        assert_eq!((SeqNumber::new(10) - 20).as_raw(), u16::MAX - 9);
        assert_eq!(SeqNumber::new(5) - SeqNumber::new(u16::MAX), 6);
    }

    #[test]
    fn test_range_between() {
        let range = SeqRange::between(SeqNumber::new(2), SeqNumber::new(4)).unwrap();
        assert_eq!(range, SeqRange::single(SeqNumber::new(3)));

        assert!(SeqRange::between(SeqNumber::new(2), SeqNumber::new(3)).is_none());
        assert!(SeqRange::between(SeqNumber::new(4), SeqNumber::new(2)).is_none());
    }

    #[test]
    fn test_range_iter_across_wrap() {
        let range = SeqRange::new(SeqNumber::new(65534), SeqNumber::new(1));
        let seqs: Vec<u16> = range.iter().map(SeqNumber::as_raw).collect();
        assert_eq!(seqs, vec![65534, 65535, 0, 1]);
        assert_eq!(range.len(), 4);
        assert!(range.contains(SeqNumber::new(0)));
        assert!(!range.contains(SeqNumber::new(2)));
    }
}
