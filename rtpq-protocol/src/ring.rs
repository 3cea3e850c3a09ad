//! Circular packet store indexed by sequence number
//!
//! For UDP the receive window looks like this:
//!
//! ```text
//! [seq1(done) | seq2 | seq3 ... seq10 | seq11(lost) | seq12 | seq13]
//!               \__ low                  \__ in the nack list  \__ high
//! ```
//!
//! `low` is the oldest sequence number not yet handed out as part of a frame,
//! `high` the newest one seen. Once everything is consumed `low == high + 1`.
//! Each slot owns at most one packet; overwriting or removing a slot is the
//! only way a packet leaves the buffer.

use crate::packet::MediaPacket;
use crate::sequence::{SeqNumber, SeqRange, HALF_SPACE};
use thiserror::Error;

/// Ring buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Invalid capacity {0}, must be between 1 and {max}", max = HALF_SPACE / 2)]
    InvalidCapacity(usize),

    #[error("Stale sequence {seq}, window starts at {low}")]
    Stale { seq: SeqNumber, low: SeqNumber },
}

/// Fixed-capacity circular packet store
pub struct RingBuffer<P> {
    /// Packet slots, `seq & mask`
    slots: Vec<Option<P>>,
    /// Buffer capacity (power of 2 so slot indices stay consistent across the wrap)
    capacity: usize,
    /// Mask for fast modulo
    mask: usize,
    /// Times the 16-bit sequence flipped back past zero
    flip_backs: u32,
    /// Set by the first update, there is no spare value to mark "unset"
    initialized: bool,
    low: SeqNumber,
    high: SeqNumber,
}

impl<P: MediaPacket> RingBuffer<P> {
    /// Create a ring buffer
    ///
    /// The capacity is rounded up to a power of 2 and must stay well below
    /// half the sequence space.
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 || capacity.next_power_of_two() > HALF_SPACE / 2 {
            return Err(RingError::InvalidCapacity(capacity));
        }
        let capacity = capacity.next_power_of_two();

        Ok(RingBuffer {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
            mask: capacity - 1,
            flip_backs: 0,
            initialized: false,
            low: SeqNumber::default(),
            high: SeqNumber::default(),
        })
    }

    #[inline]
    fn index(&self, seq: SeqNumber) -> usize {
        seq.as_raw() as usize & self.mask
    }

    /// Oldest sequence number still tracked
    pub fn low(&self) -> SeqNumber {
        self.low
    }

    /// Newest sequence number seen
    pub fn high(&self) -> SeqNumber {
        self.high
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the first packet has been seen
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Times the sequence number wrapped
    pub fn flip_backs(&self) -> u32 {
        self.flip_backs
    }

    /// Sequence numbers in `[low, high]`, zero once everything is consumed
    pub fn span(&self) -> usize {
        if !self.initialized {
            return 0;
        }
        (self.low.distance_to(self.high) + 1).max(0) as usize
    }

    /// Store a packet, returning (and releasing ownership of) the previous occupant
    pub fn set(&mut self, seq: SeqNumber, packet: P) -> Option<P> {
        let idx = self.index(seq);
        self.slots[idx].replace(packet)
    }

    /// Empty the slot of `seq` without touching the window
    pub fn remove(&mut self, seq: SeqNumber) -> Option<P> {
        let idx = self.index(seq);
        self.slots[idx].take()
    }

    /// Empty the slot of `seq` only if it holds that exact sequence number
    pub fn take(&mut self, seq: SeqNumber) -> Option<P> {
        let idx = self.index(seq);
        match &self.slots[idx] {
            Some(packet) if packet.sequence() == seq => self.slots[idx].take(),
            _ => None,
        }
    }

    /// Raw occupant of the slot for `seq`
    ///
    /// After a wrap this may be a packet with a different sequence number,
    /// use [`RingBuffer::get`] for a checked lookup.
    pub fn at(&self, seq: SeqNumber) -> Option<&P> {
        self.slots[self.index(seq)].as_ref()
    }

    /// Occupant of the slot for `seq` if it really is that packet
    pub fn get(&self, seq: SeqNumber) -> Option<&P> {
        self.at(seq).filter(|packet| packet.sequence() == seq)
    }

    /// The window no longer fits the slots, `low` must be advanced
    pub fn overflow(&self) -> bool {
        self.initialized && self.low.distance_to(self.high) >= self.capacity as i32
    }

    /// More than half of the slots are spanned by the window
    pub fn is_heavy(&self) -> bool {
        self.initialized && self.low.distance_to(self.high) >= (self.capacity / 2) as i32
    }

    /// Move the start of the window
    pub fn advance_to(&mut self, seq: SeqNumber) {
        self.low = seq;
    }

    /// Admit a sequence number into the window
    ///
    /// Returns the range of sequence numbers that became missing, if any.
    /// While `startup` is set a packet older than `low` extends the window
    /// backwards, since the first packet seen need not be the first sent. The
    /// extension is refused once it would span half the slots.
    pub fn update(
        &mut self,
        seq: SeqNumber,
        startup: bool,
    ) -> Result<Option<SeqRange>, RingError> {
        if !self.initialized {
            self.initialized = true;
            self.low = seq;
            self.high = seq;
            return Ok(None);
        }

        if self.high.precedes(seq) {
            let missing = SeqRange::between(self.high, seq);
            // ahead of high yet numerically smaller, the sequence flipped back
            if seq.as_raw() < self.high.as_raw() {
                self.flip_backs = self.flip_backs.wrapping_add(1);
            }
            self.high = seq;
            return Ok(missing);
        }

        if seq.precedes(self.low) {
            if startup && seq.distance_to(self.high) < (self.capacity / 2) as i32 {
                let missing = SeqRange::between(seq, self.low);
                self.low = seq;
                return Ok(missing);
            }
            return Err(RingError::Stale { seq, low: self.low });
        }

        Ok(None)
    }

    /// First sequence number at or after `from`, up to `high`, whose packet is accepted
    pub fn find_from(&self, from: SeqNumber, accept: impl Fn(&P) -> bool) -> Option<SeqNumber> {
        if !self.initialized {
            return None;
        }

        let mut seq = from;
        while seq.le(self.high) {
            if self.get(seq).is_some_and(&accept) {
                return Some(seq);
            }
            seq.increment();
        }
        None
    }

    /// First frame start strictly after `low`
    pub fn next_start_of_frame(&self) -> Option<SeqNumber> {
        self.find_start_of_frame(self.low.next())
    }

    /// First keyframe start strictly after `low`
    pub fn next_keyframe(&self) -> Option<SeqNumber> {
        self.find_keyframe(self.low.next())
    }

    /// First frame start at or after `from`, up to `high`
    pub fn find_start_of_frame(&self, from: SeqNumber) -> Option<SeqNumber> {
        self.find_from(from, |packet| packet.is_frame_start())
    }

    /// First keyframe start at or after `from`, up to `high`
    pub fn find_keyframe(&self, from: SeqNumber) -> Option<SeqNumber> {
        self.find_from(from, |packet| packet.is_frame_start() && packet.is_keyframe())
    }

    /// Highest sequence number widened by the flip-back count
    pub fn get_extended_highest_sequence(&self) -> u32 {
        (self.flip_backs << 16) | u32::from(self.high.as_raw())
    }
}
