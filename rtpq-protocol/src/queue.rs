//! Receive queue for one RTP stream
//!
//! Ties the ring buffer, the nack tracker and the receiver statistics
//! together. Every arriving packet goes through [`RtpQueue::insert`], which
//! places it in the ring, registers new gaps for retransmission and hands
//! out every frame that became complete. Maintenance (`check_queue_size`,
//! `get_nack_seqs`) is driven by the caller's timer.
//!
//! The queue is single-writer: one stream, one execution context, no locks.

use crate::nack::{NackEvent, NackForReceiver, NackInfo, NackOption};
use crate::packet::{Frame, MediaPacket, RtpPacket};
use crate::ring::{RingBuffer, RingError};
use crate::sequence::{SeqNumber, SeqRange};
use crate::stats::{ReceiverStats, StatsSnapshot};
use std::collections::TryReserveError;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Default ring capacity in packets
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default media clock, video RTP runs at 90kHz
pub const DEFAULT_CLOCK_RATE: u32 = 90_000;

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid sequence {seq}, window starts at {low}")]
    InvalidSequence { seq: SeqNumber, low: SeqNumber },

    #[error("Allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("Ring buffer error: {0}")]
    Ring(RingError),
}

impl From<RingError> for QueueError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Stale { seq, low } => QueueError::InvalidSequence { seq, low },
            other => QueueError::Ring(other),
        }
    }
}

/// Queue construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Ring capacity in packets, rounded up to a power of 2
    pub capacity: usize,
    /// Every packet is a frame of its own (audio)
    pub one_packet_per_frame: bool,
    /// Media clock rate in Hz, the unit of jitter
    pub clock_rate: u32,
    /// Retransmission request policy
    pub nack: NackOption,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            capacity: DEFAULT_CAPACITY,
            one_packet_per_frame: false,
            clock_rate: DEFAULT_CLOCK_RATE,
            nack: NackOption::default(),
        }
    }
}

/// Outcome of scanning for a frame at the head of the window
enum FrameScan {
    /// Frame from the head through this sequence number is present
    Complete(SeqNumber),
    /// This sequence number is missing
    Missing(SeqNumber),
    /// Head packet does not start a frame
    HeadNotStart,
    /// Everything up to `high` is present but the frame has not ended
    Open,
}

/// Loss recovery and frame reassembly for one RTP stream
pub struct RtpQueue<P = RtpPacket> {
    queue: RingBuffer<P>,
    nack: NackForReceiver,
    stats: ReceiverStats,
    clock_rate: u32,
    one_packet_per_frame: bool,
    nn_collected_frames: u64,
    nn_dropped_packets: u64,
    /// The window has moved forward at least once
    started: bool,
    frames: Vec<Frame<P>>,
    request_key_frame: bool,
}

impl<P: MediaPacket> RtpQueue<P> {
    /// Create a queue
    ///
    /// The nack tracker holds up to two thirds of the ring capacity.
    pub fn new(opts: QueueOptions) -> Result<Self, QueueError> {
        let queue = RingBuffer::new(opts.capacity)?;
        let nack = NackForReceiver::new(queue.capacity() * 2 / 3, opts.nack);

        Ok(RtpQueue {
            queue,
            nack,
            stats: ReceiverStats::new(),
            clock_rate: opts.clock_rate,
            one_packet_per_frame: opts.one_packet_per_frame,
            nn_collected_frames: 0,
            nn_dropped_packets: 0,
            started: false,
            frames: Vec::new(),
            request_key_frame: false,
        })
    }

    /// Accept one packet
    ///
    /// Stale and duplicate packets are rejected with
    /// [`QueueError::InvalidSequence`]; the stream carries on either way.
    pub fn insert(&mut self, packet: P) -> Result<(), QueueError> {
        let seq = packet.sequence();
        let now = packet.arrival();

        if self.queue.get(seq).is_some() {
            debug!(seq = %seq, "drop duplicate packet");
            return Err(QueueError::InvalidSequence {
                seq,
                low: self.queue.low(),
            });
        }

        // until the window first moves we may still see older packets
        let missing = match self.queue.update(seq, !self.started) {
            Ok(missing) => missing,
            Err(err) => {
                debug!(seq = %seq, low = %self.queue.low(), "drop stale packet");
                return Err(err.into());
            }
        };

        if let Some(info) = self.nack.remove(seq) {
            self.on_recovered(seq, &info, now);
        }
        if let Some(range) = missing {
            self.insert_into_nack_list(range, now);
        }

        if self.queue.overflow() {
            self.recover_overflow();
        }
        self.dispatch_nack_events()?;

        if seq.precedes(self.queue.low()) {
            debug!(seq = %seq, low = %self.queue.low(), "packet fell out of the window");
            return Err(QueueError::InvalidSequence {
                seq,
                low: self.queue.low(),
            });
        }

        self.stats.on_received();
        self.stats
            .update_jitter(packet.timestamp(), now, self.clock_rate);

        if let Some(stale) = self.queue.set(seq, packet) {
            trace!(seq = %stale.sequence(), "released stale slot occupant");
        }
        trace!(seq = %seq, low = %self.queue.low(), high = %self.queue.high(), "packet stored");

        self.collect_packet()
    }

    fn on_recovered(&mut self, seq: SeqNumber, info: &NackInfo, now: Instant) {
        self.stats.on_recovered();
        let since_request = info
            .pre_req_nack_time
            .map(|prev| now.saturating_duration_since(prev).as_millis() as u64);
        trace!(
            seq = %seq,
            requests = info.req_nack_count,
            since_request_ms = ?since_request,
            "missing packet recovered"
        );
    }

    fn insert_into_nack_list(&mut self, range: SeqRange, now: Instant) {
        trace!(start = %range.start, end = %range.end, "new loss range");
        for seq in range.iter() {
            self.nack.insert(seq, now);
        }
        self.stats.on_lost(range.len() as u64);
    }

    fn dispatch_nack_events(&mut self) -> Result<(), QueueError> {
        let mut overflow = false;
        for event in self.nack.drain_events() {
            match event {
                NackEvent::Dropped(seq) => self.notify_drop_seq(seq)?,
                NackEvent::Overflow(_) => overflow = true,
            }
        }
        if overflow {
            self.notify_nack_list_full();
        }
        Ok(())
    }

    fn is_frame_start(&self, packet: &P) -> bool {
        self.one_packet_per_frame || packet.is_frame_start()
    }

    /// Release everything in `[low, target)` and move `low` to `target`
    fn drop_until(&mut self, target: SeqNumber) -> u64 {
        let low = self.queue.low();
        if !low.precedes(target) {
            return 0;
        }

        let mut dropped = 0;
        let mut seq = low;
        while seq.precedes(target) {
            if self.queue.take(seq).is_some() {
                dropped += 1;
            }
            seq.increment();
        }

        let cancelled = self.nack.remove_up_to(target.prev());
        self.queue.advance_to(target);
        self.nn_dropped_packets += dropped;
        self.started = true;

        if dropped > 0 || cancelled > 0 {
            debug!(
                from = %low,
                to = %target,
                dropped,
                cancelled,
                "dropped packets from window"
            );
        }
        dropped
    }

    /// Force the window back within capacity
    fn recover_overflow(&mut self) {
        let high = self.queue.high();
        let floor = high - (self.queue.capacity() - 1) as u16;
        let target = self
            .queue
            .find_from(floor, |packet| self.is_frame_start(packet))
            .unwrap_or(high);

        warn!(
            low = %self.queue.low(),
            high = %high,
            to = %target,
            "ring buffer overflow, forcing window forward"
        );
        self.drop_until(target);

        if !self.one_packet_per_frame {
            self.request_key_frame = true;
        }
    }

    fn scan_frame(&self) -> FrameScan {
        let low = self.queue.low();
        let high = self.queue.high();
        let mut seq = low;

        while seq.le(high) {
            let Some(packet) = self.queue.get(seq) else {
                return FrameScan::Missing(seq);
            };

            if self.one_packet_per_frame {
                return FrameScan::Complete(seq);
            }

            if seq == low {
                if !packet.is_frame_start() {
                    return FrameScan::HeadNotStart;
                }
            } else if packet.is_frame_start() {
                return FrameScan::Complete(seq.prev());
            }

            if packet.is_frame_end() {
                return FrameScan::Complete(seq);
            }
            seq.increment();
        }

        FrameScan::Open
    }

    fn next_frame_start(&self) -> Option<SeqNumber> {
        self.queue
            .find_from(self.queue.low().next(), |packet| self.is_frame_start(packet))
    }

    /// Move every complete frame at the head of the window to the pending list
    fn collect_packet(&mut self) -> Result<(), QueueError> {
        while self.queue.span() > 0 {
            match self.scan_frame() {
                FrameScan::Complete(last) => self.emit_frame(last)?,
                FrameScan::Missing(seq) if self.nack.find(seq).is_none() => {
                    // nobody is waiting for it any more
                    let low = self.queue.low();
                    self.drop_seq(seq);
                    if self.queue.low() == low {
                        break;
                    }
                }
                FrameScan::Missing(seq) => {
                    if !self.queue.is_heavy() {
                        break;
                    }
                    let Some(next) = self.next_frame_start() else {
                        break;
                    };
                    warn!(
                        missing = %seq,
                        low = %self.queue.low(),
                        high = %self.queue.high(),
                        "window heavy, giving up on head frame"
                    );
                    self.skip_to(next);
                }
                FrameScan::HeadNotStart => {
                    let Some(next) = self.next_frame_start() else {
                        break;
                    };
                    debug!(low = %self.queue.low(), next = %next, "skip partial frame at head");
                    self.drop_until(next);
                }
                FrameScan::Open => break,
            }
        }
        Ok(())
    }

    fn emit_frame(&mut self, last: SeqNumber) -> Result<(), QueueError> {
        let first = self.queue.low();
        let len = (first.distance_to(last) + 1) as usize;

        self.frames.try_reserve(1)?;
        let mut packets = Vec::new();
        packets.try_reserve_exact(len)?;

        let mut seq = first;
        loop {
            if let Some(packet) = self.queue.take(seq) {
                packets.push(packet);
            }
            if seq == last {
                break;
            }
            seq.increment();
        }
        self.queue.advance_to(last.next());
        self.started = true;

        if let Some(frame) = Frame::new(packets) {
            trace!(
                first = %first,
                last = %last,
                keyframe = frame.is_keyframe(),
                "frame collected"
            );
            self.frames.push(frame);
            self.nn_collected_frames += 1;
        }
        Ok(())
    }

    /// Drop up to a frame start, asking for a keyframe unless it is one
    fn skip_to(&mut self, target: SeqNumber) {
        let keyframe = self
            .queue
            .get(target)
            .is_some_and(|packet| packet.is_frame_start() && packet.is_keyframe());
        self.drop_until(target);

        if !self.one_packet_per_frame && !keyframe {
            self.request_key_frame = true;
        }
    }

    /// `seq` will never arrive, move past the frame it belongs to
    ///
    /// Complete frames ahead of `seq` are collected first, and so are the
    /// frames the move unblocks.
    pub fn notify_drop_seq(&mut self, seq: SeqNumber) -> Result<(), QueueError> {
        self.collect_packet()?;
        self.drop_seq(seq);
        self.collect_packet()
    }

    fn drop_seq(&mut self, seq: SeqNumber) {
        if !self.queue.is_initialized()
            || seq.precedes(self.queue.low())
            || self.queue.high().precedes(seq)
        {
            return;
        }

        if self.one_packet_per_frame {
            self.drop_until(seq.next());
            return;
        }

        let target = self
            .queue
            .find_start_of_frame(seq.next())
            .unwrap_or(self.queue.high());
        debug!(seq = %seq, low = %self.queue.low(), to = %target, "nack drop");
        self.skip_to(target);
    }

    /// The nack list overflowed, recovery is no longer feasible
    ///
    /// Moves the window to the next keyframe and asks for a new one.
    pub fn notify_nack_list_full(&mut self) {
        if !self.queue.is_initialized() || self.one_packet_per_frame {
            return;
        }

        let target = self.queue.next_keyframe().unwrap_or(self.queue.high());
        debug!(low = %self.queue.low(), to = %target, "nack list full");
        self.drop_until(target);
        self.request_key_frame = true;
    }

    /// Ask the caller to request a keyframe upstream
    pub fn request_keyframe(&mut self) {
        self.request_key_frame = true;
    }

    /// Move out every frame collected so far
    pub fn get_and_clean_collected_frames(&mut self, frames: &mut Vec<Frame<P>>) {
        frames.append(&mut self.frames);
    }

    /// Read and reset the keyframe request flag
    pub fn get_and_clean_if_needed_request_key_frame(&mut self) -> bool {
        std::mem::take(&mut self.request_key_frame)
    }

    /// Periodic maintenance, expires nack entries that ran out of budget
    ///
    /// Returns the number of sequence numbers given up on.
    pub fn check_queue_size(&mut self, now: Instant) -> Result<usize, QueueError> {
        let expired = self.nack.check_queue_size(now);
        self.dispatch_nack_events()?;
        self.collect_packet()?;
        Ok(expired)
    }

    /// Sequence numbers to request for retransmission now
    pub fn get_nack_seqs(&mut self, now: Instant, seqs: &mut Vec<u16>) {
        self.nack.get_nack_seqs(now, seqs);
    }

    /// Feed a round-trip time sample in milliseconds
    pub fn update_rtt(&mut self, rtt_ms: u32) {
        self.nack.update_rtt(rtt_ms);
    }

    /// Highest sequence number including wrap count
    pub fn get_extended_highest_sequence(&self) -> u32 {
        self.queue.get_extended_highest_sequence()
    }

    /// Loss fraction since the previous call, 8-bit fixed point
    pub fn get_fraction_lost(&mut self) -> u8 {
        self.stats.fraction_lost()
    }

    /// Packets lost since the start of the stream
    pub fn get_cumulative_number_of_packets_lost(&self) -> u32 {
        self.stats.cumulative_lost()
    }

    /// Interarrival jitter in media clock units
    pub fn get_interarrival_jitter(&self) -> u32 {
        self.stats.interarrival_jitter()
    }

    /// Copy of the receiver counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Frames handed out so far
    pub fn nn_collected_frames(&self) -> u64 {
        self.nn_collected_frames
    }

    /// Packets released without being handed out
    pub fn nn_dropped_packets(&self) -> u64 {
        self.nn_dropped_packets
    }

    /// Frames waiting to be drained
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Start of the window
    pub fn low(&self) -> SeqNumber {
        self.queue.low()
    }

    /// Newest sequence number seen
    pub fn high(&self) -> SeqNumber {
        self.queue.high()
    }

    /// Sequence numbers awaiting retransmission
    pub fn nack_len(&self) -> usize {
        self.nack.len()
    }

    /// Whether `seq` is awaiting retransmission
    pub fn is_nacked(&self, seq: SeqNumber) -> bool {
        self.nack.find(seq).is_some()
    }

    /// Ring capacity in packets
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
