//! NACK tracking for the receiver
//!
//! Keeps the set of sequence numbers known to be missing and decides when a
//! retransmission request should go out for each. Entries leave the set when
//! the packet arrives, when they run out of retry budget, or when the set is
//! full and the oldest one has to make room.
//!
//! The tracker never calls back into its owner. Expiry and overflow are queued
//! as [`NackEvent`]s and drained by the caller.

use crate::sequence::{SeqNumber, HALF_SPACE};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Lower bound for the RTT-driven request interval
pub const MIN_NACK_INTERVAL: Duration = Duration::from_millis(10);

/// Retransmission request policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackOption {
    /// Maximum requests per missing sequence number
    pub max_count: u32,
    /// Give up on a sequence number after this long
    pub max_alive_time: Duration,
    /// Delay before the first request, absorbs plain reordering
    pub first_nack_interval: Duration,
    /// Spacing between requests until an RTT sample arrives
    pub nack_interval: Duration,
}

impl Default for NackOption {
    fn default() -> Self {
        NackOption {
            max_count: 10,
            max_alive_time: Duration::from_secs(2),
            first_nack_interval: Duration::from_millis(10),
            nack_interval: Duration::from_millis(400),
        }
    }
}

/// Request state of one missing sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackInfo {
    /// When the gap was first observed
    pub generate_time: Instant,
    /// When the last request went out, `None` before the first one
    pub pre_req_nack_time: Option<Instant>,
    /// Requests sent so far
    pub req_nack_count: u32,
}

impl NackInfo {
    fn new(now: Instant) -> Self {
        NackInfo {
            generate_time: now,
            pre_req_nack_time: None,
            req_nack_count: 0,
        }
    }

    /// Time since the gap was observed
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.generate_time)
    }
}

/// Notification for the owner of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackEvent {
    /// Retry budget exhausted, the packet is permanently lost
    Dropped(SeqNumber),
    /// Evicted to keep the tracked set bounded
    Overflow(SeqNumber),
}

/// Missing-packet tracker for one RTP stream
///
/// Entries are kept oldest to newest by circular sequence order. Lookups are
/// a binary search on the distance from the oldest entry, which is a total
/// order as long as every entry lies within half the sequence space of it.
#[derive(Debug)]
pub struct NackForReceiver {
    queue: VecDeque<(SeqNumber, NackInfo)>,
    max_queue_size: usize,
    opts: NackOption,
    nack_interval: Duration,
    rtt: Option<Duration>,
    events: Vec<NackEvent>,
}

impl NackForReceiver {
    /// Create a tracker holding at most `max_queue_size` entries
    pub fn new(max_queue_size: usize, opts: NackOption) -> Self {
        NackForReceiver {
            queue: VecDeque::new(),
            max_queue_size: max_queue_size.clamp(1, HALF_SPACE - 1),
            nack_interval: opts.nack_interval,
            opts,
            rtt: None,
            events: Vec::new(),
        }
    }

    fn position(&self, seq: SeqNumber) -> Result<usize, usize> {
        let Some(&(front, _)) = self.queue.front() else {
            return Err(0);
        };

        let offset = front.distance_to(seq);
        if offset < 0 {
            return Err(0);
        }

        self.queue
            .binary_search_by_key(&offset, |(s, _)| front.distance_to(*s))
    }

    /// Start tracking a missing sequence number
    ///
    /// Returns `false` if it was already tracked. When the set grows past its
    /// limit the oldest entry is evicted and reported as [`NackEvent::Overflow`].
    pub fn insert(&mut self, seq: SeqNumber, now: Instant) -> bool {
        let idx = match self.position(seq) {
            Ok(_) => return false,
            Err(idx) => idx,
        };
        self.queue.insert(idx, (seq, NackInfo::new(now)));

        while self.queue.len() > self.max_queue_size {
            if let Some((oldest, _)) = self.queue.pop_front() {
                debug!(seq = %oldest, size = self.max_queue_size, "nack list full, evicting");
                self.events.push(NackEvent::Overflow(oldest));
            }
        }

        true
    }

    /// Stop tracking a sequence number, the packet arrived
    pub fn remove(&mut self, seq: SeqNumber) -> Option<NackInfo> {
        let idx = self.position(seq).ok()?;
        self.queue.remove(idx).map(|(_, info)| info)
    }

    /// Stop tracking everything up to and including `seq`
    ///
    /// Returns how many entries were cancelled. No events are raised.
    pub fn remove_up_to(&mut self, seq: SeqNumber) -> usize {
        let mut removed = 0;
        while let Some(&(front, _)) = self.queue.front() {
            if !front.le(seq) {
                break;
            }
            self.queue.pop_front();
            removed += 1;
        }
        removed
    }

    /// Look up a tracked sequence number
    pub fn find(&self, seq: SeqNumber) -> Option<&NackInfo> {
        let idx = self.position(seq).ok()?;
        self.queue.get(idx).map(|(_, info)| info)
    }

    /// Expire entries that are too old or out of requests
    ///
    /// Each expired entry is reported once as [`NackEvent::Dropped`]. Returns
    /// the number of entries expired.
    pub fn check_queue_size(&mut self, now: Instant) -> usize {
        let opts = self.opts;
        let interval = self.nack_interval;
        let events = &mut self.events;
        let before = self.queue.len();

        self.queue.retain(|(seq, info)| {
            let too_old = info.age(now) > opts.max_alive_time;
            let exhausted = info.req_nack_count >= opts.max_count
                && info
                    .pre_req_nack_time
                    .map_or(true, |prev| now.saturating_duration_since(prev) >= interval);

            if too_old || exhausted {
                debug!(
                    seq = %seq,
                    count = info.req_nack_count,
                    age_ms = info.age(now).as_millis() as u64,
                    "nack expired"
                );
                events.push(NackEvent::Dropped(*seq));
                false
            } else {
                true
            }
        });

        before - self.queue.len()
    }

    /// Collect the sequence numbers due for a (re)request
    ///
    /// Appends in sequence order and records the request on each entry.
    pub fn get_nack_seqs(&mut self, now: Instant, seqs: &mut Vec<u16>) {
        let opts = self.opts;
        let interval = self.nack_interval;

        for (seq, info) in self.queue.iter_mut() {
            if info.req_nack_count >= opts.max_count || info.age(now) > opts.max_alive_time {
                continue;
            }

            let due = match info.pre_req_nack_time {
                None => info.age(now) >= opts.first_nack_interval,
                Some(prev) => now.saturating_duration_since(prev) >= interval,
            };

            if due {
                info.pre_req_nack_time = Some(now);
                info.req_nack_count += 1;
                trace!(seq = %seq, count = info.req_nack_count, "nack request");
                seqs.push(seq.as_raw());
            }
        }
    }

    /// Feed a round-trip time sample in milliseconds
    ///
    /// The request interval follows the RTT, bounded below by
    /// [`MIN_NACK_INTERVAL`] and above by the entry lifetime.
    pub fn update_rtt(&mut self, rtt_ms: u32) {
        let rtt = Duration::from_millis(u64::from(rtt_ms));
        let ceiling = self.opts.max_alive_time.max(MIN_NACK_INTERVAL);
        self.rtt = Some(rtt);
        self.nack_interval = rtt.clamp(MIN_NACK_INTERVAL, ceiling);
    }

    /// Take the pending notifications
    pub fn drain_events(&mut self) -> Vec<NackEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sequence numbers currently tracked, oldest first
    pub fn seqs(&self) -> impl Iterator<Item = SeqNumber> + '_ {
        self.queue.iter().map(|(seq, _)| *seq)
    }

    /// Current request interval
    pub fn nack_interval(&self) -> Duration {
        self.nack_interval
    }

    /// Last RTT sample
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Policy in use
    pub fn options(&self) -> &NackOption {
        &self.opts
    }

    /// Maximum number of tracked entries
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop all entries without raising events
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn opts(max_count: u32, interval_ms: u64) -> NackOption {
        NackOption {
            max_count,
            max_alive_time: Duration::from_secs(2),
            first_nack_interval: ms(10),
            nack_interval: ms(interval_ms),
        }
    }

    fn seq(v: u16) -> SeqNumber {
        SeqNumber::new(v)
    }

    #[test]
    fn test_default_option() {
        let opts = NackOption::default();
        assert_eq!(opts.max_count, 10);
        assert_eq!(opts.max_alive_time, Duration::from_secs(2));
        assert_eq!(opts.first_nack_interval, ms(10));
        assert_eq!(opts.nack_interval, ms(400));
    }

    #[test]
    fn test_insert_find_remove() {
        let now = Instant::now();
        let mut nack = NackForReceiver::new(16, NackOption::default());

        assert!(nack.insert(seq(10), now));
        assert!(!nack.insert(seq(10), now + ms(5)));
        assert_eq!(nack.len(), 1);

        let info = nack.find(seq(10)).unwrap();
        assert_eq!(info.generate_time, now);
        assert_eq!(info.req_nack_count, 0);
        assert!(info.pre_req_nack_time.is_none());

        assert!(nack.remove(seq(10)).is_some());
        assert!(nack.remove(seq(10)).is_none());
        assert!(nack.remove(seq(99)).is_none());
        assert!(nack.find(seq(10)).is_none());
        assert!(nack.is_empty());
    }

    #[test]
    fn test_circular_order() {
        let now = Instant::now();
        let mut nack = NackForReceiver::new(16, NackOption::default());

        for v in [0u16, 65535, 1, 65534] {
            nack.insert(seq(v), now);
        }

        let order: Vec<u16> = nack.seqs().map(SeqNumber::as_raw).collect();
        assert_eq!(order, vec![65534, 65535, 0, 1]);

        let mut out = Vec::new();
        nack.get_nack_seqs(now + ms(10), &mut out);
        assert_eq!(out, vec![65534, 65535, 0, 1]);
    }

    #[test]
    fn test_first_nack_interval() {
        let t0 = Instant::now();
        let mut nack = NackForReceiver::new(16, opts(10, 100));
        nack.insert(seq(5), t0);

        let mut out = Vec::new();
        nack.get_nack_seqs(t0 + ms(9), &mut out);
        assert!(out.is_empty());

        nack.get_nack_seqs(t0 + ms(10), &mut out);
        assert_eq!(out, vec![5]);

        let info = nack.find(seq(5)).unwrap();
        assert_eq!(info.req_nack_count, 1);
        assert_eq!(info.pre_req_nack_time, Some(t0 + ms(10)));
    }

    #[test]
    fn test_request_spacing_and_expiry() {
        let t0 = Instant::now();
        let mut nack = NackForReceiver::new(16, opts(3, 100));
        nack.insert(seq(7), t0);

        let mut requests = 0;
        for step in 1..=40u64 {
            let mut out = Vec::new();
            nack.get_nack_seqs(t0 + ms(step * 10), &mut out);
            requests += out.len();
        }
        // at 10ms, 110ms and 210ms, then the budget is spent
        assert_eq!(requests, 3);
        assert_eq!(nack.find(seq(7)).unwrap().req_nack_count, 3);

        // the last request has not aged past the interval yet
        assert_eq!(nack.check_queue_size(t0 + ms(250)), 0);
        assert!(nack.drain_events().is_empty());

        assert_eq!(nack.check_queue_size(t0 + ms(310)), 1);
        assert_eq!(nack.drain_events(), vec![NackEvent::Dropped(seq(7))]);

        assert_eq!(nack.check_queue_size(t0 + ms(400)), 0);
        assert!(nack.drain_events().is_empty());
    }

    #[test]
    fn test_max_alive_time_expiry() {
        let t0 = Instant::now();
        let mut nack = NackForReceiver::new(16, NackOption::default());
        nack.insert(seq(1), t0);
        nack.insert(seq(2), t0 + ms(500));

        assert_eq!(nack.check_queue_size(t0 + ms(2000)), 0);
        assert_eq!(nack.check_queue_size(t0 + ms(2001)), 1);
        assert_eq!(nack.drain_events(), vec![NackEvent::Dropped(seq(1))]);

        let mut out = Vec::new();
        nack.get_nack_seqs(t0 + ms(2600), &mut out);
        assert!(out.is_empty(), "expired-by-age entries are never requested");
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let now = Instant::now();
        let mut nack = NackForReceiver::new(3, NackOption::default());

        for v in 100..103 {
            nack.insert(seq(v), now);
        }
        assert!(nack.drain_events().is_empty());

        nack.insert(seq(103), now);
        assert_eq!(nack.len(), 3);
        assert!(nack.find(seq(100)).is_none());
        assert_eq!(nack.drain_events(), vec![NackEvent::Overflow(seq(100))]);
    }

    #[test]
    fn test_remove_up_to() {
        let now = Instant::now();
        let mut nack = NackForReceiver::new(16, NackOption::default());
        for v in [65533u16, 65535, 2, 4] {
            nack.insert(seq(v), now);
        }

        assert_eq!(nack.remove_up_to(seq(2)), 3);
        let left: Vec<u16> = nack.seqs().map(SeqNumber::as_raw).collect();
        assert_eq!(left, vec![4]);
        assert_eq!(nack.remove_up_to(seq(3)), 0);
    }

    #[test]
    fn test_update_rtt_drives_interval() {
        let t0 = Instant::now();
        let mut nack = NackForReceiver::new(16, opts(10, 400));
        nack.update_rtt(50);
        assert_eq!(nack.nack_interval(), ms(50));
        assert_eq!(nack.rtt(), Some(ms(50)));

        nack.insert(seq(9), t0);
        let mut out = Vec::new();
        nack.get_nack_seqs(t0 + ms(10), &mut out);
        nack.get_nack_seqs(t0 + ms(59), &mut out);
        assert_eq!(out.len(), 1);
        nack.get_nack_seqs(t0 + ms(60), &mut out);
        assert_eq!(out.len(), 2);

        nack.update_rtt(0);
        assert_eq!(nack.nack_interval(), MIN_NACK_INTERVAL);
        nack.update_rtt(60_000);
        assert_eq!(nack.nack_interval(), Duration::from_secs(2));
    }
}
