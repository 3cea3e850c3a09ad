//! Integration tests for the retransmission request policy

use rtpq_protocol::nack::{NackEvent, NackForReceiver, NackOption, MIN_NACK_INTERVAL};
use rtpq_protocol::sequence::SeqNumber;
use std::time::{Duration, Instant};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn tracker(max_count: u32) -> NackForReceiver {
    NackForReceiver::new(
        64,
        NackOption {
            max_count,
            ..NackOption::default()
        },
    )
}

#[test]
fn test_default_policy() {
    let opts = NackOption::default();
    assert_eq!(opts.max_count, 10);
    assert_eq!(opts.max_alive_time, ms(2000));
    assert_eq!(opts.first_nack_interval, ms(10));
    assert_eq!(opts.nack_interval, ms(400));
}

#[test]
fn test_requests_stop_after_max_count() {
    let t0 = Instant::now();
    let mut nack = tracker(2);
    nack.update_rtt(50);
    nack.insert(SeqNumber::new(7), t0);

    let mut requested = 0;
    let mut seqs = Vec::new();
    for step in 1..=20u64 {
        seqs.clear();
        nack.get_nack_seqs(t0 + ms(step * 10), &mut seqs);
        requested += seqs.len();
    }
    assert_eq!(requested, 2);

    // one interval after the last request the entry is given up
    assert_eq!(nack.check_queue_size(t0 + ms(200)), 1);
    assert_eq!(nack.drain_events(), vec![NackEvent::Dropped(SeqNumber::new(7))]);
    assert!(nack.is_empty());
}

#[test]
fn test_entries_expire_by_age() {
    let t0 = Instant::now();
    let mut nack = tracker(10);

    nack.insert(SeqNumber::new(1), t0);
    nack.insert(SeqNumber::new(2), t0 + ms(1500));

    assert_eq!(nack.check_queue_size(t0 + ms(2000)), 0);
    assert_eq!(nack.check_queue_size(t0 + ms(2001)), 1);
    assert_eq!(nack.drain_events(), vec![NackEvent::Dropped(SeqNumber::new(1))]);
    assert!(nack.find(SeqNumber::new(2)).is_some());
}

#[test]
fn test_remove_is_idempotent() {
    let t0 = Instant::now();
    let mut nack = tracker(10);

    assert!(nack.insert(SeqNumber::new(5), t0));
    assert!(!nack.insert(SeqNumber::new(5), t0));
    assert!(nack.remove(SeqNumber::new(5)).is_some());
    assert!(nack.remove(SeqNumber::new(5)).is_none());
    assert!(nack.drain_events().is_empty());
}

#[test]
fn test_rtt_bounds_request_interval() {
    let mut nack = tracker(10);

    nack.update_rtt(0);
    assert_eq!(nack.nack_interval(), MIN_NACK_INTERVAL);

    nack.update_rtt(120);
    assert_eq!(nack.nack_interval(), ms(120));
    assert_eq!(nack.rtt(), Some(ms(120)));

    nack.update_rtt(60_000);
    assert_eq!(nack.nack_interval(), ms(2000));
}

#[test]
fn test_oldest_evicted_when_full() {
    let t0 = Instant::now();
    let mut nack = NackForReceiver::new(3, NackOption::default());

    for seq in [65534u16, 65535, 0, 1] {
        nack.insert(SeqNumber::new(seq), t0);
    }

    assert_eq!(nack.len(), 3);
    assert_eq!(nack.drain_events(), vec![NackEvent::Overflow(SeqNumber::new(65534))]);
    let tracked: Vec<u16> = nack.seqs().map(SeqNumber::as_raw).collect();
    assert_eq!(tracked, vec![65535, 0, 1]);
}
