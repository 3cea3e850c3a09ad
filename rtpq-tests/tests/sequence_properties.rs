//! Property-based tests for circular sequence ordering
//!
//! These tests use proptest to check that the 16-bit circular order behaves
//! like a strict order for every pair of points within half the circle.

use proptest::prelude::*;
use rtpq_protocol::sequence::{precedes, SeqNumber, SeqRange, HALF_SPACE};

fn seq_number_strategy() -> impl Strategy<Value = SeqNumber> {
    any::<u16>().prop_map(SeqNumber::new)
}

/// Distance strictly inside half the circle
fn forward_distance_strategy() -> impl Strategy<Value = u16> {
    1..(HALF_SPACE as u16)
}

proptest! {
    #[test]
    fn precedes_is_irreflexive(a in any::<u16>()) {
        prop_assert!(!precedes(a, a));
    }

    #[test]
    fn precedes_is_antisymmetric(a in any::<u16>(), b in any::<u16>()) {
        prop_assume!(b.wrapping_sub(a) as usize != HALF_SPACE);
        if a == b {
            prop_assert!(!precedes(a, b) && !precedes(b, a));
        } else {
            prop_assert!(precedes(a, b) != precedes(b, a));
        }
    }

    #[test]
    fn forward_steps_come_after(a in seq_number_strategy(), d in forward_distance_strategy()) {
        let b = a + d;
        prop_assert!(a.precedes(b));
        prop_assert!(b.gt(a));
        prop_assert!(a.lt(b));
        prop_assert!(!b.le(a));
        prop_assert_eq!(a.distance_to(b), i32::from(d));
        prop_assert_eq!(b.distance_to(a), -i32::from(d));
    }

    #[test]
    fn distance_lands_on_target(a in seq_number_strategy(), b in seq_number_strategy()) {
        let d = a.distance_to(b);
        prop_assert_eq!(a + d as u16, b);
    }

    #[test]
    fn next_and_prev_are_inverse(a in seq_number_strategy()) {
        prop_assert_eq!(a.next().prev(), a);
        prop_assert!(a.precedes(a.next()));
        prop_assert!(a.prev().precedes(a));
    }

    #[test]
    fn gap_range_covers_skipped_numbers(a in seq_number_strategy(), skipped in 0u16..1000) {
        let after_gap = a + (skipped + 1);
        match SeqRange::between(a, after_gap) {
            None => prop_assert_eq!(skipped, 0),
            Some(range) => {
                prop_assert_eq!(range.len(), usize::from(skipped));
                prop_assert_eq!(range.start, a.next());
                prop_assert_eq!(range.end, after_gap.prev());
                prop_assert!(!range.contains(a));
                prop_assert!(!range.contains(after_gap));
                prop_assert_eq!(range.iter().count(), usize::from(skipped));
            }
        }
    }
}

#[test]
fn test_ordering_vectors() {
    assert!(precedes(3, 5));
    assert!(!precedes(5, 3));
    assert!(precedes(65535, 0));
    assert!(!precedes(0, 65535));
    assert!(precedes(65530, 4));
    assert!(precedes(0, 32767));
    // exactly half way round is ahead of neither
    assert!(!precedes(0, 32768));
    assert!(!precedes(32768, 0));
}

#[test]
fn test_sort_across_wrap() {
    let mut seqs: Vec<SeqNumber> = [2u16, 65534, 0, 65535, 1]
        .into_iter()
        .map(SeqNumber::new)
        .collect();
    seqs.sort_by(|a, b| 0.cmp(&a.distance_to(*b)));

    let raw: Vec<u16> = seqs.iter().map(|s| s.as_raw()).collect();
    assert_eq!(raw, vec![65534, 65535, 0, 1, 2]);
}
