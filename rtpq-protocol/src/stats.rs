//! Receiver report statistics
//!
//! Counters behind an RTCP receiver report block: packets received, packets
//! lost (per reporting interval and cumulative) and the RFC 3550 interarrival
//! jitter estimate.

use serde::Serialize;
use std::time::Instant;

/// Largest value the 24-bit cumulative-lost report field can carry
pub const MAX_CUMULATIVE_LOST: u32 = 0x7F_FFFF;

/// Running receiver statistics for one stream
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    received: u64,
    /// Gap sequence numbers detected minus those that arrived late
    lost: i64,
    received_prior: u64,
    lost_prior: i64,
    /// Jitter in media clock units
    jitter: f64,
    last_transit: Option<i32>,
    /// Arrival of the first packet, origin of the arrival clock
    base_arrival: Option<Instant>,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_lost: i64,
    pub jitter: f64,
    pub last_transit: Option<i32>,
}

impl ReceiverStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// One packet accepted
    pub fn on_received(&mut self) {
        self.received += 1;
    }

    /// `count` sequence numbers found missing
    pub fn on_lost(&mut self, count: u64) {
        self.lost = self.lost.saturating_add(count as i64);
    }

    /// A sequence number counted as lost arrived after all
    pub fn on_recovered(&mut self) {
        self.lost -= 1;
    }

    /// Feed the arrival of a packet into the jitter estimate
    ///
    /// Arrival time is converted to media clock units so that the transit
    /// time `arrival - timestamp` is in the same units as the timestamp.
    pub fn update_jitter(&mut self, timestamp: u32, arrival: Instant, clock_rate: u32) {
        let base = *self.base_arrival.get_or_insert(arrival);
        let elapsed_us = arrival.saturating_duration_since(base).as_micros();
        let arrival_units = (elapsed_us * u128::from(clock_rate) / 1_000_000) as u32;
        let transit = arrival_units.wrapping_sub(timestamp) as i32;

        if let Some(last) = self.last_transit {
            let d = f64::from(transit.wrapping_sub(last).unsigned_abs());
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    /// Fraction of packets lost since the previous call, scaled to 0-255
    ///
    /// Closes the current reporting interval.
    pub fn fraction_lost(&mut self) -> u8 {
        let lost_interval = self.lost - self.lost_prior;
        let received_interval = (self.received - self.received_prior) as i64;
        let expected_interval = lost_interval + received_interval;

        self.lost_prior = self.lost;
        self.received_prior = self.received;

        if lost_interval <= 0 || expected_interval <= 0 {
            return 0;
        }
        ((lost_interval << 8) / expected_interval).min(255) as u8
    }

    /// Packets lost since the stream started, clamped to the report field
    pub fn cumulative_lost(&self) -> u32 {
        self.lost.clamp(0, i64::from(MAX_CUMULATIVE_LOST)) as u32
    }

    /// Interarrival jitter in media clock units
    pub fn interarrival_jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Unrounded jitter estimate
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Packets accepted so far
    pub fn packets_received(&self) -> u64 {
        self.received
    }

    /// Transit time of the last packet
    pub fn last_transit(&self) -> Option<i32> {
        self.last_transit
    }

    /// Copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.received,
            packets_lost: self.lost,
            jitter: self.jitter,
            last_transit: self.last_transit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_jitter_single_update() {
        let t0 = Instant::now();
        let mut stats = ReceiverStats::new();

        // millisecond clock: 20 units of media time took 30ms to arrive
        stats.update_jitter(0, t0, 1000);
        assert_eq!(stats.jitter(), 0.0);
        stats.update_jitter(20, t0 + Duration::from_millis(30), 1000);

        assert!((stats.jitter() - 10.0 / 16.0).abs() < 1e-9);
        assert_eq!(stats.last_transit(), Some(10));
    }

    #[test]
    fn test_jitter_zero_for_steady_stream() {
        let t0 = Instant::now();
        let mut stats = ReceiverStats::new();

        for i in 0..50u32 {
            stats.update_jitter(i * 3000, t0 + Duration::from_micros(u64::from(i) * 33_333), 90_000);
        }
        assert!(stats.jitter() < 1.0);
        assert_eq!(stats.interarrival_jitter(), 0);
    }

    #[test]
    fn test_jitter_across_timestamp_wrap() {
        let t0 = Instant::now();
        let mut stats = ReceiverStats::new();

        stats.update_jitter(u32::MAX - 9, t0, 1000);
        stats.update_jitter(10, t0 + Duration::from_millis(20), 1000);
        assert_eq!(stats.jitter(), 0.0);
    }

    #[test]
    fn test_fraction_lost_interval() {
        let mut stats = ReceiverStats::new();
        for _ in 0..3 {
            stats.on_received();
        }
        stats.on_lost(1);

        // 1 of 4 expected
        assert_eq!(stats.fraction_lost(), 64);
        // nothing happened since
        assert_eq!(stats.fraction_lost(), 0);

        stats.on_received();
        assert_eq!(stats.fraction_lost(), 0);
    }

    #[test]
    fn test_recovery_reduces_loss() {
        let mut stats = ReceiverStats::new();
        stats.on_received();
        stats.on_lost(2);
        assert_eq!(stats.cumulative_lost(), 2);

        stats.on_recovered();
        stats.on_received();
        assert_eq!(stats.cumulative_lost(), 1);
        assert_eq!(stats.snapshot().packets_received, 2);
    }

    #[test]
    fn test_fraction_lost_saturates() {
        let mut stats = ReceiverStats::new();
        stats.on_lost(10);
        assert_eq!(stats.fraction_lost(), 255);
    }
}
