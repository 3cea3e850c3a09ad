//! Media packet and frame containers
//!
//! The receive queue never parses wire bytes. It works against the
//! [`MediaPacket`] accessors, which any already-decoded RTP packet type can
//! implement. [`RtpPacket`] is the stock implementation used by the tools and
//! tests in this workspace.

use crate::sequence::SeqNumber;
use bytes::Bytes;
use std::time::Instant;

/// Position of a packet inside its media frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketBoundary {
    /// Middle packet of a multi-packet frame
    #[default]
    Subsequent,
    /// Last packet of a multi-packet frame (RTP marker bit)
    Last,
    /// First packet of a multi-packet frame
    First,
    /// Frame carried in a single packet
    Solo,
}

impl PacketBoundary {
    /// Whether a frame begins with this packet
    #[inline]
    pub fn is_start(self) -> bool {
        matches!(self, PacketBoundary::First | PacketBoundary::Solo)
    }

    /// Whether a frame ends with this packet
    #[inline]
    pub fn is_end(self) -> bool {
        matches!(self, PacketBoundary::Last | PacketBoundary::Solo)
    }
}

/// Accessors the receive queue needs from an incoming packet
pub trait MediaPacket {
    /// RTP sequence number
    fn sequence(&self) -> SeqNumber;

    /// First packet of a frame
    fn is_frame_start(&self) -> bool;

    /// Last packet of a frame (marker bit)
    fn is_frame_end(&self) -> bool;

    /// Packet belongs to a key/sync frame
    fn is_keyframe(&self) -> bool;

    /// Media clock timestamp
    fn timestamp(&self) -> u32;

    /// Local arrival time
    fn arrival(&self) -> Instant;
}

/// Decoded RTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Sequence number
    pub seq: SeqNumber,
    /// Media clock timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Frame boundary flags
    pub boundary: PacketBoundary,
    /// Keyframe indicator
    pub keyframe: bool,
    /// Time the packet was received
    pub arrival: Instant,
    /// Payload bytes
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a new packet received now
    pub fn new(seq: SeqNumber, timestamp: u32, payload: Bytes) -> Self {
        RtpPacket {
            seq,
            timestamp,
            ssrc: 0,
            boundary: PacketBoundary::default(),
            keyframe: false,
            arrival: Instant::now(),
            payload,
        }
    }

    /// Set the frame boundary
    pub fn with_boundary(mut self, boundary: PacketBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Mark the packet as part of a keyframe
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// Override the arrival time
    pub fn with_arrival(mut self, arrival: Instant) -> Self {
        self.arrival = arrival;
        self
    }

    /// Set the synchronization source
    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = ssrc;
        self
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl MediaPacket for RtpPacket {
    fn sequence(&self) -> SeqNumber {
        self.seq
    }

    fn is_frame_start(&self) -> bool {
        self.boundary.is_start()
    }

    fn is_frame_end(&self) -> bool {
        self.boundary.is_end()
    }

    fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    fn timestamp(&self) -> u32 {
        self.timestamp
    }

    fn arrival(&self) -> Instant {
        self.arrival
    }
}

/// A complete media frame, packets in sequence order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<P> {
    packets: Vec<P>,
}

impl<P: MediaPacket> Frame<P> {
    /// Build a frame from contiguous packets; `None` if empty
    pub fn new(packets: Vec<P>) -> Option<Self> {
        if packets.is_empty() {
            None
        } else {
            Some(Frame { packets })
        }
    }

    /// Sequence number of the first packet
    pub fn first_seq(&self) -> SeqNumber {
        self.packets[0].sequence()
    }

    /// Sequence number of the last packet
    pub fn last_seq(&self) -> SeqNumber {
        self.packets[self.packets.len() - 1].sequence()
    }

    /// Whether decoding can restart at this frame
    pub fn is_keyframe(&self) -> bool {
        self.packets[0].is_keyframe()
    }

    /// Media timestamp of the frame
    pub fn timestamp(&self) -> u32 {
        self.packets[0].timestamp()
    }

    /// Number of packets
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Frames are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Borrow the packets
    pub fn packets(&self) -> &[P] {
        &self.packets
    }

    /// Take ownership of the packets
    pub fn into_packets(self) -> Vec<P> {
        self.packets
    }
}

impl Frame<RtpPacket> {
    /// Total payload size of the frame
    pub fn payload_size(&self) -> usize {
        self.packets.iter().map(RtpPacket::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16, boundary: PacketBoundary) -> RtpPacket {
        RtpPacket::new(SeqNumber::new(seq), 0, Bytes::from_static(b"data")).with_boundary(boundary)
    }

    #[test]
    fn test_boundary_flags() {
        assert!(PacketBoundary::Solo.is_start());
        assert!(PacketBoundary::Solo.is_end());
        assert!(PacketBoundary::First.is_start());
        assert!(!PacketBoundary::First.is_end());
        assert!(PacketBoundary::Last.is_end());
        assert!(!PacketBoundary::Subsequent.is_start());
        assert!(!PacketBoundary::Subsequent.is_end());
    }

    #[test]
    fn test_media_packet_accessors() {
        let pkt = packet(42, PacketBoundary::First).with_keyframe(true);

        assert_eq!(pkt.sequence(), SeqNumber::new(42));
        assert!(pkt.is_frame_start());
        assert!(!pkt.is_frame_end());
        assert!(pkt.is_keyframe());
    }

    #[test]
    fn test_frame_bounds() {
        let frame = Frame::new(vec![
            packet(10, PacketBoundary::First).with_keyframe(true),
            packet(11, PacketBoundary::Subsequent),
            packet(12, PacketBoundary::Last),
        ])
        .unwrap();

        assert_eq!(frame.first_seq(), SeqNumber::new(10));
        assert_eq!(frame.last_seq(), SeqNumber::new(12));
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.payload_size(), 12);
        assert!(frame.is_keyframe());
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(Frame::<RtpPacket>::new(Vec::new()).is_none());
    }
}
