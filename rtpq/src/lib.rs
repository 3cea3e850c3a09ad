//! rtpq - RTP receive queue
//!
//! High-level entry point for receive-side loss recovery and frame
//! reassembly of RTP streams.

pub use rtpq_protocol as protocol;

// Re-export commonly used types
pub use protocol::{
    Frame, MediaPacket, NackOption, PacketBoundary, QueueError, QueueOptions, RtpPacket, RtpQueue,
    SeqNumber,
};
