//! RTP Receive Queue Core
//!
//! This crate implements the receive side of an RTP stream: circular
//! sequence ordering, NACK retransmission tracking, the packet ring buffer
//! with frame reassembly, and the statistics behind receiver reports.

pub mod nack;
pub mod packet;
pub mod queue;
pub mod ring;
pub mod sequence;
pub mod stats;

pub use nack::{NackEvent, NackForReceiver, NackInfo, NackOption};
pub use packet::{Frame, MediaPacket, PacketBoundary, RtpPacket};
pub use queue::{QueueError, QueueOptions, RtpQueue};
pub use ring::{RingBuffer, RingError};
pub use sequence::{precedes, SeqNumber, SeqRange};
pub use stats::{ReceiverStats, StatsSnapshot};
