//! Loopback simulation of a lossy RTP link
//!
//! A producer thread packetizes synthetic video frames and pushes them through
//! a lossy, reordering link into a channel. The receiver thread feeds the
//! channel into an [`RtpQueue`]. A maintenance thread plays the receiver's
//! timer: it expires missing packets, answers nacks from the sender history
//! and forwards keyframe requests back to the producer.

use crate::config::{Config, SimulationConfig};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use rtpq::protocol::{
    Frame, PacketBoundary, QueueError, RtpPacket, RtpQueue, SeqNumber, StatsSnapshot,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sender history, indexed by raw sequence number
type History = Arc<Mutex<HashMap<u16, RtpPacket>>>;

/// Splits synthetic frames into RTP packets
pub struct Packetizer {
    next_seq: SeqNumber,
    ssrc: u32,
    packets_per_frame: u16,
    clock_rate: u32,
    fps: u32,
    payload: Bytes,
}

impl Packetizer {
    /// Create a packetizer starting at the configured sequence number
    pub fn new(sim: &SimulationConfig, clock_rate: u32) -> Self {
        Packetizer {
            next_seq: SeqNumber::new(sim.start_seq),
            ssrc: 0x5254_5051,
            packets_per_frame: sim.packets_per_frame.max(1),
            clock_rate,
            fps: sim.fps.max(1),
            payload: Bytes::from(vec![0u8; sim.payload_size]),
        }
    }

    /// Packets of frame number `index`
    pub fn frame(&mut self, index: u32, keyframe: bool) -> Vec<RtpPacket> {
        let timestamp =
            (u64::from(index) * u64::from(self.clock_rate) / u64::from(self.fps)) as u32;
        let count = self.packets_per_frame;

        let mut packets = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            let boundary = match (i == 0, i + 1 == count) {
                (true, true) => PacketBoundary::Solo,
                (true, false) => PacketBoundary::First,
                (false, true) => PacketBoundary::Last,
                (false, false) => PacketBoundary::Subsequent,
            };
            packets.push(
                RtpPacket::new(self.next_seq, timestamp, self.payload.clone())
                    .with_boundary(boundary)
                    .with_keyframe(keyframe)
                    .with_ssrc(self.ssrc),
            );
            self.next_seq.increment();
        }
        packets
    }
}

/// Deterministic loss and reordering
pub struct LossyLink {
    loss_every: u64,
    reorder_every: u64,
    sent: u64,
    swapped: u64,
    lost: u64,
}

impl LossyLink {
    /// Create a link; a period of 0 disables that impairment
    pub fn new(loss_every: u32, reorder_every: u32) -> Self {
        LossyLink {
            loss_every: u64::from(loss_every),
            reorder_every: u64::from(reorder_every),
            sent: 0,
            swapped: 0,
            lost: 0,
        }
    }

    /// Packets that make it across, in arrival order
    pub fn transmit(&mut self, packets: Vec<RtpPacket>) -> Vec<RtpPacket> {
        let mut out = Vec::with_capacity(packets.len());
        for packet in packets {
            self.sent += 1;
            if self.loss_every > 0 && self.sent % self.loss_every == 0 {
                debug!(seq = %packet.seq, "link lost packet");
                self.lost += 1;
                continue;
            }
            out.push(packet);
        }

        if self.reorder_every > 0 {
            let mut i = 0;
            while i + 1 < out.len() {
                self.swapped += 1;
                if self.swapped % self.reorder_every == 0 {
                    out.swap(i, i + 1);
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }
        out
    }

    /// Packets dropped so far
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

/// Outcome of one simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub packets_lost_on_link: u64,
    pub nacks_sent: u64,
    pub retransmissions: u64,
    pub rejected: u64,
    pub frames_collected: u64,
    pub keyframes_collected: u64,
    pub bytes_collected: u64,
    pub keyframe_requests: u64,
    pub dropped_packets: u64,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub interarrival_jitter: u32,
    pub extended_highest_sequence: u32,
    pub stats: StatsSnapshot,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Default)]
struct ProducerTally {
    frames: u64,
    packets: u64,
    lost: u64,
}

#[derive(Default)]
struct ReceiverTally {
    frames: u64,
    keyframes: u64,
    bytes: u64,
    rejected: u64,
}

impl ReceiverTally {
    fn record(&mut self, frame: &Frame<RtpPacket>) {
        self.frames += 1;
        if frame.is_keyframe() {
            self.keyframes += 1;
        }
        self.bytes += frame.payload_size() as u64;
    }
}

#[derive(Default)]
struct TickerTally {
    nacks: u64,
    retransmissions: u64,
    keyframe_requests: u64,
}

/// Run the simulation to completion
pub fn run(config: &Config) -> anyhow::Result<SimReport> {
    config.validate()?;
    let sim = config.simulation.clone();
    let options = config.queue.options();

    let mut queue = RtpQueue::new(options)?;
    queue.update_rtt(sim.rtt_ms);
    let queue = Arc::new(Mutex::new(queue));

    let history: History = Arc::new(Mutex::new(HashMap::new()));
    let want_keyframe = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let (tx, rx) = channel::unbounded::<RtpPacket>();

    info!(
        frames = sim.frames,
        packets_per_frame = sim.packets_per_frame,
        capacity = queue.lock().capacity(),
        "simulation starting"
    );
    let start = Instant::now();

    let receiver = {
        let queue = queue.clone();
        thread::Builder::new()
            .name("rtpq-receiver".into())
            .spawn(move || receive_loop(rx, queue))?
    };

    let ticker = {
        let tx = tx.clone();
        let queue = queue.clone();
        let history = history.clone();
        let want_keyframe = want_keyframe.clone();
        let done = done.clone();
        let tick = sim.tick();
        thread::Builder::new()
            .name("rtpq-ticker".into())
            .spawn(move || maintenance_loop(tx, queue, history, want_keyframe, done, tick))?
    };

    let producer = {
        let sim = sim.clone();
        let clock_rate = options.clock_rate;
        thread::Builder::new()
            .name("rtpq-producer".into())
            .spawn(move || produce_loop(tx, &sim, clock_rate, history, want_keyframe))?
    };

    let produced = producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;

    // let the last round of retransmissions land
    let drain = options.nack.first_nack_interval
        + sim.tick() * 4
        + Duration::from_millis(u64::from(sim.rtt_ms) * 2 + 20);
    debug!(drain_ms = drain.as_millis() as u64, "producer finished, draining");
    thread::sleep(drain);
    done.store(true, Ordering::Release);

    let maintained = ticker
        .join()
        .map_err(|_| anyhow::anyhow!("maintenance thread panicked"))?;
    let received = receiver
        .join()
        .map_err(|_| anyhow::anyhow!("receiver thread panicked"))?;

    let mut queue = queue.lock();
    let report = SimReport {
        frames_sent: produced.frames,
        packets_sent: produced.packets,
        packets_lost_on_link: produced.lost,
        nacks_sent: maintained.nacks,
        retransmissions: maintained.retransmissions,
        rejected: received.rejected,
        frames_collected: received.frames,
        keyframes_collected: received.keyframes,
        bytes_collected: received.bytes,
        keyframe_requests: maintained.keyframe_requests,
        dropped_packets: queue.nn_dropped_packets(),
        fraction_lost: queue.get_fraction_lost(),
        cumulative_lost: queue.get_cumulative_number_of_packets_lost(),
        interarrival_jitter: queue.get_interarrival_jitter(),
        extended_highest_sequence: queue.get_extended_highest_sequence(),
        stats: queue.stats(),
        elapsed: start.elapsed(),
    };

    info!(
        frames_sent = report.frames_sent,
        frames_collected = report.frames_collected,
        retransmissions = report.retransmissions,
        "simulation finished"
    );
    Ok(report)
}

fn produce_loop(
    tx: Sender<RtpPacket>,
    sim: &SimulationConfig,
    clock_rate: u32,
    history: History,
    want_keyframe: Arc<AtomicBool>,
) -> ProducerTally {
    let mut packetizer = Packetizer::new(sim, clock_rate);
    let mut link = LossyLink::new(sim.loss_every, sim.reorder_every);
    let interval = sim.frame_interval();
    let mut tally = ProducerTally::default();
    let mut deadline = Instant::now();

    for index in 0..sim.frames {
        let requested = want_keyframe.swap(false, Ordering::AcqRel);
        let keyframe = index == 0 || (sim.gop > 0 && index % sim.gop == 0) || requested;
        if requested {
            debug!(frame = index, "sending keyframe on request");
        }

        let packets = packetizer.frame(index, keyframe);
        tally.packets += packets.len() as u64;
        {
            let mut history = history.lock();
            for packet in &packets {
                history.insert(packet.seq.as_raw(), packet.clone());
            }
        }

        for packet in link.transmit(packets) {
            if tx.send(packet).is_err() {
                warn!("receiver hung up");
                tally.lost = link.lost();
                return tally;
            }
        }
        tally.frames += 1;

        deadline += interval;
        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    tally.lost = link.lost();
    tally
}

fn receive_loop(rx: Receiver<RtpPacket>, queue: Arc<Mutex<RtpQueue>>) -> ReceiverTally {
    let mut tally = ReceiverTally::default();
    let mut frames = Vec::new();

    for packet in rx.iter() {
        let packet = packet.with_arrival(Instant::now());
        let seq = packet.seq;
        {
            let mut queue = queue.lock();
            match queue.insert(packet) {
                Ok(()) => {}
                Err(QueueError::InvalidSequence { low, .. }) => {
                    debug!(seq = %seq, low = %low, "packet rejected");
                    tally.rejected += 1;
                }
                Err(err) => warn!(seq = %seq, error = %err, "insert failed"),
            }
            queue.get_and_clean_collected_frames(&mut frames);
        }
        for frame in frames.drain(..) {
            tally.record(&frame);
        }
    }

    // frames completed by the last maintenance pass
    queue.lock().get_and_clean_collected_frames(&mut frames);
    for frame in frames.drain(..) {
        tally.record(&frame);
    }
    tally
}

fn maintenance_loop(
    tx: Sender<RtpPacket>,
    queue: Arc<Mutex<RtpQueue>>,
    history: History,
    want_keyframe: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    tick: Duration,
) -> TickerTally {
    let mut tally = TickerTally::default();
    let mut nacks = Vec::new();

    while !done.load(Ordering::Acquire) {
        thread::sleep(tick);
        let now = Instant::now();
        nacks.clear();
        {
            let mut queue = queue.lock();
            match queue.check_queue_size(now) {
                Ok(0) => {}
                Ok(expired) => debug!(expired, "gave up on missing packets"),
                Err(err) => warn!(error = %err, "queue maintenance failed"),
            }
            queue.get_nack_seqs(now, &mut nacks);
            if queue.get_and_clean_if_needed_request_key_frame() {
                tally.keyframe_requests += 1;
                want_keyframe.store(true, Ordering::Release);
            }
        }

        if nacks.is_empty() {
            continue;
        }
        tally.nacks += nacks.len() as u64;
        debug!(count = nacks.len(), first = nacks[0], "sending nack");

        let history = history.lock();
        for seq in &nacks {
            let Some(packet) = history.get(seq) else {
                continue;
            };
            if tx.send(packet.clone()).is_err() {
                return tally;
            }
            tally.retransmissions += 1;
        }
    }
    tally
}
