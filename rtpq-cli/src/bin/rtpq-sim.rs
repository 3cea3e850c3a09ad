//! rtpq Simulator - Receive queue over a lossy loopback link
//!
//! Sends synthetic video frames through a lossy, reordering link into an
//! RTP receive queue, answers its nacks, and prints the receiver report.

use clap::Parser;
use rtpq_cli::{display_report, run, Config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtpq-sim")]
#[command(about = "RTP receive queue simulator", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    dump_config: bool,

    /// Frames to send
    #[arg(short, long)]
    frames: Option<u32>,

    /// Packets per frame
    #[arg(short = 'p', long)]
    packets_per_frame: Option<u16>,

    /// Keyframe interval in frames
    #[arg(long)]
    gop: Option<u32>,

    /// Frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Lose every Nth packet (0 disables)
    #[arg(long)]
    loss_every: Option<u32>,

    /// Swap every Nth packet with its successor (0 disables)
    #[arg(long)]
    reorder_every: Option<u32>,

    /// Ring capacity in packets
    #[arg(long)]
    capacity: Option<usize>,

    /// Treat every packet as a frame (audio)
    #[arg(long)]
    audio: bool,

    /// Maintenance timer period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Print the report as TOML
    #[arg(long)]
    toml: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        let sim = &mut config.simulation;
        if let Some(frames) = self.frames {
            sim.frames = frames;
        }
        if let Some(packets) = self.packets_per_frame {
            sim.packets_per_frame = packets;
        }
        if let Some(gop) = self.gop {
            sim.gop = gop;
        }
        if let Some(fps) = self.fps {
            sim.fps = fps;
        }
        if let Some(loss_every) = self.loss_every {
            sim.loss_every = loss_every;
        }
        if let Some(reorder_every) = self.reorder_every {
            sim.reorder_every = reorder_every;
        }
        if let Some(tick_ms) = self.tick_ms {
            sim.tick_ms = tick_ms;
        }
        if let Some(capacity) = self.capacity {
            config.queue.capacity = capacity;
        }
        if self.audio {
            config.queue.one_packet_per_frame = true;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dump_config {
        print!("{}", Config::example().to_toml()?);
        return Ok(());
    }

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    let report = run(&config)?;

    if args.toml {
        print!("{}", toml::to_string_pretty(&report)?);
    } else {
        display_report(&report, config.queue.clock_rate);
    }
    Ok(())
}
