//! Configuration file support for the rtpq tools

use rtpq::protocol::{NackOption, QueueOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Retransmission request policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackConfig {
    /// Requests per missing packet before giving up
    #[serde(default = "default_max_count")]
    pub max_count: u32,
    /// Lifetime of a missing packet in milliseconds
    #[serde(default = "default_max_alive_time")]
    pub max_alive_time_ms: u64,
    /// Delay before the first request in milliseconds
    #[serde(default = "default_first_nack_interval")]
    pub first_nack_interval_ms: u64,
    /// Spacing between requests in milliseconds until an RTT is known
    #[serde(default = "default_nack_interval")]
    pub nack_interval_ms: u64,
}

fn default_max_count() -> u32 {
    10
}

fn default_max_alive_time() -> u64 {
    2000
}

fn default_first_nack_interval() -> u64 {
    10
}

fn default_nack_interval() -> u64 {
    400
}

impl Default for NackConfig {
    fn default() -> Self {
        NackConfig {
            max_count: default_max_count(),
            max_alive_time_ms: default_max_alive_time(),
            first_nack_interval_ms: default_first_nack_interval(),
            nack_interval_ms: default_nack_interval(),
        }
    }
}

impl NackConfig {
    /// Convert to tracker options
    pub fn option(&self) -> NackOption {
        NackOption {
            max_count: self.max_count,
            max_alive_time: Duration::from_millis(self.max_alive_time_ms),
            first_nack_interval: Duration::from_millis(self.first_nack_interval_ms),
            nack_interval: Duration::from_millis(self.nack_interval_ms),
        }
    }
}

/// Receive queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Ring capacity in packets
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Every packet is a frame (audio)
    #[serde(default)]
    pub one_packet_per_frame: bool,
    /// Media clock rate in Hz
    #[serde(default = "default_clock_rate")]
    pub clock_rate: u32,
    /// Nack policy
    #[serde(default)]
    pub nack: NackConfig,
}

fn default_capacity() -> usize {
    rtpq::protocol::queue::DEFAULT_CAPACITY
}

fn default_clock_rate() -> u32 {
    rtpq::protocol::queue::DEFAULT_CLOCK_RATE
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: default_capacity(),
            one_packet_per_frame: false,
            clock_rate: default_clock_rate(),
            nack: NackConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Convert to queue options
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            capacity: self.capacity,
            one_packet_per_frame: self.one_packet_per_frame,
            clock_rate: self.clock_rate,
            nack: self.nack.option(),
        }
    }
}

/// Simulated link and media source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Frames to send
    #[serde(default = "default_frames")]
    pub frames: u32,
    /// Packets per frame
    #[serde(default = "default_packets_per_frame")]
    pub packets_per_frame: u16,
    /// Keyframe every N frames
    #[serde(default = "default_gop")]
    pub gop: u32,
    /// Frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Lose every Nth packet on first transmission, 0 disables
    #[serde(default)]
    pub loss_every: u32,
    /// Swap every Nth packet with its successor, 0 disables
    #[serde(default)]
    pub reorder_every: u32,
    /// Maintenance timer period in milliseconds
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
    /// Round-trip time reported to the queue in milliseconds
    #[serde(default = "default_rtt")]
    pub rtt_ms: u32,
    /// Sequence number of the first packet
    #[serde(default)]
    pub start_seq: u16,
    /// Payload size of each packet
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

fn default_frames() -> u32 {
    300
}

fn default_packets_per_frame() -> u16 {
    4
}

fn default_gop() -> u32 {
    60
}

fn default_fps() -> u32 {
    60
}

fn default_tick() -> u64 {
    10
}

fn default_rtt() -> u32 {
    40
}

fn default_payload_size() -> usize {
    1200
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            frames: default_frames(),
            packets_per_frame: default_packets_per_frame(),
            gop: default_gop(),
            fps: default_fps(),
            loss_every: 0,
            reorder_every: 0,
            tick_ms: default_tick(),
            rtt_ms: default_rtt(),
            start_seq: 0,
            payload_size: default_payload_size(),
        }
    }
}

impl SimulationConfig {
    /// Get frame interval as Duration
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.fps.max(1)))
    }

    /// Get maintenance period as Duration
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Simulation configuration
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as TOML text
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create example configuration for a lossy video link
    pub fn example() -> Self {
        Config {
            queue: QueueConfig::default(),
            simulation: SimulationConfig {
                loss_every: 50,
                reorder_every: 17,
                ..SimulationConfig::default()
            },
        }
    }

    /// Reject values the queue or simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_capacity = rtpq::protocol::sequence::HALF_SPACE / 2;
        if self.queue.capacity == 0 || self.queue.capacity > max_capacity {
            return Err(ConfigError::Invalid(format!(
                "queue.capacity must be in 1..={}, got {}",
                max_capacity, self.queue.capacity
            )));
        }
        if self.queue.clock_rate == 0 {
            return Err(ConfigError::Invalid("queue.clock_rate must be positive".into()));
        }
        if self.simulation.packets_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "simulation.packets_per_frame must be positive".into(),
            ));
        }
        if self.simulation.fps == 0 {
            return Err(ConfigError::Invalid("simulation.fps must be positive".into()));
        }
        if self.simulation.tick_ms == 0 {
            return Err(ConfigError::Invalid("simulation.tick_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
