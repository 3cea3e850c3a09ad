//! rtpq CLI Library
//!
//! Shared functionality for the rtpq command-line tools.

pub mod config;
pub mod sim;
pub mod stats;

pub use config::{Config, ConfigError, NackConfig, QueueConfig, SimulationConfig};
pub use sim::{run, LossyLink, Packetizer, SimReport};
pub use stats::{display_report, format_bytes, format_duration};
