use std::fmt;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Default per-channel buffer capacity: 64 MiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024 * 1024;

/// Default number of samples kept by each rate averager.
pub const DEFAULT_RATE_WINDOW: usize = 5;

/// Default occupancy (percent) at which "buffer filling" warnings start.
pub const DEFAULT_FILL_WARNING_PERCENT: u8 = 5;

/// How inbound packets are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Version 1: no header; raw packet bytes are copied to the bulk channel.
    Legacy,
    /// Version 2: header parsing and bulk/user demultiplexing.
    Demux,
}

impl ProtocolVersion {
    /// Map the numeric version used on the command line.
    pub fn from_number(version: u8) -> Result<Self> {
        match version {
            1 => Ok(Self::Legacy),
            2 => Ok(Self::Demux),
            other => Err(PipelineError::InvalidConfig(format!(
                "unsupported protocol version {other} (expected 1 or 2)"
            ))),
        }
    }

    /// The numeric version.
    pub fn number(self) -> u8 {
        match self {
            Self::Legacy => 1,
            Self::Demux => 2,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Configuration for the demultiplexing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Packet interpretation. Default: demux (version 2).
    pub protocol_version: ProtocolVersion,
    /// Deliver the bulk channel. Default: true.
    pub bulk_enabled: bool,
    /// Deliver the user channel. Default: true.
    pub user_enabled: bool,
    /// Capacity of each channel buffer in bytes. Default: 64 MiB.
    pub buffer_capacity: usize,
    /// Interval between rate samples. Default: 1 s.
    pub stats_period: Duration,
    /// Interval between printed reports. Default: 10 s.
    pub print_period: Duration,
    /// Samples per rate averager window. Default: 5.
    pub rate_window: usize,
    /// Buffer occupancy (percent) that triggers fill warnings. Default: 5.
    pub fill_warning_percent: u8,
    /// Upper bound for a reassembled user message. Default: unbounded.
    pub max_message_size: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::Demux,
            bulk_enabled: true,
            user_enabled: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            stats_period: Duration::from_secs(1),
            print_period: Duration::from_secs(10),
            rate_window: DEFAULT_RATE_WINDOW,
            fill_warning_percent: DEFAULT_FILL_WARNING_PERCENT,
            max_message_size: None,
        }
    }
}

impl PipelineConfig {
    /// Check the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer capacity must be greater than zero"));
        }
        if self.stats_period.is_zero() {
            return Err(invalid("stats period must be greater than zero"));
        }
        if self.print_period.is_zero() {
            return Err(invalid("print period must be greater than zero"));
        }
        if self.rate_window < 2 {
            return Err(invalid("rate window needs at least 2 samples"));
        }
        if !(1..=100).contains(&self.fill_warning_percent) {
            return Err(invalid("fill warning percent must be within 1..=100"));
        }
        if self.max_message_size == Some(0) {
            return Err(invalid("max message size must be greater than zero"));
        }
        if self.protocol_version == ProtocolVersion::Legacy && !self.bulk_enabled {
            return Err(invalid(
                "protocol v1 copies everything to the bulk channel, which is disabled",
            ));
        }
        Ok(())
    }

    /// Whether the user channel takes part in this run.
    ///
    /// Legacy mode never produces user data.
    pub fn user_active(&self) -> bool {
        self.user_enabled && self.protocol_version == ProtocolVersion::Demux
    }
}

fn invalid(msg: &str) -> PipelineError {
    PipelineError::InvalidConfig(msg.to_string())
}
