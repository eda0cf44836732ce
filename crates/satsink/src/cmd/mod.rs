use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod run;
pub mod tail;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read receiver packets and demultiplex them into the bulk and user sinks.
    Run(RunArgs),
    /// Decode a framed user-channel stream and print its messages.
    Tail(TailArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Tail(args) => tail::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Bulk channel sink: a FIFO path, `unix:<path>` or `file:<path>`.
    #[arg(
        long,
        env = "SATSINK_BULK_SINK",
        default_value = "/tmp/blocksat/bitcoinfibre"
    )]
    pub bulk_sink: String,
    /// User channel sink: a FIFO path, `unix:<path>` or `file:<path>`.
    #[arg(long, env = "SATSINK_USER_SINK", default_value = "/tmp/blocksat/api")]
    pub user_sink: String,
    /// Do not deliver the bulk channel.
    #[arg(long)]
    pub disable_bulk: bool,
    /// Do not deliver the user channel.
    #[arg(long)]
    pub disable_user: bool,
    /// Packet protocol: 1 copies raw packets to the bulk sink, 2 demultiplexes.
    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u8).range(1..=2))]
    pub protocol_version: u8,
    /// Per-channel buffer capacity (e.g. 64M, 512K, 1048576).
    #[arg(long, default_value = "64M")]
    pub buffer_capacity: String,
    /// Interval between rate samples (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub stats_period: String,
    /// Interval between printed reports (e.g. 10s).
    #[arg(long, default_value = "10s")]
    pub print_period: String,
    /// Samples in the rate averaging window.
    #[arg(long, default_value = "5")]
    pub rate_window: usize,
    /// Buffer occupancy (percent) at which fill warnings start.
    #[arg(long, default_value = "5")]
    pub fill_warning: u8,
    /// Largest user message to reassemble; larger messages are dropped.
    #[arg(long)]
    pub max_message_size: Option<String>,
    /// Largest inbound PDU body.
    #[arg(long, default_value = "1M")]
    pub max_pdu_size: String,
    /// Write timeout for `unix:` sinks (e.g. 5s).
    #[arg(long)]
    pub write_timeout: Option<String>,
    /// Read PDUs from connections on this Unix socket instead of stdin.
    #[arg(long, value_name = "PATH")]
    pub listen: Option<PathBuf>,
    /// With --listen, stop after the first connection closes.
    #[arg(long, requires = "listen")]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct TailArgs {
    /// FIFO or file carrying the user stream. Default: stdin.
    pub path: Option<PathBuf>,
    /// Exit after N messages.
    #[arg(long)]
    pub count: Option<u64>,
    /// Largest message accepted from the stream.
    #[arg(long, default_value = "64M")]
    pub max_payload: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `2s`, `150ms` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse a byte size with an optional binary `K`, `M` or `G` suffix.
pub(crate) fn parse_size(input: &str) -> CliResult<usize> {
    let input = input.trim();
    let upper = input.to_ascii_uppercase();
    let digits = upper.strip_suffix('B').unwrap_or(&upper);

    let (number, shift) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 10),
        Some('M') => (&digits[..digits.len() - 1], 20),
        Some('G') => (&digits[..digits.len() - 1], 30),
        _ => (digits, 0),
    };

    let value: usize = number
        .trim()
        .parse()
        .map_err(|_| CliError::usage(format!("invalid size: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("size must be greater than zero"));
    }
    value
        .checked_mul(1usize << shift)
        .ok_or_else(|| CliError::usage(format!("size too large: {input}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("1000").unwrap(), 1000);
        assert_eq!(parse_size("512K").unwrap(), 512 * 1024);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1 << 30);
        assert_eq!(parse_size("2MB").unwrap(), 2 << 20);
    }

    #[test]
    fn parse_size_rejects_invalid_values() {
        assert!(parse_size("").is_err());
        assert!(parse_size("0K").is_err());
        assert!(parse_size("lots").is_err());
        assert!(parse_size("-1").is_err());
    }
}
