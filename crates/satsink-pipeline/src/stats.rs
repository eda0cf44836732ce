//! Throughput statistics and periodic reports.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::buffer::ChannelBuffer;
use crate::config::PipelineConfig;
use crate::rate::RateAverager;

const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// One counter per channel: wire bytes routed, or blobs dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub bulk: u64,
    pub user: u64,
}

/// One channel's line in a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    pub channel: &'static str,
    pub enabled: bool,
    pub total_bytes: u64,
    pub rate_bytes_per_sec: Option<f64>,
    pub buffered_bytes: usize,
    pub buffer_percent: u8,
    /// Bytes discarded by buffer overflow since the previous report.
    pub dropped_bytes: Option<u64>,
}

impl ChannelReport {
    /// Report for a channel that is switched off.
    pub fn disabled(channel: &'static str) -> Self {
        Self {
            channel,
            enabled: false,
            total_bytes: 0,
            rate_bytes_per_sec: None,
            buffered_bytes: 0,
            buffer_percent: 0,
            dropped_bytes: None,
        }
    }

    /// Rate in kB/s (1 kB = 1000 bytes).
    pub fn rate_kbps(&self) -> Option<f64> {
        self.rate_bytes_per_sec.map(|rate| rate / 1000.0)
    }

    /// Human-readable total with rate, or "Disabled".
    pub fn summary(&self) -> String {
        if !self.enabled {
            return "Disabled".to_string();
        }
        match self.rate_kbps() {
            Some(kbps) => format!("{} ({kbps:.1} kB/s)", format_bytes(self.total_bytes)),
            None => format_bytes(self.total_bytes),
        }
    }

    /// Overflow notice, when this channel discarded data since the last report.
    pub fn overflow_warning(&self) -> Option<String> {
        self.dropped_bytes.map(|dropped| {
            format!(
                "{} buffer overflow: {dropped} bytes discarded since last report",
                self.channel
            )
        })
    }
}

/// A periodic statistics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub timestamp: DateTime<Local>,
    pub bulk: ChannelReport,
    pub user: ChannelReport,
}

impl StatsReport {
    /// Overflow notices for both channels, bulk first.
    pub fn overflow_warnings(&self) -> Vec<String> {
        [&self.bulk, &self.user]
            .into_iter()
            .filter_map(ChannelReport::overflow_warning)
            .collect()
    }

    /// The single "Rx Data" line.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] Rx Data\t Blocks: {:>7}\tUser API: {:>7}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.bulk.summary(),
            self.user.summary()
        )
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for warning in self.overflow_warnings() {
            writeln!(f, "[WARNING] {warning}")?;
        }
        writeln!(f, "{SEPARATOR}")?;
        writeln!(f, "{}", self.summary_line())?;
        write!(f, "{SEPARATOR}")
    }
}

/// Render a byte count with a 1024-based unit, e.g. `" 1.5 KB"`.
///
/// Values are rounded to two decimals and always keep at least one, so
/// 1024 bytes renders as `" 1.0 KB"`; zero renders as `"0B"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes == 0 {
        return "0B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    let mut number = rounded.to_string();
    if !number.contains('.') {
        number.push_str(".0");
    }
    format!("{number:>4} {:>2}", UNITS[unit])
}

/// Destination for periodic reports.
pub trait ReportSink: Send {
    fn report(&mut self, report: &StatsReport);
}

/// Default sink: emits reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn report(&mut self, report: &StatsReport) {
        for warning in report.overflow_warnings() {
            warn!("{warning}");
        }
        info!(
            bulk = %report.bulk.summary(),
            user = %report.user.summary(),
            bulk_buffer_percent = report.bulk.buffer_percent,
            user_buffer_percent = report.user.buffer_percent,
            "rx data"
        );
    }
}

/// Drives the rate averagers and emits reports on schedule.
pub struct StatsReporter {
    bulk_rate: RateAverager,
    user_rate: RateAverager,
    stats_period: Duration,
    print_period: Duration,
    next_update: Instant,
    next_print: Instant,
    sink: Box<dyn ReportSink>,
}

impl StatsReporter {
    /// Create a reporter whose clock starts at `start`.
    ///
    /// The first report is due after two print periods, giving the rate
    /// averagers time to fill.
    pub fn new(config: &PipelineConfig, start: Instant, sink: Box<dyn ReportSink>) -> Self {
        Self {
            bulk_rate: RateAverager::new(config.rate_window),
            user_rate: RateAverager::new(config.rate_window),
            stats_period: config.stats_period,
            print_period: config.print_period,
            next_update: start + config.stats_period,
            next_print: start + config.print_period * 2,
            sink,
        }
    }

    /// Run whatever is due at `now`. Returns the report if one was printed.
    ///
    /// Missed ticks are not caught up; the next tick is `now + period`.
    pub fn poll(
        &mut self,
        now: Instant,
        totals: Totals,
        bulk: Option<&ChannelBuffer>,
        user: Option<&ChannelBuffer>,
    ) -> Option<StatsReport> {
        if now >= self.next_update {
            self.bulk_rate.update(totals.bulk, now);
            self.user_rate.update(totals.user, now);
            self.next_update = now + self.stats_period;
        }

        if now < self.next_print {
            return None;
        }
        self.next_print = now + self.print_period;
        Some(self.report_now(totals, bulk, user))
    }

    /// Build a report immediately and hand it to the sink.
    pub fn report_now(
        &mut self,
        totals: Totals,
        bulk: Option<&ChannelBuffer>,
        user: Option<&ChannelBuffer>,
    ) -> StatsReport {
        let report = StatsReport {
            timestamp: Local::now(),
            bulk: channel_report("bulk", totals.bulk, &self.bulk_rate, bulk),
            user: channel_report("user", totals.user, &self.user_rate, user),
        };
        self.sink.report(&report);
        report
    }

    /// Instant of the next scheduled report.
    pub fn next_print(&self) -> Instant {
        self.next_print
    }
}

impl fmt::Debug for StatsReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsReporter")
            .field("stats_period", &self.stats_period)
            .field("print_period", &self.print_period)
            .field("next_update", &self.next_update)
            .field("next_print", &self.next_print)
            .finish_non_exhaustive()
    }
}

fn channel_report(
    channel: &'static str,
    total: u64,
    rate: &RateAverager,
    buffer: Option<&ChannelBuffer>,
) -> ChannelReport {
    let Some(buffer) = buffer else {
        return ChannelReport::disabled(channel);
    };
    let snapshot = buffer.snapshot();
    ChannelReport {
        channel,
        enabled: true,
        total_bytes: total,
        rate_bytes_per_sec: rate.rate(),
        buffered_bytes: snapshot.buffered_bytes,
        buffer_percent: snapshot.occupancy_percent,
        dropped_bytes: buffer.take_dropped(),
    }
}
