use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use satsink_pipeline::{
    format_bytes, ChannelReport, ReportSink, StatsReport, Totals, WorkerSummary,
};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Prints statistics reports on stdout in the selected format.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReportSink {
    format: OutputFormat,
}

impl ConsoleReportSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a StatsReport,
    warnings: Vec<String>,
}

impl ReportSink for ConsoleReportSink {
    fn report(&mut self, report: &StatsReport) {
        match self.format {
            OutputFormat::Json => {
                let out = StatsOutput {
                    kind: "stats",
                    report,
                    warnings: report.overflow_warnings(),
                };
                print_json(&out);
            }
            OutputFormat::Table => {
                for warning in report.overflow_warnings() {
                    println!("[WARNING] {warning}");
                }
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["CHANNEL", "RECEIVED", "RATE", "BUFFERED", "DROPPED"]);
                for channel in [&report.bulk, &report.user] {
                    table.add_row(channel_row(channel));
                }
                println!("{}", report.timestamp.format("%Y-%m-%d %H:%M:%S"));
                println!("{table}");
            }
            OutputFormat::Pretty | OutputFormat::Raw => {
                println!("{report}");
            }
        }
    }
}

fn channel_row(channel: &ChannelReport) -> Vec<String> {
    if !channel.enabled {
        return vec![
            channel.channel.to_string(),
            "Disabled".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
        ];
    }
    vec![
        channel.channel.to_string(),
        format_bytes(channel.total_bytes).trim().to_string(),
        channel
            .rate_kbps()
            .map(|kbps| format!("{kbps:.1} kB/s"))
            .unwrap_or_else(|| "-".to_string()),
        format!("{} ({}%)", channel.buffered_bytes, channel.buffer_percent),
        channel
            .dropped_bytes
            .map(|dropped| dropped.to_string())
            .unwrap_or_else(|| "0".to_string()),
    ]
}

/// What a `run` invocation did, printed when it ends.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub pdus: u64,
    pub rejected: u64,
    pub totals: Totals,
    /// Blobs lost to buffer overflow.
    pub dropped_blobs: Totals,
    pub bulk: Option<WorkerSummary>,
    pub user: Option<WorkerSummary>,
    /// Channels whose sink write was still blocked when the run stopped.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stalled: Vec<&'static str>,
    pub interrupted: bool,
}

pub fn print_run_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct SummaryOutput<'a> {
                kind: &'static str,
                #[serde(flatten)]
                summary: &'a RunSummary,
            }
            print_json(&SummaryOutput {
                kind: "summary",
                summary,
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "RECEIVED", "DELIVERED", "MESSAGES", "FAILED"]);
            for (name, total, worker) in [
                ("bulk", summary.totals.bulk, summary.bulk),
                ("user", summary.totals.user, summary.user),
            ] {
                table.add_row(summary_row(name, total, worker));
            }
            println!("{table}");
            println!(
                "pdus={} rejected={} dropped_blobs={}/{} interrupted={}{}",
                summary.pdus,
                summary.rejected,
                summary.dropped_blobs.bulk,
                summary.dropped_blobs.user,
                summary.interrupted,
                stalled_text(&summary.stalled)
            );
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "pdus={} rejected={} bulk={} user={} dropped_blobs={}/{} interrupted={}{}",
                summary.pdus,
                summary.rejected,
                worker_text(summary.totals.bulk, summary.bulk),
                worker_text(summary.totals.user, summary.user),
                summary.dropped_blobs.bulk,
                summary.dropped_blobs.user,
                summary.interrupted,
                stalled_text(&summary.stalled)
            );
        }
    }
}

fn summary_row(name: &str, total: u64, worker: Option<WorkerSummary>) -> Vec<String> {
    match worker {
        Some(worker) => vec![
            name.to_string(),
            total.to_string(),
            worker.delivered_bytes.to_string(),
            worker.delivered_messages.to_string(),
            worker.failed_writes.to_string(),
        ],
        None => vec![
            name.to_string(),
            "Disabled".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
        ],
    }
}

fn stalled_text(stalled: &[&str]) -> String {
    if stalled.is_empty() {
        String::new()
    } else {
        format!(" stalled={}", stalled.join(","))
    }
}

fn worker_text(total: u64, worker: Option<WorkerSummary>) -> String {
    match worker {
        Some(worker) => format!(
            "{total}/{}B({} failed)",
            worker.delivered_bytes, worker.failed_writes
        ),
        None => "disabled".to_string(),
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    kind: &'static str,
    index: u64,
    size: usize,
    payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_hex: Option<&'a str>,
}

/// Print one decoded user-channel message.
pub fn print_message(index: u64, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let hex = hex_preview(payload);
            let text = std::str::from_utf8(payload).ok();
            print_json(&MessageOutput {
                kind: "message",
                index,
                size: payload.len(),
                payload: text.map(str::to_string).unwrap_or_default(),
                payload_hex: text.is_none().then_some(hex.as_str()),
            });
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    index.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "#{index} size={} payload={}",
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => print_raw(payload),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn hex_preview(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{b:02x}")).collect()
}
