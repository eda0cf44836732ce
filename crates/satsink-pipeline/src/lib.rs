//! Demultiplexing pipeline for satsink.
//!
//! Raw packets enter through a [`Dispatcher`], which splits them into two
//! logical channels:
//! - **bulk**: payloads delivered verbatim, in order.
//! - **user**: fragments reassembled into whole messages, delivered with the
//!   delimiter + length frame header.
//!
//! Each enabled channel has a byte-bounded [`ChannelBuffer`] drained by a
//! [`DeliveryWorker`] on its own thread. When a sink falls behind, the buffer
//! evicts its oldest data instead of blocking the receiver.
//!
//! ```text
//! packet ─► Dispatcher ─┬─► ChannelBuffer(bulk) ─► worker ─► bulk sink
//!                       └─► Reassembler ─► ChannelBuffer(user) ─► worker ─► user sink
//! ```

pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod rate;
pub mod reassembly;
pub mod stats;
pub mod worker;

pub use buffer::{BufferSnapshot, ChannelBuffer, EnqueueOutcome};
pub use config::{
    PipelineConfig, ProtocolVersion, DEFAULT_BUFFER_CAPACITY, DEFAULT_FILL_WARNING_PERCENT,
    DEFAULT_RATE_WINDOW,
};
pub use dispatcher::Dispatcher;
pub use error::{PipelineError, Result};
pub use pipeline::{
    BoxedSink, Pipeline, PipelineHandle, ShutdownSummary, DEFAULT_SHUTDOWN_GRACE,
};
pub use rate::RateAverager;
pub use reassembly::Reassembler;
pub use stats::{
    format_bytes, ChannelReport, LogReportSink, ReportSink, StatsReport, StatsReporter, Totals,
};
pub use worker::{DeliveryWorker, WorkerSummary};
