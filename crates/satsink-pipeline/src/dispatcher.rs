use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use satsink_frame::{ChannelType, Packet, Pdu};
use tracing::{debug, error, trace, warn};

use crate::buffer::{ChannelBuffer, EnqueueOutcome};
use crate::config::{PipelineConfig, ProtocolVersion};
use crate::error::{PipelineError, Result};
use crate::reassembly::Reassembler;
use crate::stats::{ReportSink, StatsReport, StatsReporter, Totals};

/// Receives raw packets and routes them into the channel buffers.
///
/// Runs on the caller's thread. Owns the reassembler, the byte totals and the
/// statistics schedule, so nothing here needs a lock except the buffers.
#[derive(Debug)]
pub struct Dispatcher {
    protocol_version: ProtocolVersion,
    bulk: Option<Arc<ChannelBuffer>>,
    user: Option<Arc<ChannelBuffer>>,
    reassembler: Reassembler,
    totals: Totals,
    dropped_blobs: Totals,
    rejected: u64,
    reporter: StatsReporter,
}

impl Dispatcher {
    /// Create a dispatcher feeding the given buffers.
    ///
    /// A `None` buffer means the channel is disabled and its packets are
    /// ignored.
    pub fn new(
        config: &PipelineConfig,
        bulk: Option<Arc<ChannelBuffer>>,
        user: Option<Arc<ChannelBuffer>>,
        report_sink: Box<dyn ReportSink>,
    ) -> Self {
        Self::with_start(config, bulk, user, report_sink, Instant::now())
    }

    /// Like [`new`](Self::new), with an explicit start instant for the
    /// statistics schedule.
    pub fn with_start(
        config: &PipelineConfig,
        bulk: Option<Arc<ChannelBuffer>>,
        user: Option<Arc<ChannelBuffer>>,
        report_sink: Box<dyn ReportSink>,
        start: Instant,
    ) -> Self {
        Self {
            protocol_version: config.protocol_version,
            bulk,
            user,
            reassembler: Reassembler::with_max_message_size(config.max_message_size),
            totals: Totals::default(),
            dropped_blobs: Totals::default(),
            rejected: 0,
            reporter: StatsReporter::new(config, start, report_sink),
        }
    }

    /// Accept one upstream message. Never fails; problems are logged.
    pub fn deliver(&mut self, message: Pdu) {
        let result = match message {
            Pdu::Bytes(raw) => self.handle(raw),
            Pdu::Unsupported { kind, len } => {
                Err(PipelineError::InvalidUpstreamMessage { kind, len })
            }
        };
        if let Err(err) = result {
            self.rejected += 1;
            error!(error = %err, "dropping upstream message");
        }
    }

    /// Route one raw packet, then run any statistics work that is due.
    pub fn handle(&mut self, raw: Bytes) -> Result<()> {
        self.handle_at(raw, Instant::now())
    }

    /// [`handle`](Self::handle) with an explicit clock reading.
    pub fn handle_at(&mut self, raw: Bytes, now: Instant) -> Result<()> {
        let routed = self.route(raw);
        self.poll_stats(now);
        routed
    }

    /// Run statistics work due at `now`. Returns the report if one was printed.
    pub fn poll_stats(&mut self, now: Instant) -> Option<StatsReport> {
        self.reporter
            .poll(now, self.totals, self.bulk.as_deref(), self.user.as_deref())
    }

    /// Emit a report immediately, outside the schedule.
    pub fn report_now(&mut self) -> StatsReport {
        self.reporter
            .report_now(self.totals, self.bulk.as_deref(), self.user.as_deref())
    }

    /// Wire bytes routed to each channel so far.
    pub fn totals(&self) -> Totals {
        self.totals
    }

    /// Upstream messages dropped by [`deliver`](Self::deliver).
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Blobs discarded per channel by buffer overflow, evicted or oversized.
    pub fn dropped_blobs(&self) -> Totals {
        self.dropped_blobs
    }

    fn route(&mut self, raw: Bytes) -> Result<()> {
        if self.protocol_version == ProtocolVersion::Legacy {
            self.route_bulk(raw);
            return Ok(());
        }

        let packet = Packet::parse(raw)?;
        match packet.channel_type {
            ChannelType::Bulk => {
                self.route_bulk(packet.payload);
                Ok(())
            }
            ChannelType::UserFragment => self.route_user(packet.payload, packet.more_fragments),
        }
    }

    fn route_bulk(&mut self, payload: Bytes) {
        let Some(buffer) = &self.bulk else {
            trace!(len = payload.len(), "bulk channel disabled, packet ignored");
            return;
        };
        self.totals.bulk += payload.len() as u64;
        let outcome = buffer.enqueue(payload);
        self.record(ChannelType::Bulk, outcome);
    }

    fn route_user(&mut self, fragment: Bytes, more_fragments: bool) -> Result<()> {
        let Some(buffer) = &self.user else {
            trace!(len = fragment.len(), "user channel disabled, fragment ignored");
            return Ok(());
        };
        self.totals.user += fragment.len() as u64;

        if let Some(message) = self.reassembler.accept(fragment, more_fragments)? {
            let outcome = buffer.enqueue(message);
            self.record(ChannelType::UserFragment, outcome);
        }
        Ok(())
    }

    fn record(&mut self, channel: ChannelType, outcome: EnqueueOutcome) {
        let name = channel.as_str();
        if outcome.dropped_items > 0 {
            match channel {
                ChannelType::Bulk => self.dropped_blobs.bulk += outcome.dropped_items as u64,
                ChannelType::UserFragment => {
                    self.dropped_blobs.user += outcome.dropped_items as u64
                }
            }
            if outcome.accepted {
                debug!(
                    channel = name,
                    items = outcome.dropped_items,
                    bytes = outcome.dropped_bytes,
                    "buffer full, oldest data evicted"
                );
            } else {
                warn!(
                    channel = name,
                    len = outcome.dropped_bytes,
                    "blob larger than buffer capacity, dropped"
                );
            }
        }

        if let Some(percent) = outcome.fill_warning {
            warn!(channel = name, percent, "buffer filling up");
        }
    }
}
