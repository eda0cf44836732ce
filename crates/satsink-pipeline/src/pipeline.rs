use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use satsink_frame::ChannelType;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::ChannelBuffer;
use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{PipelineError, Result};
use crate::stats::{LogReportSink, ReportSink};
use crate::worker::{DeliveryWorker, WorkerSummary};

/// Boxed sink handed to a delivery worker.
pub type BoxedSink = Box<dyn Write + Send>;

/// How long a cancelled pipeline waits for a worker before abandoning it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Assembles buffers, workers and the dispatcher for one run.
///
/// ```no_run
/// use satsink_pipeline::{Pipeline, PipelineConfig};
///
/// let (mut dispatcher, handle) = Pipeline::new(PipelineConfig::default())
///     .with_bulk_sink(std::io::sink())
///     .with_user_sink(std::io::sink())
///     .start()?;
/// dispatcher.deliver(satsink_frame::Pdu::Bytes(bytes::Bytes::from_static(b"\x00\0\0\0\0\0\0\0data")));
/// handle.finish()?;
/// # Ok::<(), satsink_pipeline::PipelineError>(())
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    bulk_sink: Option<BoxedSink>,
    user_sink: Option<BoxedSink>,
    report_sink: Option<Box<dyn ReportSink>>,
    token: CancellationToken,
    shutdown_grace: Duration,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            bulk_sink: None,
            user_sink: None,
            report_sink: None,
            token: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Destination for bulk payloads.
    pub fn with_bulk_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.bulk_sink = Some(Box::new(sink));
        self
    }

    /// Destination for framed user messages.
    pub fn with_user_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.user_sink = Some(Box::new(sink));
        self
    }

    /// Where statistics reports go. Default: [`LogReportSink`].
    pub fn with_report_sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.report_sink = Some(Box::new(sink));
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Once cancelled, wait at most `grace` for each worker to stop. A worker
    /// still blocked in its sink after that is left behind and reported in
    /// [`ShutdownSummary::stalled`].
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validate the configuration, start a worker per enabled channel and
    /// return the dispatcher together with a handle for shutdown.
    pub fn start(self) -> Result<(Dispatcher, PipelineHandle)> {
        let Self {
            config,
            bulk_sink,
            user_sink,
            report_sink,
            token,
            shutdown_grace,
        } = self;
        config.validate()?;

        let mut handle = PipelineHandle {
            token: token.clone(),
            bulk: None,
            user: None,
            workers: Vec::new(),
            shutdown_grace,
        };

        let bulk = open_channel(
            &config,
            ChannelType::Bulk,
            config.bulk_enabled,
            bulk_sink,
            &token,
            &mut handle,
        )?;
        let user = open_channel(
            &config,
            ChannelType::UserFragment,
            config.user_active(),
            user_sink,
            &token,
            &mut handle,
        )?;
        handle.bulk = bulk.clone();
        handle.user = user.clone();

        let report_sink = report_sink.unwrap_or_else(|| Box::new(LogReportSink));
        let dispatcher = Dispatcher::new(&config, bulk, user, report_sink);

        info!(
            protocol = %config.protocol_version,
            bulk = handle.bulk.is_some(),
            user = handle.user.is_some(),
            capacity = config.buffer_capacity,
            "pipeline started"
        );
        Ok((dispatcher, handle))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("bulk_sink", &self.bulk_sink.is_some())
            .field("user_sink", &self.user_sink.is_some())
            .finish_non_exhaustive()
    }
}

fn open_channel(
    config: &PipelineConfig,
    channel: ChannelType,
    enabled: bool,
    sink: Option<BoxedSink>,
    token: &CancellationToken,
    handle: &mut PipelineHandle,
) -> Result<Option<Arc<ChannelBuffer>>> {
    if !enabled {
        if sink.is_some() {
            debug!(channel = channel.as_str(), "channel disabled, sink unused");
        }
        return Ok(None);
    }
    let Some(sink) = sink else {
        return Err(PipelineError::InvalidConfig(format!(
            "{} channel enabled without a sink",
            channel.as_str()
        )));
    };

    let buffer = Arc::new(ChannelBuffer::new(
        channel,
        config.buffer_capacity,
        config.fill_warning_percent,
    ));
    let worker = DeliveryWorker::new(Arc::clone(&buffer), sink, token.clone()).spawn();
    match worker {
        Ok(join) => {
            handle.workers.push((channel, join));
            Ok(Some(buffer))
        }
        Err(err) => {
            // Do not leave an already started worker running.
            handle.token.cancel();
            handle.wake_all();
            Err(err)
        }
    }
}

/// Final state of a pipeline after shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    pub bulk: Option<WorkerSummary>,
    pub user: Option<WorkerSummary>,
    /// Channels whose worker was still blocked in a sink write when the
    /// shutdown grace period ran out.
    pub stalled: Vec<&'static str>,
}

/// Controls the delivery workers of a running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    token: CancellationToken,
    bulk: Option<Arc<ChannelBuffer>>,
    user: Option<Arc<ChannelBuffer>>,
    workers: Vec<(ChannelType, JoinHandle<WorkerSummary>)>,
    shutdown_grace: Duration,
}

impl PipelineHandle {
    /// Token that stops the workers when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Buffer of a channel, if that channel is running.
    pub fn buffer(&self, channel: ChannelType) -> Option<&Arc<ChannelBuffer>> {
        match channel {
            ChannelType::Bulk => self.bulk.as_ref(),
            ChannelType::UserFragment => self.user.as_ref(),
        }
    }

    /// Stop promptly. Queued data is discarded.
    ///
    /// Returns within the shutdown grace period even if a sink write never
    /// completes.
    pub fn shutdown(self) -> Result<ShutdownSummary> {
        self.token.cancel();
        self.wake_all();
        self.join()
    }

    /// Stop accepting data, let workers drain their buffers, then stop.
    ///
    /// Waits as long as draining takes. Cancelling the token meanwhile turns
    /// this into a [`shutdown`](Self::shutdown).
    pub fn finish(self) -> Result<ShutdownSummary> {
        for buffer in [&self.bulk, &self.user].into_iter().flatten() {
            buffer.close();
        }
        self.join()
    }

    fn wake_all(&self) {
        for buffer in [&self.bulk, &self.user].into_iter().flatten() {
            buffer.wake();
        }
    }

    fn join(self) -> Result<ShutdownSummary> {
        let mut cancelled_at = None;
        while !self.workers.iter().all(|(_, worker)| worker.is_finished()) {
            if self.token.is_cancelled() {
                let since: Instant = *cancelled_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.shutdown_grace {
                    break;
                }
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        let mut summary = ShutdownSummary::default();
        for (channel, worker) in self.workers {
            if !worker.is_finished() {
                warn!(
                    channel = channel.as_str(),
                    "worker still blocked in its sink, abandoning it"
                );
                summary.stalled.push(channel.as_str());
                continue;
            }
            let result = worker
                .join()
                .map_err(|_| PipelineError::WorkerPanicked(channel.as_str()))?;
            match channel {
                ChannelType::Bulk => summary.bulk = Some(result),
                ChannelType::UserFragment => summary.user = Some(result),
            }
        }
        info!(?summary, "pipeline stopped");
        Ok(summary)
    }
}
