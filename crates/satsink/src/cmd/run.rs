use std::io::Read;
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use satsink_frame::{FrameError, PduReader};
use satsink_pipeline::{Dispatcher, Pipeline, PipelineConfig, ProtocolVersion};
use satsink_transport::{Endpoint, SinkTarget, UnixDomainSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::{parse_duration, parse_size, RunArgs};
use crate::exit::{
    frame_error, pipeline_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS,
};
use crate::output::{print_run_summary, ConsoleReportSink, OutputFormat, RunSummary};

enum Event {
    Interrupted,
    InputDone(CliResult<InputSummary>),
}

#[derive(Debug, Default)]
struct InputSummary {
    pdus: u64,
    dispatcher_rejected: u64,
    totals: satsink_pipeline::Totals,
    dropped_blobs: satsink_pipeline::Totals,
}

enum Source {
    Stdin,
    Listen { listener: UnixDomainSocket, once: bool },
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = pipeline_config(&args)?;
    let max_pdu = parse_size(&args.max_pdu_size)?;
    let write_timeout = args
        .write_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?;

    // Shared by the workers and the endpoints so a write stuck on a stalled
    // reader gives up when the run is interrupted.
    let token = CancellationToken::new();
    let mut pipeline = Pipeline::new(config.clone())
        .with_report_sink(ConsoleReportSink::new(format))
        .with_cancellation(token.clone());
    if config.bulk_enabled {
        let endpoint = open_endpoint("bulk sink", &args.bulk_sink, write_timeout)?;
        pipeline = pipeline.with_bulk_sink(endpoint.with_cancellation(token.clone()));
    }
    if config.user_active() {
        let endpoint = open_endpoint("user sink", &args.user_sink, write_timeout)?;
        pipeline = pipeline.with_user_sink(endpoint.with_cancellation(token.clone()));
    }

    // Bind before starting workers so a bad socket path fails fast.
    let source = match &args.listen {
        Some(path) => Source::Listen {
            listener: UnixDomainSocket::bind(path)
                .map_err(|err| transport_error("listen bind failed", err))?,
            once: args.once,
        },
        None => Source::Stdin,
    };

    let (dispatcher, handle) = pipeline
        .start()
        .map_err(|err| pipeline_error("pipeline start failed", err))?;

    let (events, receiver) = mpsc::channel();
    install_ctrlc_handler(events.clone(), token.clone())?;
    spawn_input(source, dispatcher, max_pdu, events)?;

    let (input, interrupted) = match receiver.recv() {
        Ok(Event::InputDone(result)) => (Some(result), false),
        Ok(Event::Interrupted) | Err(_) => (None, true),
    };

    let shutdown = if interrupted {
        info!("interrupted, stopping delivery");
        // The input thread still owns the listener and will not run its cleanup.
        if let Some(path) = &args.listen {
            let _ = std::fs::remove_file(path);
        }
        handle.shutdown()
    } else {
        info!("input finished, draining buffers");
        handle.finish()
    }
    .map_err(|err| pipeline_error("pipeline shutdown failed", err))?;

    let interrupted = interrupted || token.is_cancelled();
    if !shutdown.stalled.is_empty() {
        warn!(channels = ?shutdown.stalled, "sink writes still blocked at exit");
    }

    let input = match input {
        Some(result) => result?,
        None => InputSummary::default(),
    };

    print_run_summary(
        &RunSummary {
            pdus: input.pdus,
            rejected: input.dispatcher_rejected,
            totals: input.totals,
            dropped_blobs: input.dropped_blobs,
            bulk: shutdown.bulk,
            user: shutdown.user,
            stalled: shutdown.stalled,
            interrupted,
        },
        format,
    );
    Ok(SUCCESS)
}

fn pipeline_config(args: &RunArgs) -> CliResult<PipelineConfig> {
    let protocol_version = ProtocolVersion::from_number(args.protocol_version)
        .map_err(|err| pipeline_error("invalid arguments", err))?;
    let config = PipelineConfig {
        protocol_version,
        bulk_enabled: !args.disable_bulk,
        user_enabled: !args.disable_user,
        buffer_capacity: parse_size(&args.buffer_capacity)?,
        stats_period: parse_duration(&args.stats_period)?,
        print_period: parse_duration(&args.print_period)?,
        rate_window: args.rate_window,
        fill_warning_percent: args.fill_warning,
        max_message_size: args.max_message_size.as_deref().map(parse_size).transpose()?,
    };
    config
        .validate()
        .map_err(|err| pipeline_error("invalid arguments", err))?;
    Ok(config)
}

fn open_endpoint(context: &str, target: &str, timeout: Option<Duration>) -> CliResult<Endpoint> {
    let target: SinkTarget = target.parse().map_err(|err| transport_error(context, err))?;
    if let SinkTarget::Fifo(path) = &target {
        create_parent_dir(context, path)?;
    }
    let endpoint = Endpoint::new(target).map_err(|err| transport_error(context, err))?;
    info!(sink = %endpoint.target(), "{context} ready");
    Ok(endpoint.with_write_timeout(timeout))
}

fn create_parent_dir(context: &str, path: &Path) -> CliResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|err| crate::exit::io_error(&format!("{context} directory"), err)),
        _ => Ok(()),
    }
}

fn spawn_input(
    source: Source,
    dispatcher: Dispatcher,
    max_pdu: usize,
    events: Sender<Event>,
) -> CliResult<()> {
    thread::Builder::new()
        .name("satsink-input".to_string())
        .spawn(move || {
            let result = feed_source(source, dispatcher, max_pdu);
            let _ = events.send(Event::InputDone(result));
        })
        .map(|_| ())
        .map_err(|err| CliError::new(INTERNAL, format!("input thread spawn failed: {err}")))
}

fn feed_source(
    source: Source,
    mut dispatcher: Dispatcher,
    max_pdu: usize,
) -> CliResult<InputSummary> {
    let mut pdus = 0u64;
    match source {
        Source::Stdin => {
            pdus += feed(std::io::stdin().lock(), &mut dispatcher, max_pdu)?;
        }
        Source::Listen { listener, once } => loop {
            let stream = listener
                .accept()
                .map_err(|err| transport_error("accept failed", err))?;
            info!("upstream connected");
            pdus += feed(stream, &mut dispatcher, max_pdu)?;
            info!("upstream disconnected");
            if once {
                break;
            }
        },
    }

    dispatcher.report_now();
    Ok(InputSummary {
        pdus,
        dispatcher_rejected: dispatcher.rejected(),
        totals: dispatcher.totals(),
        dropped_blobs: dispatcher.dropped_blobs(),
    })
}

/// Deliver every PDU from `input` until EOF. Returns the number read.
fn feed<R: Read>(input: R, dispatcher: &mut Dispatcher, max_pdu: usize) -> CliResult<u64> {
    let mut reader = PduReader::with_max_body(input, max_pdu);
    let mut count = 0u64;
    loop {
        match reader.read_pdu() {
            Ok(Some(pdu)) => {
                count += 1;
                dispatcher.deliver(pdu);
            }
            Ok(None) => return Ok(count),
            Err(FrameError::ConnectionClosed) => {
                warn!("input ended inside a PDU, partial PDU discarded");
                return Ok(count);
            }
            Err(err) => return Err(frame_error("input stream", err)),
        }
    }
}

/// Each Ctrl-C cancels the run. The first also wakes the main thread; later
/// ones still reach workers draining their buffers.
fn install_ctrlc_handler(events: Sender<Event>, token: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        token.cancel();
        let _ = events.send(Event::Interrupted);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
