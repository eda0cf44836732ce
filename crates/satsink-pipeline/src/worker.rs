use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use satsink_frame::{ChannelType, FrameConfig, FrameWriter, Framing};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::ChannelBuffer;
use crate::error::{PipelineError, Result};

/// What a delivery worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub delivered_messages: u64,
    pub delivered_bytes: u64,
    pub failed_writes: u64,
}

/// Drains one channel buffer into its sink.
///
/// User messages get the delimiter + length frame header; bulk payloads are
/// written verbatim. A failed write is logged and the blob is lost; the worker
/// carries on with the next one.
pub struct DeliveryWorker<W> {
    channel: ChannelType,
    buffer: Arc<ChannelBuffer>,
    writer: FrameWriter<W>,
    token: CancellationToken,
    summary: WorkerSummary,
}

impl<W: Write + Send + 'static> DeliveryWorker<W> {
    pub fn new(buffer: Arc<ChannelBuffer>, sink: W, token: CancellationToken) -> Self {
        let channel = buffer.channel();
        let config = match channel {
            ChannelType::Bulk => FrameConfig::raw(),
            ChannelType::UserFragment => FrameConfig {
                max_payload_size: usize::MAX,
                framing: Framing::Delimited,
            },
        };
        Self {
            channel,
            buffer,
            writer: FrameWriter::with_config(sink, config),
            token,
            summary: WorkerSummary::default(),
        }
    }

    /// Deliver until cancelled, or until the buffer is closed and drained.
    pub fn run(mut self) -> WorkerSummary {
        let channel = self.channel.as_str();
        debug!(channel, "delivery worker started");

        while let Some(blob) = self.buffer.dequeue(&self.token) {
            match self.writer.send(&blob) {
                Ok(()) => {
                    self.summary.delivered_messages += 1;
                    self.summary.delivered_bytes += blob.len() as u64;
                }
                Err(err) => {
                    self.summary.failed_writes += 1;
                    warn!(channel, len = blob.len(), error = %err, "sink write failed, data lost");
                }
            }
        }

        info!(
            channel,
            delivered = self.summary.delivered_messages,
            bytes = self.summary.delivered_bytes,
            failed = self.summary.failed_writes,
            cancelled = self.token.is_cancelled(),
            "delivery worker stopped"
        );
        self.summary
    }

    /// Run on a dedicated thread named `satsink-<channel>`.
    pub fn spawn(self) -> Result<JoinHandle<WorkerSummary>> {
        thread::Builder::new()
            .name(format!("satsink-{}", self.channel.as_str()))
            .spawn(move || self.run())
            .map_err(PipelineError::Spawn)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind};
    use std::sync::Mutex;

    use bytes::{Bytes, BytesMut};
    use satsink_frame::{decode_frame, HEADER_SIZE};

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails every other write call.
    struct Flaky {
        calls: usize,
        out: Shared,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                return Err(io::Error::from(ErrorKind::BrokenPipe));
            }
            self.out.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn closed_buffer(channel: ChannelType, blobs: &[&'static [u8]]) -> Arc<ChannelBuffer> {
        let buffer = Arc::new(ChannelBuffer::new(channel, 1 << 20, 5));
        for blob in blobs {
            buffer.enqueue(Bytes::from_static(blob));
        }
        buffer.close();
        buffer
    }

    #[test]
    fn bulk_written_verbatim() {
        let out = Shared::default();
        let buffer = closed_buffer(ChannelType::Bulk, &[b"abc", b"def"]);
        let summary =
            DeliveryWorker::new(buffer, out.clone(), CancellationToken::new()).run();

        assert_eq!(out.0.lock().unwrap().as_slice(), b"abcdef");
        assert_eq!(
            summary,
            WorkerSummary {
                delivered_messages: 2,
                delivered_bytes: 6,
                failed_writes: 0
            }
        );
    }

    #[test]
    fn user_messages_framed() {
        let out = Shared::default();
        let buffer = closed_buffer(ChannelType::UserFragment, &[b"hello", b""]);
        DeliveryWorker::new(buffer, out.clone(), CancellationToken::new()).run();

        let bytes = out.0.lock().unwrap().clone();
        assert_eq!(bytes.len(), 2 * HEADER_SIZE + 5);
        let mut wire = BytesMut::from(bytes.as_slice());
        let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"hello");
        assert!(second.payload.is_empty());
    }

    #[test]
    fn write_failure_skips_item() {
        let out = Shared::default();
        let sink = Flaky {
            calls: 0,
            out: out.clone(),
        };
        let buffer = closed_buffer(ChannelType::Bulk, &[b"lost", b"kept"]);
        let summary = DeliveryWorker::new(buffer, sink, CancellationToken::new()).run();

        assert_eq!(out.0.lock().unwrap().as_slice(), b"kept");
        assert_eq!(summary.failed_writes, 1);
        assert_eq!(summary.delivered_messages, 1);
    }

    #[test]
    fn spawned_worker_stops_on_cancel() {
        let buffer = Arc::new(ChannelBuffer::new(ChannelType::Bulk, 1024, 5));
        let token = CancellationToken::new();
        let handle = DeliveryWorker::new(Arc::clone(&buffer), Shared::default(), token.clone())
            .spawn()
            .unwrap();

        token.cancel();
        buffer.wake();
        let summary = handle.join().unwrap();
        assert_eq!(summary.delivered_messages, 0);
    }

    #[test]
    fn worker_thread_is_named() {
        let buffer = closed_buffer(ChannelType::UserFragment, &[]);
        let handle = DeliveryWorker::new(buffer, Shared::default(), CancellationToken::new())
            .spawn()
            .unwrap();
        assert_eq!(handle.thread().name(), Some("satsink-user"));
        handle.join().unwrap();
    }
}
