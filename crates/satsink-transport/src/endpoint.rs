use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::fifo::NamedPipe;
use crate::stream::SinkStream;
use crate::uds::UnixDomainSocket;

/// Where a channel's output goes.
///
/// Parsed from `unix:<path>`, `file:<path>`, `fifo:<path>` or a bare path
/// (which means a named pipe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// A named pipe, created if missing.
    Fifo(PathBuf),
    /// A listening Unix domain socket to connect to.
    Unix(PathBuf),
    /// A regular file, opened in append mode.
    File(PathBuf),
}

impl FromStr for SinkTarget {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("unix:") {
            Ok(Self::Unix(target_path(s, rest)?))
        } else if let Some(rest) = s.strip_prefix("file:") {
            Ok(Self::File(target_path(s, rest)?))
        } else if let Some(rest) = s.strip_prefix("fifo:") {
            Ok(Self::Fifo(target_path(s, rest)?))
        } else {
            Ok(Self::Fifo(target_path(s, s)?))
        }
    }
}

fn target_path(input: &str, path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(TransportError::InvalidTarget(format!(
            "missing path in {input:?}"
        )));
    }
    Ok(PathBuf::from(path))
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo(path) => write!(f, "fifo:{}", path.display()),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// A sink endpoint that opens its stream lazily and reopens it after failures.
///
/// Opening is deferred to the first write so a consumer that attaches late (or
/// detaches and comes back) does not stall start-up. Any failed write drops
/// the stream, including a timed-out or cancelled one, so a frame cut short by
/// the failure is never followed by more data on the same connection. The next
/// write opens a fresh stream.
#[derive(Debug)]
pub struct Endpoint {
    target: SinkTarget,
    fifo: Option<NamedPipe>,
    stream: Option<SinkStream>,
    write_timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Endpoint {
    /// Prepare an endpoint. Named pipes are created immediately so consumers
    /// can open them before any data flows.
    pub fn new(target: SinkTarget) -> Result<Self> {
        let fifo = match &target {
            SinkTarget::Fifo(path) => Some(NamedPipe::create(path)?),
            SinkTarget::Unix(_) | SinkTarget::File(_) => None,
        };
        Ok(Self {
            target,
            fifo,
            stream: None,
            write_timeout: None,
            cancel: None,
        })
    }

    /// Give up on a write to a pipe or socket whose reader has not drained it
    /// within `timeout`.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Abort a write stuck on a stalled reader once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The target this endpoint writes to.
    pub fn target(&self) -> &SinkTarget {
        &self.target
    }

    /// Whether a stream is currently open.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the stream now if it is not already open.
    pub fn connect(&mut self) -> Result<&mut SinkStream> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let mut stream = self.open()?;
                stream.set_write_timeout(self.write_timeout);
                stream.set_cancellation(self.cancel.clone());
                debug!(sink = %self.target, kind = stream.kind(), "sink endpoint opened");
                stream
            }
        };
        Ok(self.stream.insert(stream))
    }

    fn open(&self) -> Result<SinkStream> {
        match &self.target {
            SinkTarget::Fifo(path) => match &self.fifo {
                Some(pipe) => pipe.open_writer(),
                None => Err(TransportError::NoReader { path: path.clone() }),
            },
            SinkTarget::Unix(path) => UnixDomainSocket::connect(path),
            SinkTarget::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(SinkStream::from_file(file))
            }
        }
    }

    fn reset(&mut self, err: &io::Error) {
        if self.stream.take().is_some() {
            warn!(sink = %self.target, %err, "sink endpoint closed after write failure");
        }
    }
}

impl Write for Endpoint {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let result = self.connect().map_err(io::Error::from)?.write(buf);
        if let Err(err) = &result {
            if err.kind() != ErrorKind::Interrupted {
                self.reset(err);
            }
        }
        result
    }

    /// Write `buf` as one unit.
    ///
    /// On failure the stream is dropped; a file sink is first cut back to its
    /// length before the call so no partial unit stays in the file.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let stream = self.connect().map_err(io::Error::from)?;
        let mark = stream.file_len();
        let result = stream.write_all(buf);
        if let Err(err) = &result {
            if let (Some(len), Some(stream)) = (mark, self.stream.as_ref()) {
                if let Err(trunc) = stream.truncate(len) {
                    warn!(sink = %self.target, error = %trunc, "could not roll back partial write");
                }
            }
            self.reset(err);
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let result = stream.flush();
        if let Err(err) = &result {
            self.reset(err);
        }
        result
    }
}
