use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Longest single `poll(2)` wait while a pipe or socket is full.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// An open, writable sink stream.
///
/// This is the handle a delivery worker writes into. It wraps a named pipe,
/// a connected Unix domain socket, or an append-mode regular file.
///
/// Pipes and sockets are kept non-blocking. A write that finds them full
/// waits with `poll(2)` in short slices, so it gives up when the write
/// timeout expires ([`ErrorKind::TimedOut`]) or the cancellation token fires
/// ([`ErrorKind::Other`]) instead of hanging on a reader that stopped reading.
pub struct SinkStream {
    inner: SinkStreamInner,
    write_timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

enum SinkStreamInner {
    Fifo(File),
    Unix(UnixStream),
    File(File),
}

impl Write for SinkStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let deadline = self.write_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            self.check_cancelled()?;
            let (result, fd) = match &mut self.inner {
                SinkStreamInner::Fifo(file) => (file.write(buf), file.as_raw_fd()),
                SinkStreamInner::Unix(stream) => (stream.write(buf), stream.as_raw_fd()),
                SinkStreamInner::File(file) => return file.write(buf),
            };
            match result {
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    self.wait_writable(fd, deadline)?;
                }
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            SinkStreamInner::Fifo(file) | SinkStreamInner::File(file) => file.flush(),
            SinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl SinkStream {
    pub(crate) fn from_fifo(file: File) -> Self {
        Self::with_inner(SinkStreamInner::Fifo(file))
    }

    pub(crate) fn from_unix(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self::with_inner(SinkStreamInner::Unix(stream)))
    }

    pub(crate) fn from_file(file: File) -> Self {
        Self::with_inner(SinkStreamInner::File(file))
    }

    fn with_inner(inner: SinkStreamInner) -> Self {
        Self {
            inner,
            write_timeout: None,
            cancel: None,
        }
    }

    /// Limit how long one write may wait for a full pipe or socket to drain.
    ///
    /// Regular files never wait, so the timeout does not apply to them.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Abort pending and future writes once `token` is cancelled.
    pub fn set_cancellation(&mut self, token: Option<CancellationToken>) {
        self.cancel = token;
    }

    /// Current length of a file sink, used to roll back a partial write.
    pub(crate) fn file_len(&self) -> Option<u64> {
        match &self.inner {
            SinkStreamInner::File(file) => file.metadata().ok().map(|m| m.len()),
            SinkStreamInner::Fifo(_) | SinkStreamInner::Unix(_) => None,
        }
    }

    /// Cut a file sink back to `len` bytes.
    pub(crate) fn truncate(&self, len: u64) -> io::Result<()> {
        match &self.inner {
            SinkStreamInner::File(file) => file.set_len(len),
            SinkStreamInner::Fifo(_) | SinkStreamInner::Unix(_) => Ok(()),
        }
    }

    /// Short name of the stream kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            SinkStreamInner::Fifo(_) => "fifo",
            SinkStreamInner::Unix(_) => "unix",
            SinkStreamInner::File(_) => "file",
        }
    }

    fn check_cancelled(&self) -> io::Result<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(io::Error::other("sink write cancelled"));
        }
        Ok(())
    }

    fn wait_writable(&self, fd: RawFd, deadline: Option<Instant>) -> io::Result<()> {
        loop {
            self.check_cancelled()?;
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(io::Error::new(ErrorKind::TimedOut, "sink write timed out"));
                    }
                    remaining.min(POLL_SLICE)
                }
                None => POLL_SLICE,
            };

            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            };
            // SAFETY: `pfd` is a valid pollfd for the duration of the call and
            // `fd` stays open because `self` owns it.
            let rc = unsafe { libc::poll(&mut pfd, 1, slice.as_millis().max(1) as libc::c_int) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            // Writable, or an error/hangup the next write will report.
            if rc > 0 {
                return Ok(());
            }
        }
    }
}

impl std::fmt::Debug for SinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkStream")
            .field("type", &self.kind())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::thread;

    use super::*;

    fn full_socket_pair() -> (SinkStream, UnixStream) {
        let (writer, reader) = UnixStream::pair().unwrap();
        let mut sink = SinkStream::from_unix(writer).unwrap();
        let chunk = vec![0u8; 64 * 1024];
        // Fill the socket buffer until a write would block.
        sink.set_write_timeout(Some(Duration::from_millis(20)));
        while sink.write(&chunk).is_ok() {}
        (sink, reader)
    }

    #[test]
    fn full_socket_times_out() {
        let (mut sink, _reader) = full_socket_pair();
        sink.set_write_timeout(Some(Duration::from_millis(50)));

        let started = Instant::now();
        let err = sink.write(b"more").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cancel_interrupts_blocked_write() {
        let (mut sink, _reader) = full_socket_pair();
        sink.set_write_timeout(None);
        let token = CancellationToken::new();
        sink.set_cancellation(Some(token.clone()));

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let started = Instant::now();
        let err = sink.write(b"more").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn write_resumes_when_reader_drains() {
        let (mut sink, mut reader) = full_socket_pair();
        sink.set_write_timeout(Some(Duration::from_secs(5)));

        let drain = thread::spawn(move || {
            let mut buf = vec![0u8; 64 * 1024];
            let mut total = 0usize;
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
                total += n;
            }
            total
        });
        sink.write_all(b"after the backlog").unwrap();
        drop(sink);
        assert!(drain.join().unwrap() > 0);
    }
}
