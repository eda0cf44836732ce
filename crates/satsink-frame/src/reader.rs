use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::pdu::{decode_pdu, Pdu, DEFAULT_MAX_PDU};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete user-channel frames from any `Read` stream.
///
/// Handles partial reads internally. Callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let max = self.config.max_payload_size;
        read_decoded(&mut self.inner, &mut self.buf, |buf| decode_frame(buf, max))
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Reads inbound PDUs from any `Read` stream.
pub struct PduReader<T> {
    inner: T,
    buf: BytesMut,
    max_body: usize,
}

impl<T: Read> PduReader<T> {
    /// Create a PDU reader with the default body limit.
    pub fn new(inner: T) -> Self {
        Self::with_max_body(inner, DEFAULT_MAX_PDU)
    }

    /// Create a PDU reader with an explicit body limit.
    pub fn with_max_body(inner: T, max_body: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_body,
        }
    }

    /// Read the next PDU (blocking).
    ///
    /// Returns `Ok(None)` on a clean EOF between PDUs, and
    /// `Err(FrameError::ConnectionClosed)` when EOF cuts a PDU short.
    pub fn read_pdu(&mut self) -> Result<Option<Pdu>> {
        let max = self.max_body;
        match read_decoded(&mut self.inner, &mut self.buf, |buf| decode_pdu(buf, max)) {
            Ok(pdu) => Ok(Some(pdu)),
            Err(FrameError::ConnectionClosed) if self.buf.is_empty() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn read_decoded<T, O>(
    inner: &mut T,
    buf: &mut BytesMut,
    mut decode: impl FnMut(&mut BytesMut) -> Result<Option<O>>,
) -> Result<O>
where
    T: Read,
{
    loop {
        if let Some(item) = decode(buf)? {
            return Ok(item);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = match inner.read(&mut chunk) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        };

        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }

        buf.extend_from_slice(&chunk[..read]);
    }
}
