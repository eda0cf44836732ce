use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig, Framing, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Writes payloads to any `Write` stream, framed or raw.
///
/// With [`Framing::Delimited`] every payload is preceded by the 40-byte frame
/// header; with [`Framing::Raw`] payload bytes go out untouched. Each payload
/// reaches the stream through a single `write_all`, so a sink that discards
/// its connection on error never carries a frame header without its payload
/// into the next write.
pub struct FrameWriter<T> {
    inner: T,
    frame: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new delimited frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            frame: BytesMut::with_capacity(HEADER_SIZE),
            config,
        }
    }

    /// Write one payload (blocking) and flush.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let result = match self.config.framing {
            Framing::Delimited => {
                self.frame.clear();
                encode_frame(payload, &mut self.frame);
                self.inner.write_all(&self.frame)
            }
            Framing::Raw => self.inner.write_all(payload),
        };
        result.map_err(|err| match err.kind() {
            ErrorKind::WriteZero => FrameError::ConnectionClosed,
            _ => FrameError::Io(err),
        })?;

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
