use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Boundary marker written before every user-channel message.
pub const DELIMITER: &[u8; DELIMITER_LEN] = b"vyqzbefrsnzqahgdkrsidzigxvrppato";

/// Delimiter length in bytes.
pub const DELIMITER_LEN: usize = 32;

/// Frame header: delimiter (32) + length (8) = 40 bytes.
pub const HEADER_SIZE: usize = DELIMITER_LEN + 8;

/// Default maximum payload size accepted when decoding: 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// A complete user-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode only the frame header for a payload of `len` bytes.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────┬────────────┬──────────────────┐
/// │ Delimiter (32B)          │ Length     │ Payload          │
/// │ "vyqzbefrsnzq..."        │ (8B LE)    │ (Length bytes)   │
/// └──────────────────────────┴────────────┴──────────────────┘
/// ```
pub fn encode_frame_header(len: usize, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    dst.put_slice(DELIMITER);
    dst.put_u64_le(len as u64);
}

/// Encode a complete frame into the wire format.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + payload.len());
    encode_frame_header(payload.len(), dst);
    dst.put_slice(payload);
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if &src[..DELIMITER_LEN] != DELIMITER {
        return Err(FrameError::InvalidDelimiter);
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&src[DELIMITER_LEN..HEADER_SIZE]);
    let payload_len = u64::from_le_bytes(len_bytes);

    if payload_len > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            size: usize::try_from(payload_len).unwrap_or(usize::MAX),
            max: max_payload,
        });
    }
    let payload_len = payload_len as usize;

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { payload }))
}

/// How a writer lays payloads onto the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Delimiter + length header before every payload (user channel).
    Delimited,
    /// Payload bytes only (bulk channel).
    Raw,
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 MiB.
    pub max_payload_size: usize,
    /// Framing applied by writers. Default: delimited.
    pub framing: Framing,
}

impl FrameConfig {
    /// Configuration for a raw (unframed) bulk stream.
    pub fn raw() -> Self {
        Self {
            max_payload_size: usize::MAX,
            framing: Framing::Raw,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            framing: Framing::Delimited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf);

        assert_eq!(buf.len(), HEADER_SIZE + 5);
        assert_eq!(&buf[..32], b"vyqzbefrsnzqahgdkrsidzigxvrppato");
        assert_eq!(&buf[32..40], &[5, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&buf[40..], b"hello");
    }

    #[test]
    fn test_decode_single() {
        let mut buf = BytesMut::new();
        encode_frame(b"user message", &mut buf);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload.as_ref(), b"user message");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&DELIMITER[..10]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(b"hello", &mut buf);
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2, "nothing consumed");
    }

    #[test]
    fn test_decode_invalid_delimiter() {
        let mut buf = BytesMut::from(&[0xAAu8; HEADER_SIZE][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::InvalidDelimiter)));
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(DELIMITER);
        buf.put_u64_le(u64::MAX);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge {
                max: DEFAULT_MAX_PAYLOAD,
                ..
            })
        ));
    }

    #[test]
    fn test_multiple_frames_back_to_back() {
        let mut buf = BytesMut::new();
        encode_frame(b"first", &mut buf);
        encode_frame(b"", &mut buf);
        encode_frame(b"third", &mut buf);

        let f1 = decode_frame(&mut buf, 64).unwrap().unwrap();
        let f2 = decode_frame(&mut buf, 64).unwrap().unwrap();
        let f3 = decode_frame(&mut buf, 64).unwrap().unwrap();

        assert_eq!(f1.payload.as_ref(), b"first");
        assert!(f2.payload.is_empty());
        assert_eq!(f3.payload.as_ref(), b"third");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), 44);
    }
}
