//! Inbound PDU stream codec.
//!
//! The receiver hands packets over as a stream of PDUs:
//!
//! ```text
//! ┌──────────┬────────────┬──────────────┐
//! │ Kind (1B)│ Length     │ Body         │
//! │          │ (4B LE)    │              │
//! └──────────┴────────────┴──────────────┘
//! ```
//!
//! Only [`PDU_KIND_BYTES`] carries packet bytes. Other kinds are reported as
//! [`Pdu::Unsupported`] with their body skipped, so one bad PDU never
//! desynchronises the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// PDU header: kind (1) + length (4) = 5 bytes.
pub const PDU_HEADER_SIZE: usize = 5;

/// PDU kind for a plain byte vector.
pub const PDU_KIND_BYTES: u8 = 0x01;

/// Default maximum PDU body size: 1 MiB.
pub const DEFAULT_MAX_PDU: usize = 1024 * 1024;

/// One message from the upstream receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// A raw packet.
    Bytes(Bytes),
    /// A message in a representation other than a byte vector.
    Unsupported { kind: u8, len: usize },
}

/// Append a byte-vector PDU to `dst`.
pub fn encode_pdu(body: &[u8], dst: &mut BytesMut) -> Result<()> {
    encode_pdu_kind(PDU_KIND_BYTES, body, dst)
}

/// Append a PDU of any kind to `dst`.
pub fn encode_pdu_kind(kind: u8, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(body.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(PDU_HEADER_SIZE + body.len());
    dst.put_u8(kind);
    dst.put_u32_le(len);
    dst.put_slice(body);
    Ok(())
}

/// Decode one PDU from a buffer.
///
/// Returns `Ok(None)` until a complete PDU is buffered.
pub fn decode_pdu(src: &mut BytesMut, max_body: usize) -> Result<Option<Pdu>> {
    if src.len() < PDU_HEADER_SIZE {
        return Ok(None);
    }

    let kind = src[0];
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&src[1..PDU_HEADER_SIZE]);
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > max_body {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_body,
        });
    }

    let total = PDU_HEADER_SIZE + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(PDU_HEADER_SIZE);
    let body = src.split_to(len).freeze();

    if kind == PDU_KIND_BYTES {
        Ok(Some(Pdu::Bytes(body)))
    } else {
        Ok(Some(Pdu::Unsupported { kind, len }))
    }
}
