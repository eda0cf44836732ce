//! Inbound packet header.
//!
//! Every packet handed over by the receiver starts with a fixed 8-byte header.
//! Only byte 0 carries information:
//!
//! ```text
//! byte 0:  M . . . . . . T     T = channel type (0 bulk, 1 user fragment)
//!                              M = more fragments follow
//! bytes 1..8: reserved
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Packet header length in bytes.
pub const PACKET_HEADER_LEN: usize = 8;

const CHANNEL_TYPE_MASK: u8 = 0x01;
const MORE_FRAGMENTS_MASK: u8 = 0x80;

/// Logical channel a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// Complete binary payloads, delivered verbatim.
    Bulk,
    /// One fragment of a user message.
    UserFragment,
}

impl ChannelType {
    /// Short lowercase name for logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::UserFragment => "user",
        }
    }
}

/// A parsed inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Channel selected by header bit 0.
    pub channel_type: ChannelType,
    /// True when this is not the last fragment of a user message.
    pub more_fragments: bool,
    /// Everything after the header. Shares the input buffer.
    pub payload: Bytes,
}

impl Packet {
    /// Parse a raw packet.
    ///
    /// Fails with [`FrameError::MalformedHeader`] when `raw` is shorter than
    /// [`PACKET_HEADER_LEN`]. Reserved header bits are ignored.
    pub fn parse(raw: Bytes) -> Result<Self> {
        if raw.len() < PACKET_HEADER_LEN {
            return Err(FrameError::MalformedHeader {
                len: raw.len(),
                needed: PACKET_HEADER_LEN,
            });
        }

        let flags = raw[0];
        let channel_type = if flags & CHANNEL_TYPE_MASK == 0 {
            ChannelType::Bulk
        } else {
            ChannelType::UserFragment
        };
        let more_fragments = flags & MORE_FRAGMENTS_MASK != 0;

        Ok(Self {
            channel_type,
            more_fragments,
            payload: raw.slice(PACKET_HEADER_LEN..),
        })
    }

    /// Encode this packet back into its wire form.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_packet(self.channel_type, self.more_fragments, &self.payload, dst);
    }
}

/// Build a header with all reserved bits cleared.
pub fn encode_header(channel_type: ChannelType, more_fragments: bool) -> [u8; PACKET_HEADER_LEN] {
    let mut header = [0u8; PACKET_HEADER_LEN];
    if channel_type == ChannelType::UserFragment {
        header[0] |= CHANNEL_TYPE_MASK;
    }
    if more_fragments {
        header[0] |= MORE_FRAGMENTS_MASK;
    }
    header
}

/// Append a complete packet (header + payload) to `dst`.
pub fn encode_packet(
    channel_type: ChannelType,
    more_fragments: bool,
    payload: &[u8],
    dst: &mut BytesMut,
) {
    dst.reserve(PACKET_HEADER_LEN + payload.len());
    dst.put_slice(&encode_header(channel_type, more_fragments));
    dst.put_slice(payload);
}
