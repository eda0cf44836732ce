//! Packet parsing and output framing for satsink.
//!
//! Two wire formats meet here:
//! - The inbound packet: an 8-byte header whose first byte selects the
//!   channel (bulk or user fragment) and flags further fragments.
//! - The user-channel output frame: a 32-byte delimiter followed by a
//!   little-endian u64 payload length, so consumers can find message
//!   boundaries in a byte stream.
//!
//! The [`pdu`] module carries packets from the upstream receiver into the
//! process.

pub mod codec;
pub mod error;
pub mod packet;
pub mod pdu;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, Framing, DEFAULT_MAX_PAYLOAD, DELIMITER,
    HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use packet::{encode_header, encode_packet, ChannelType, Packet, PACKET_HEADER_LEN};
pub use pdu::{decode_pdu, encode_pdu, encode_pdu_kind, Pdu, DEFAULT_MAX_PDU, PDU_KIND_BYTES};
pub use reader::{FrameReader, PduReader};
pub use writer::FrameWriter;
