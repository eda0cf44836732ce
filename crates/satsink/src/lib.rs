//! Satellite receiver packet sink.
//!
//! satsink takes the packets produced by a satellite receiver, splits them into
//! a bulk channel (raw blocks) and a user channel (reassembled messages), and
//! delivers each channel to its own named pipe, socket or file without ever
//! stalling the receiver.
//!
//! # Crate Structure
//!
//! - [`transport`]: sink endpoints (named pipes, Unix sockets, files)
//! - [`frame`]: packet header parsing, user-channel framing, inbound PDU codec
//! - [`pipeline`]: dispatcher, channel buffers, delivery workers, statistics

/// Re-export transport types.
pub mod transport {
    pub use satsink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use satsink_frame::*;
}

/// Re-export pipeline types.
pub mod pipeline {
    pub use satsink_pipeline::*;
}
