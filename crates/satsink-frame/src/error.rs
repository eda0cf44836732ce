/// Errors that can occur while parsing packets or encoding/decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The raw packet is too short to hold the fixed header.
    #[error("malformed packet header ({len} bytes, need {needed})")]
    MalformedHeader { len: usize, needed: usize },

    /// A framed stream did not start with the expected delimiter.
    #[error("invalid frame delimiter")]
    InvalidDelimiter,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
