/// Errors that can occur in the demultiplexing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Packet parsing or frame encoding error (includes malformed headers).
    #[error("frame error: {0}")]
    Frame(#[from] satsink_frame::FrameError),

    /// Upstream delivered something other than a byte vector.
    #[error("invalid upstream message (kind {kind:#04x}, {len} bytes)")]
    InvalidUpstreamMessage { kind: u8, len: usize },

    /// A user message grew past the configured maximum and was discarded.
    #[error("reassembled message too large ({size} bytes, max {max}); message discarded")]
    ReassemblyOverflow { size: usize, max: usize },

    /// The pipeline configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A delivery worker thread could not be started.
    #[error("failed to spawn delivery worker: {0}")]
    Spawn(std::io::Error),

    /// A delivery worker thread panicked.
    #[error("{0} delivery worker panicked")]
    WorkerPanicked(&'static str),
}

impl PipelineError {
    /// True when the error is a packet shorter than the fixed header.
    pub fn is_malformed_header(&self) -> bool {
        matches!(
            self,
            Self::Frame(satsink_frame::FrameError::MalformedHeader { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
