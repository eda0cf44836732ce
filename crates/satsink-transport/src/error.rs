use std::path::PathBuf;

/// Errors that can occur while creating or opening sink endpoints.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Failed to create a named pipe.
    #[error("failed to create named pipe {path}: {source}")]
    CreateFifo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The path exists but is not a named pipe.
    #[error("existing path is not a named pipe: {path}")]
    NotAFifo { path: PathBuf },

    /// The named pipe has no process reading from it.
    #[error("no reader attached to named pipe {path}")]
    NoReader { path: PathBuf },

    /// A sink target string could not be parsed.
    #[error("invalid sink target: {0}")]
    InvalidTarget(String),

    /// An I/O error occurred on the endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io(io) | TransportError::Accept(io) => io,
            TransportError::Bind { source, .. }
            | TransportError::Connect { source, .. }
            | TransportError::CreateFifo { source, .. } => source,
            TransportError::NoReader { .. } => {
                std::io::Error::new(std::io::ErrorKind::NotConnected, err.to_string())
            }
            TransportError::NotAFifo { .. } => {
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, err.to_string())
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
