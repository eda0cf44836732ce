use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::SinkStream;

/// A listening Unix socket that upstream packet sources connect to.
///
/// The socket file is removed when the listener is dropped. Connecting to
/// someone else's socket as a sink goes through [`UnixDomainSocket::connect`].
#[derive(Debug)]
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixDomainSocket {
    /// Listen on `path`, replacing a stale socket left by an earlier run.
    ///
    /// Anything at `path` that is not a socket is left alone and reported.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        info!(?path, "listening for upstream packets");
        Ok(Self { listener, path })
    }

    /// Wait for the next upstream connection.
    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "upstream connected");
        Ok(stream)
    }

    /// Connect to a consumer's listening socket as a sink.
    pub fn connect(path: impl AsRef<Path>) -> Result<SinkStream> {
        let path = path.as_ref();
        let connect_err = |source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        };
        let stream = UnixStream::connect(path).map_err(connect_err)?;
        let sink = SinkStream::from_unix(stream).map_err(connect_err)?;
        debug!(?path, "connected to sink socket");
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let still_ours = std::fs::symlink_metadata(&self.path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false);
        if still_ours {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
