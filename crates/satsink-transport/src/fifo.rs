use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::SinkStream;

/// A named pipe (FIFO) used as a sink endpoint.
///
/// The pipe is created on demand. An existing FIFO at the path is reused, but
/// any other kind of file is never touched. Pipes created by this handle are
/// removed on `Drop`, as long as the path still refers to the same inode.
#[derive(Debug)]
pub struct NamedPipe {
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl NamedPipe {
    /// Default permission mode for created pipes.
    pub const DEFAULT_FIFO_MODE: u32 = 0o644;

    /// Create (or reuse) a named pipe at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_mode(path, Self::DEFAULT_FIFO_MODE)
    }

    /// Create (or reuse) a named pipe at `path` with an explicit mode.
    pub fn create_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if metadata.file_type().is_fifo() {
                debug!(?path, "reusing existing named pipe");
                return Ok(Self {
                    path,
                    created_inode: None,
                });
            }
            return Err(TransportError::NotAFifo { path });
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            TransportError::CreateFifo {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            }
        })?;

        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(TransportError::CreateFifo {
                path,
                source: std::io::Error::last_os_error(),
            });
        }

        // mkfifo is subject to the process umask; apply the requested mode exactly.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            TransportError::CreateFifo {
                path: path.clone(),
                source: e,
            }
        })?;
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| TransportError::CreateFifo {
            path: path.clone(),
            source: e,
        })?;

        info!(?path, "created named pipe");

        Ok(Self {
            path,
            created_inode: Some((metadata.dev(), metadata.ino())),
        })
    }

    /// Open the write end without blocking on a missing reader.
    ///
    /// Returns [`TransportError::NoReader`] when nothing has the pipe open for
    /// reading. The descriptor stays non-blocking; [`SinkStream`] waits for a
    /// slow reader with `poll(2)` so a stalled pipe cannot pin the writer.
    pub fn open_writer(&self) -> Result<SinkStream> {
        let file = match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                return Err(TransportError::NoReader {
                    path: self.path.clone(),
                });
            }
            Err(err) => return Err(TransportError::Io(err)),
        };

        debug!(path = ?self.path, "opened named pipe for writing");
        Ok(SinkStream::from_fifo(file))
    }

    /// Open the read end (blocks until a writer opens the pipe).
    pub fn open_reader(&self) -> Result<File> {
        File::open(&self.path).map_err(TransportError::Io)
    }

    /// The filesystem path of the pipe.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle created the pipe (and will remove it on drop).
    pub fn is_owned(&self) -> bool {
        self.created_inode.is_some()
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_fifo()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "removing named pipe");
                    let _ = std::fs::remove_file(&self.path);
                } else {
                    debug!(path = ?self.path, "pipe path identity changed; skipping cleanup");
                }
            }
        }
    }
}
