use std::path::PathBuf;

use thiserror::Error;

/// Fatal local-library failures: lock conflicts and irrecoverable
/// filesystem state. Transient oddities (stray files, dangling links)
/// surface as warnings on the event stream instead.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Locked by PID {pid}")]
    Locked { pid: u32 },

    #[error("No lock file present at release")]
    NoLock,

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("Unknown album {0}")]
    UnknownAlbum(String),

    #[error("Asset checksum {0} is not valid base64")]
    InvalidChecksum(String),

    #[error("Not an album directory: {0}")]
    NotAnAlbum(PathBuf),

    #[error("A non-link entry is in the way at {0}")]
    Conflict(PathBuf),

    #[error("Symbolic links are not supported on this platform")]
    SymlinksUnsupported,
}

impl LibraryError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        5
    }
}
