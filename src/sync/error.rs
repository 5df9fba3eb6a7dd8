use thiserror::Error;

use crate::library::error::LibraryError;
use crate::photos::error::QueryError;
use crate::shutdown::Interrupted;

/// Fatal sync failures. Per-asset download problems are not here: those
/// are skips surfaced as `SYNC_WARNING` events and retried next run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl SyncError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Query(e) => e.exit_code(),
            SyncError::Library(e) => e.exit_code(),
            SyncError::Interrupted(_) => crate::shutdown::EXIT_INTERRUPTED,
        }
    }
}
