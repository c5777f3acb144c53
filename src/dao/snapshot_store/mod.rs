pub mod file;

use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::dao::models::SnapshotEntity;

/// Result alias for snapshot store operations.
pub type SnapshotStoreResult<T> = Result<T, SnapshotStoreError>;

/// Error raised by snapshot backends regardless of the underlying medium.
#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("snapshot at {path} is corrupt")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SnapshotStoreError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        SnapshotStoreError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Abstraction over the persistence medium for registry snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Read the latest snapshot; `None` when none was ever written.
    fn load(&self) -> BoxFuture<'static, SnapshotStoreResult<Option<SnapshotEntity>>>;
    /// Replace the stored snapshot with `snapshot`.
    fn persist(&self, snapshot: SnapshotEntity) -> BoxFuture<'static, SnapshotStoreResult<()>>;
    /// Verify the medium is writable.
    fn health_check(&self) -> BoxFuture<'static, SnapshotStoreResult<()>>;
}
