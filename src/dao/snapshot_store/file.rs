//! File-backed snapshot store.
//!
//! The snapshot is a single JSON document. Writes go to a sibling temp file
//! first and are renamed over the target, so readers either see the previous
//! snapshot or the new one, never a torn write.

use std::io::ErrorKind;
use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::dao::models::SnapshotEntity;
use crate::dao::snapshot_store::{SnapshotStore, SnapshotStoreError, SnapshotStoreResult};

/// Snapshot store writing to a configurable path on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store for the given snapshot path. Nothing is touched on disk
    /// until the first load or persist.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> BoxFuture<'static, SnapshotStoreResult<Option<SnapshotEntity>>> {
        let path = self.path.clone();
        Box::pin(async move {
            match fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<SnapshotEntity>(&contents) {
                    Ok(entity) => Ok(Some(entity)),
                    Err(err) => Err(SnapshotStoreError::Corrupt {
                        path: path.display().to_string(),
                        source: err,
                    }),
                },
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(SnapshotStoreError::unavailable(
                    format!("reading {}", path.display()),
                    err,
                )),
            }
        })
    }

    fn persist(&self, snapshot: SnapshotEntity) -> BoxFuture<'static, SnapshotStoreResult<()>> {
        let path = self.path.clone();
        Box::pin(async move {
            let payload = serde_json::to_vec_pretty(&snapshot).map_err(|err| {
                SnapshotStoreError::unavailable("serializing snapshot".into(), err)
            })?;

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await.map_err(|err| {
                        SnapshotStoreError::unavailable(
                            format!("creating snapshot directory {}", parent.display()),
                            err,
                        )
                    })?;
                }
            }

            // Temp file sits next to the target so the rename stays on one
            // filesystem and therefore atomic.
            let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
            fs::write(&tmp, &payload).await.map_err(|err| {
                SnapshotStoreError::unavailable(format!("writing {}", tmp.display()), err)
            })?;

            if let Err(err) = fs::rename(&tmp, &path).await {
                let _ = fs::remove_file(&tmp).await;
                return Err(SnapshotStoreError::unavailable(
                    format!("replacing {}", path.display()),
                    err,
                ));
            }

            debug!(path = %path.display(), bytes = payload.len(), "snapshot persisted");
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, SnapshotStoreResult<()>> {
        let path = self.path.clone();
        Box::pin(async move {
            match fs::metadata(&path).await {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    // No snapshot yet; the directory must at least be creatable.
                    match path.parent() {
                        Some(parent) if !parent.as_os_str().is_empty() => {
                            fs::create_dir_all(parent).await.map_err(|err| {
                                SnapshotStoreError::unavailable(
                                    format!("creating snapshot directory {}", parent.display()),
                                    err,
                                )
                            })
                        }
                        _ => Ok(()),
                    }
                }
                Err(err) => Err(SnapshotStoreError::unavailable(
                    format!("checking {}", path.display()),
                    err,
                )),
            }
        })
    }
}
