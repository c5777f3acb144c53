//! Boot-time restore and periodic persistence of the durable registry subset.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    dao::{models::SnapshotEntity, snapshot_store::SnapshotStore},
    services::clock,
    state::{SharedState, registry::PartySessionRegistry},
};

/// Rebuild the registry from the last snapshot on disk.
///
/// Every load failure, a corrupt file included, falls back to an empty
/// registry: play state is reconstructible from the next wish, so boot must
/// never be blocked on the snapshot.
pub async fn restore(store: &Arc<dyn SnapshotStore>) -> PartySessionRegistry {
    match store.load().await {
        Ok(Some(entity)) => {
            let snapshot = entity.into_snapshot();
            info!(
                parties = snapshot.play_orders.len(),
                "restored play state from snapshot"
            );
            PartySessionRegistry::restore(snapshot)
        }
        Ok(None) => {
            info!("no snapshot on disk, starting empty");
            PartySessionRegistry::new()
        }
        Err(err) => {
            warn!(error = %err, "snapshot unusable, starting empty");
            PartySessionRegistry::new()
        }
    }
}

/// Persist the registry on a fixed cadence until the process exits.
pub async fn run(state: SharedState) {
    let interval = state.config().snapshot_interval();
    loop {
        sleep(interval).await;
        persist_once(&state).await;
    }
}

/// Take one snapshot and write it out, tracking the degraded flag.
///
/// Returns whether the write reached disk.
pub async fn persist_once(state: &SharedState) -> bool {
    let snapshot = match state.coordinator().snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "cannot capture snapshot");
            return false;
        }
    };

    let entity = SnapshotEntity::from_snapshot(snapshot, clock::now_ms());
    match state.snapshot_store().persist(entity).await {
        Ok(()) => {
            if state.is_degraded() {
                info!("snapshot store healthy again; leaving degraded mode");
            }
            state.set_degraded(false);
            state.set_last_snapshot_at(SystemTime::now()).await;
            debug!("snapshot persisted");
            true
        }
        Err(err) => {
            if state.is_degraded() {
                warn!(error = %err, "snapshot persist failed");
            } else {
                warn!(error = %err, "snapshot persist failed; entering degraded mode");
            }
            state.set_degraded(true);
            false
        }
    }
}

/// Best-effort final snapshot, taken when the server is shutting down.
pub async fn flush(state: &SharedState) {
    if persist_once(state).await {
        info!("final snapshot persisted");
    } else {
        warn!("final snapshot failed; play state since the last write is lost");
    }
}
