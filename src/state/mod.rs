pub mod coordinator;
pub mod registry;
pub mod rooms;

use std::{sync::Arc, time::SystemTime};

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};

use crate::{
    config::AppConfig,
    dao::{
        directory::{IdentityProvider, PartyDirectory, UserDirectory},
        snapshot_store::SnapshotStore,
    },
    dto::signaling::SignalingServerMessage,
    state::coordinator::CoordinatorHandle,
};

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
/// Handle used to push frames to an admitted signaling peer.
pub struct SignalingPeer {
    /// User the peer's signaling id resolved to.
    pub user_id: String,
    /// Channel into the peer connection's writer task.
    pub tx: mpsc::UnboundedSender<SignalingServerMessage>,
}

/// Central application state shared across routes and services.
pub struct AppState {
    config: AppConfig,
    coordinator: CoordinatorHandle,
    snapshot_store: Arc<dyn SnapshotStore>,
    identity_provider: Arc<dyn IdentityProvider>,
    party_directory: Arc<dyn PartyDirectory>,
    user_directory: Arc<dyn UserDirectory>,
    signaling_peers: DashMap<String, SignalingPeer>,
    degraded: watch::Sender<bool>,
    last_snapshot_at: RwLock<Option<SystemTime>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: AppConfig,
        coordinator: CoordinatorHandle,
        snapshot_store: Arc<dyn SnapshotStore>,
        identity_provider: Arc<dyn IdentityProvider>,
        party_directory: Arc<dyn PartyDirectory>,
        user_directory: Arc<dyn UserDirectory>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            config,
            coordinator,
            snapshot_store,
            identity_provider,
            party_directory,
            user_directory,
            signaling_peers: DashMap::new(),
            degraded: degraded_tx,
            last_snapshot_at: RwLock::new(None),
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Client side of the coordination task.
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Snapshot persistence backend.
    pub fn snapshot_store(&self) -> Arc<dyn SnapshotStore> {
        Arc::clone(&self.snapshot_store)
    }

    /// Session token resolver.
    pub fn identity_provider(&self) -> Arc<dyn IdentityProvider> {
        Arc::clone(&self.identity_provider)
    }

    /// Party catalogue.
    pub fn party_directory(&self) -> Arc<dyn PartyDirectory> {
        Arc::clone(&self.party_directory)
    }

    /// User catalogue.
    pub fn user_directory(&self) -> Arc<dyn UserDirectory> {
        Arc::clone(&self.user_directory)
    }

    /// Registry of admitted signaling peers keyed by signaling id.
    pub fn signaling_peers(&self) -> &DashMap<String, SignalingPeer> {
        &self.signaling_peers
    }

    /// Flip the degraded flag; set while snapshot persistence is failing.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.send_replace(degraded);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded flag updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Record a successful snapshot.
    pub async fn set_last_snapshot_at(&self, at: SystemTime) {
        *self.last_snapshot_at.write().await = Some(at);
    }

    /// Instant of the last successful snapshot, if any.
    pub async fn last_snapshot_at(&self) -> Option<SystemTime> {
        *self.last_snapshot_at.read().await
    }
}
