//! In-process directory for standalone deployments and tests.
//!
//! Lookups are served from maps seeded at startup (optionally from a JSON
//! file) and mutated only through the insert helpers. This is the default
//! backend when no upstream base URL is configured.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::dao::directory::{
    DirectoryError, DirectoryResult, Identity, IdentityProvider, PartyDirectory, PartyRecord,
    UserDirectory, UserRecord,
};

/// Directory backend answering from in-process maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    parties: HashMap<String, PartyRecord>,
    users: HashMap<String, UserRecord>,
    sessions: HashMap<String, Identity>,
}

#[derive(Debug, Deserialize)]
/// JSON shape of the optional seed file.
struct SeedFile {
    #[serde(default)]
    parties: Vec<PartyRecord>,
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    sessions: HashMap<String, Identity>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a directory pre-populated from a JSON seed file.
    pub fn from_seed_path(path: &Path) -> DirectoryResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            DirectoryError::unavailable(format!("reading seed {}", path.display()), err)
        })?;
        let seed: SeedFile = serde_json::from_str(&contents).map_err(|err| {
            DirectoryError::unavailable(format!("parsing seed {}", path.display()), err)
        })?;

        let inner = Inner {
            parties: seed
                .parties
                .into_iter()
                .map(|party| (party.id.clone(), party))
                .collect(),
            users: seed
                .users
                .into_iter()
                .map(|user| (user.id.clone(), user))
                .collect(),
            sessions: seed.sessions,
        };
        info!(
            path = %path.display(),
            parties = inner.parties.len(),
            users = inner.users.len(),
            sessions = inner.sessions.len(),
            "seeded in-memory directory"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Insert or replace a party.
    pub async fn insert_party(&self, party: PartyRecord) {
        self.inner.write().await.parties.insert(party.id.clone(), party);
    }

    /// Insert or replace a user.
    pub async fn insert_user(&self, user: UserRecord) {
        self.inner.write().await.users.insert(user.id.clone(), user);
    }

    /// Bind a session token to an identity.
    pub async fn insert_session(&self, token: impl Into<String>, identity: Identity) {
        self.inner.write().await.sessions.insert(token.into(), identity);
    }
}

impl IdentityProvider for MemoryDirectory {
    fn resolve_token(&self, token: &str) -> BoxFuture<'static, DirectoryResult<Option<Identity>>> {
        let inner = Arc::clone(&self.inner);
        let token = token.to_string();
        Box::pin(async move { Ok(inner.read().await.sessions.get(&token).cloned()) })
    }
}

impl PartyDirectory for MemoryDirectory {
    fn find_party(&self, id: &str) -> BoxFuture<'static, DirectoryResult<Option<PartyRecord>>> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        Box::pin(async move { Ok(inner.read().await.parties.get(&id).cloned()) })
    }

    fn list_parties(&self) -> BoxFuture<'static, DirectoryResult<Vec<PartyRecord>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { Ok(inner.read().await.parties.values().cloned().collect()) })
    }
}

impl UserDirectory for MemoryDirectory {
    fn find_user(&self, id: &str) -> BoxFuture<'static, DirectoryResult<Option<UserRecord>>> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        Box::pin(async move { Ok(inner.read().await.users.get(&id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn lookups_miss_on_empty_directory() {
        let directory = MemoryDirectory::empty();
        assert!(directory.find_party("p1").await.unwrap().is_none());
        assert!(directory.find_user("u1").await.unwrap().is_none());
        assert!(directory.resolve_token("t1").await.unwrap().is_none());
        assert!(directory.list_parties().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inserted_records_are_found() {
        let directory = MemoryDirectory::empty();
        directory
            .insert_party(PartyRecord {
                id: "p1".into(),
                members: vec!["u1".into()],
                status: "active".into(),
                web_rtc_ids: HashMap::new(),
            })
            .await;
        directory
            .insert_user(UserRecord {
                id: "u1".into(),
                username: "ana".into(),
            })
            .await;
        directory
            .insert_session(
                "t1",
                Identity {
                    user_id: "u1".into(),
                    username: "ana".into(),
                    role: "user".into(),
                },
            )
            .await;

        let party = directory.find_party("p1").await.unwrap().unwrap();
        assert!(party.has_member("u1"));
        let user = directory.find_user("u1").await.unwrap().unwrap();
        assert_eq!(user.username, "ana");
        let identity = directory.resolve_token("t1").await.unwrap().unwrap();
        assert_eq!(identity.user_id, "u1");
    }

    #[tokio::test]
    async fn seed_file_populates_all_catalogues() {
        let path =
            std::env::temp_dir().join(format!("watch-party-back-seed-{}.json", Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{
                "parties": [{"id":"p1","members":["u1"],"status":"active","webRtcIds":{"u1":"w1"}}],
                "users": [{"id":"u1","username":"ana"}],
                "sessions": {"t1": {"userId":"u1","username":"ana","role":"user"}}
            }"#,
        )
        .unwrap();

        let directory = MemoryDirectory::from_seed_path(&path).unwrap();
        let party = directory.find_party("p1").await.unwrap().unwrap();
        assert_eq!(party.web_rtc_owner("w1"), Some("u1"));
        assert_eq!(directory.list_parties().await.unwrap().len(), 1);
        assert!(directory.resolve_token("t1").await.unwrap().is_some());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn seed_parse_failure_is_surfaced() {
        let path =
            std::env::temp_dir().join(format!("watch-party-back-seed-{}.json", Uuid::new_v4()));
        std::fs::write(&path, b"not json").unwrap();

        let err = MemoryDirectory::from_seed_path(&path).unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable { .. }));
        let _ = std::fs::remove_file(path);
    }
}
