#[cfg(feature = "http-directory")]
pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::error::Error;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for directory lookups.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Error raised by directory backends regardless of the underlying transport.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("directory lookup timed out")]
    Timeout,
}

impl DirectoryError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        DirectoryError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}

/// Authenticated principal resolved from a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user id.
    pub user_id: String,
    /// Display name at resolution time.
    pub username: String,
    /// Upstream role label ("user", "admin", ...); informational here.
    #[serde(default)]
    pub role: String,
}

/// A party as the upstream backend describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyRecord {
    /// Stable party id.
    pub id: String,
    /// User ids allowed to join the party room.
    #[serde(default)]
    pub members: Vec<String>,
    /// Upstream lifecycle label; "active" parties admit legacy signaling.
    #[serde(default)]
    pub status: String,
    /// Signaling id per member id, for members with an open webRTC leg.
    #[serde(default)]
    pub web_rtc_ids: HashMap<String, String>,
}

impl PartyRecord {
    /// Whether `user_id` appears in the member list.
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|member| member == user_id)
    }

    /// Member id owning `signaling_id`, if any member registered it.
    pub fn web_rtc_owner(&self, signaling_id: &str) -> Option<&str> {
        self.web_rtc_ids
            .iter()
            .find(|(_, registered)| registered.as_str() == signaling_id)
            .map(|(member, _)| member.as_str())
    }

    /// Whether the upstream lifecycle label marks the party active.
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// A user as the upstream backend describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Stable user id.
    pub id: String,
    /// Display name.
    pub username: String,
}

/// Resolves session tokens presented on WebSocket connect.
pub trait IdentityProvider: Send + Sync {
    /// `None` when the token is unknown or expired.
    fn resolve_token(&self, token: &str) -> BoxFuture<'static, DirectoryResult<Option<Identity>>>;
}

/// Read-only view of the party catalogue.
pub trait PartyDirectory: Send + Sync {
    /// Fetch one party; `None` when it does not exist.
    fn find_party(&self, id: &str) -> BoxFuture<'static, DirectoryResult<Option<PartyRecord>>>;
    /// Fetch every party; used by signaling authorization.
    fn list_parties(&self) -> BoxFuture<'static, DirectoryResult<Vec<PartyRecord>>>;
}

/// Read-only view of the user catalogue.
pub trait UserDirectory: Send + Sync {
    /// Fetch one user; `None` when it does not exist.
    fn find_user(&self, id: &str) -> BoxFuture<'static, DirectoryResult<Option<UserRecord>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party_with_web_rtc() -> PartyRecord {
        PartyRecord {
            id: "p1".into(),
            members: vec!["u1".into(), "u2".into()],
            status: "active".into(),
            web_rtc_ids: HashMap::from([("u2".to_string(), "w2".to_string())]),
        }
    }

    #[test]
    fn web_rtc_owner_resolves_by_value() {
        let party = party_with_web_rtc();
        assert_eq!(party.web_rtc_owner("w2"), Some("u2"));
        assert_eq!(party.web_rtc_owner("w1"), None);
    }

    #[test]
    fn member_check_is_exact() {
        let party = party_with_web_rtc();
        assert!(party.has_member("u1"));
        assert!(!party.has_member("u10"));
    }

    #[test]
    fn party_record_tolerates_missing_optional_fields() {
        let party: PartyRecord = serde_json::from_str(r#"{"id":"p9"}"#).unwrap();
        assert!(party.members.is_empty());
        assert!(party.web_rtc_ids.is_empty());
        assert!(!party.is_active());
    }
}
