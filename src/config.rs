//! Application-level configuration loading for snapshots, directories, and internal auth.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WATCH_PARTY_BACK_CONFIG_PATH";
/// Default path of the registry snapshot file.
const DEFAULT_SNAPSHOT_PATH: &str = "data/party-sync.json";
/// Default seconds between two registry snapshots.
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 900;
/// Default seconds granted to a directory lookup during a join.
const DEFAULT_JOIN_LOOKUP_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    snapshot_path: PathBuf,
    snapshot_interval: Duration,
    join_lookup_timeout: Duration,
    directory: DirectoryConfig,
    internal_token: Option<String>,
}

#[derive(Debug, Clone)]
/// Which directory backend serves party, user, and session lookups.
pub enum DirectoryConfig {
    /// Query the main application backend over HTTP.
    Http {
        /// Base URL of the backend, without a trailing slash.
        base_url: String,
        /// Optional bearer token attached to every directory request.
        token: Option<String>,
    },
    /// Serve lookups from an in-process map seeded at startup.
    Memory {
        /// Optional JSON seed file with parties, users, and sessions.
        seed_path: Option<PathBuf>,
    },
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        snapshot = %app_config.snapshot_path.display(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Path of the registry snapshot file.
    pub fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    /// Interval between two periodic registry snapshots.
    pub fn snapshot_interval(&self) -> Duration {
        self.snapshot_interval
    }

    /// Upper bound on the party lookup performed while handling a join.
    pub fn join_lookup_timeout(&self) -> Duration {
        self.join_lookup_timeout
    }

    /// Directory backend selection.
    pub fn directory(&self) -> &DirectoryConfig {
        &self.directory
    }

    /// Shared secret expected in `X-Internal-Token` on internal routes.
    pub fn internal_token(&self) -> Option<&str> {
        self.internal_token.as_deref()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS),
            join_lookup_timeout: Duration::from_secs(DEFAULT_JOIN_LOOKUP_TIMEOUT_SECS),
            directory: DirectoryConfig::Memory { seed_path: None },
            internal_token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    snapshot: Option<RawSnapshot>,
    directory: Option<RawDirectory>,
    join_lookup_timeout_secs: Option<u64>,
    internal_token: Option<String>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of the `snapshot` section.
struct RawSnapshot {
    path: Option<PathBuf>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
/// JSON representation of the `directory` section.
enum RawDirectory {
    Http {
        base_url: String,
        token: Option<String>,
    },
    Memory {
        seed_path: Option<PathBuf>,
    },
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        let (snapshot_path, snapshot_interval) = match value.snapshot {
            Some(raw) => (
                raw.path.unwrap_or(defaults.snapshot_path),
                raw.interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.snapshot_interval),
            ),
            None => (defaults.snapshot_path, defaults.snapshot_interval),
        };
        let directory = match value.directory {
            Some(RawDirectory::Http { base_url, token }) => DirectoryConfig::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                token,
            },
            Some(RawDirectory::Memory { seed_path }) => DirectoryConfig::Memory { seed_path },
            None => defaults.directory,
        };
        Self {
            snapshot_path,
            snapshot_interval,
            join_lookup_timeout: value
                .join_lookup_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.join_lookup_timeout),
            directory,
            internal_token: value.internal_token,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "snapshot": {"path": "/tmp/snap.json", "interval_secs": 60},
                "directory": {"mode": "http", "base_url": "http://backend:4000/", "token": "s3cret"},
                "join_lookup_timeout_secs": 2,
                "internal_token": "hook-token"
            }"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.snapshot_path(), &PathBuf::from("/tmp/snap.json"));
        assert_eq!(config.snapshot_interval(), Duration::from_secs(60));
        assert_eq!(config.join_lookup_timeout(), Duration::from_secs(2));
        assert_eq!(config.internal_token(), Some("hook-token"));
        match config.directory() {
            DirectoryConfig::Http { base_url, token } => {
                assert_eq!(base_url, "http://backend:4000");
                assert_eq!(token.as_deref(), Some("s3cret"));
            }
            other => panic!("expected http directory, got {other:?}"),
        }
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.snapshot_path(), &PathBuf::from(DEFAULT_SNAPSHOT_PATH));
        assert_eq!(
            config.snapshot_interval(),
            Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS)
        );
        assert!(config.internal_token().is_none());
        assert!(matches!(
            config.directory(),
            DirectoryConfig::Memory { seed_path: None }
        ));
    }
}
