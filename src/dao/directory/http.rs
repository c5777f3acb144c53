//! Directory backed by the main application backend over HTTP.
//!
//! Party, user, and session data live in the upstream backend's database;
//! this client only reads the narrow JSON views the synchronization engine
//! needs. Authentication is an optional service bearer token.

use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::dao::directory::{
    DirectoryError, DirectoryResult, Identity, IdentityProvider, PartyDirectory, PartyRecord,
    UserDirectory, UserRecord,
};

/// Convenient result alias returning [`HttpDirectoryError`] failures.
type HttpResult<T> = Result<T, HttpDirectoryError>;

/// Failures that can occur while querying the upstream backend.
#[derive(Debug, Error)]
pub enum HttpDirectoryError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build directory client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send directory request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// The backend returned an unexpected status code.
    #[error("unexpected directory response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode directory response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<HttpDirectoryError> for DirectoryError {
    fn from(err: HttpDirectoryError) -> Self {
        DirectoryError::Unavailable {
            message: err.to_string(),
            source: Box::new(err),
        }
    }
}

/// Directory client querying the upstream backend's JSON API.
#[derive(Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: Arc<str>,
    token: Option<Arc<str>>,
}

impl HttpDirectory {
    /// Build a client for the given base URL (no trailing slash required).
    pub fn new(base_url: &str, token: Option<&str>) -> DirectoryResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| HttpDirectoryError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            token: token.map(Arc::from),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.get(url);
        if let Some(ref token) = self.token {
            builder.bearer_auth(token.as_ref())
        } else {
            builder
        }
    }

    async fn get_json<T>(&self, path: &str) -> HttpResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response =
            self.request(path)
                .send()
                .await
                .map_err(|source| HttpDirectoryError::RequestSend {
                    path: path.to_string(),
                    source,
                })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    HttpDirectoryError::DecodeResponse {
                        path: path.to_string(),
                        source,
                    }
                })
            }
            other => Err(HttpDirectoryError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }
}

impl IdentityProvider for HttpDirectory {
    fn resolve_token(&self, token: &str) -> BoxFuture<'static, DirectoryResult<Option<Identity>>> {
        let directory = self.clone();
        let path = format!("api/sessions/{token}");
        Box::pin(async move { Ok(directory.get_json::<Identity>(&path).await?) })
    }
}

impl PartyDirectory for HttpDirectory {
    fn find_party(&self, id: &str) -> BoxFuture<'static, DirectoryResult<Option<PartyRecord>>> {
        let directory = self.clone();
        let path = format!("api/parties/{id}");
        Box::pin(async move { Ok(directory.get_json::<PartyRecord>(&path).await?) })
    }

    fn list_parties(&self) -> BoxFuture<'static, DirectoryResult<Vec<PartyRecord>>> {
        let directory = self.clone();
        Box::pin(async move {
            let parties = directory
                .get_json::<Vec<PartyRecord>>("api/parties")
                .await?
                .unwrap_or_default();
            Ok(parties)
        })
    }
}

impl UserDirectory for HttpDirectory {
    fn find_user(&self, id: &str) -> BoxFuture<'static, DirectoryResult<Option<UserRecord>>> {
        let directory = self.clone();
        let path = format!("api/users/{id}");
        Box::pin(async move { Ok(directory.get_json::<UserRecord>(&path).await?) })
    }
}
