//! Remote API client
//!
//! The engine talks to the server through [`RemoteApi`], one REST resource
//! per collection:
//!
//! | Operation | Request                     |
//! |-----------|-----------------------------|
//! | pull      | `GET /api/<c>`              |
//! | create    | `POST /api/<c>` + record    |
//! | update    | `PUT /api/<c>/<id>` + record|
//! | delete    | `DELETE /api/<c>/<id>`      |
//!
//! Only the success or failure of a write is consumed; response bodies of
//! POST/PUT/DELETE are ignored. [`HttpRemote`] implements the contract with
//! reqwest; tests substitute scripted implementations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::models::{Collection, Record};

/// Errors from a single network operation
#[derive(Error, Debug)]
pub enum RemoteError {
    /// No API base URL is configured
    #[error("No API URL configured. Set api_url in the config file or FIELDSYNC_API_URL.")]
    NotConfigured,

    #[error("Invalid API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Connection, TLS or protocol failure
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{method} {url} returned HTTP {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },

    /// Response body was not the expected JSON
    #[error("Could not decode response from {url}: {details}")]
    Decode { url: String, details: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Timeout(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The server side of synchronization
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Full snapshot of a collection
    async fn fetch_all(&self, collection: Collection) -> RemoteResult<Vec<Record>>;

    async fn create(&self, collection: Collection, record: &Record) -> RemoteResult<()>;

    async fn update(&self, collection: Collection, id: &str, record: &Record) -> RemoteResult<()>;

    /// Delete a record; a record the server no longer has counts as deleted
    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()>;
}

/// Run a network operation under a deadline
///
/// Expiry is reported as [`RemoteError::Timeout`], an ordinary failure.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}

/// reqwest implementation of [`RemoteApi`]
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
}

impl HttpRemote {
    /// Create a client for the server at `base_url`
    ///
    /// `request_timeout` bounds every request at the transport level too.
    pub fn new(base_url: &str, request_timeout: Duration) -> RemoteResult<Self> {
        let parsed = Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical URL".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| RemoteError::Transport {
                url: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    pub fn from_config(config: &Config) -> RemoteResult<Self> {
        let base_url = config.api_url.as_deref().ok_or(RemoteError::NotConfigured)?;
        Self::new(base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `<base>/api/<endpoint>[/<id>]`, with the id percent-encoded
    fn url(&self, collection: Collection, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("api").push(collection.endpoint());
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }

    async fn send(
        &self,
        method: &'static str,
        url: Url,
        request: reqwest::RequestBuilder,
    ) -> RemoteResult<reqwest::Response> {
        debug!(method, url = %url, "Sending request");
        request
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                url: url.to_string(),
                source,
            })
    }
}

fn status_error(method: &'static str, url: &Url, status: StatusCode) -> RemoteError {
    RemoteError::Status {
        method,
        url: url.to_string(),
        status: status.as_u16(),
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch_all(&self, collection: Collection) -> RemoteResult<Vec<Record>> {
        let url = self.url(collection, None);
        let response = self
            .send("GET", url.clone(), self.client.get(url.clone()))
            .await?;

        if !response.status().is_success() {
            return Err(status_error("GET", &url, response.status()));
        }

        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| RemoteError::Decode {
                url: url.to_string(),
                details: e.to_string(),
            })
    }

    async fn create(&self, collection: Collection, record: &Record) -> RemoteResult<()> {
        let url = self.url(collection, None);
        let response = self
            .send("POST", url.clone(), self.client.post(url.clone()).json(record))
            .await?;

        if !response.status().is_success() {
            return Err(status_error("POST", &url, response.status()));
        }
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, record: &Record) -> RemoteResult<()> {
        let url = self.url(collection, Some(id));
        let response = self
            .send("PUT", url.clone(), self.client.put(url.clone()).json(record))
            .await?;

        if !response.status().is_success() {
            return Err(status_error("PUT", &url, response.status()));
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> RemoteResult<()> {
        let url = self.url(collection, Some(id));
        let response = self
            .send("DELETE", url.clone(), self.client.delete(url.clone()))
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(status_error("DELETE", &url, status))
    }
}

/// Stand-in used when no API URL is configured; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredRemote;

#[async_trait]
impl RemoteApi for UnconfiguredRemote {
    async fn fetch_all(&self, _collection: Collection) -> RemoteResult<Vec<Record>> {
        Err(RemoteError::NotConfigured)
    }

    async fn create(&self, _collection: Collection, _record: &Record) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn update(&self, _collection: Collection, _id: &str, _record: &Record) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }

    async fn delete(&self, _collection: Collection, _id: &str) -> RemoteResult<()> {
        Err(RemoteError::NotConfigured)
    }
}
