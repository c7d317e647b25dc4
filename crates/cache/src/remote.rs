//! Remote cache tier.
//!
//! A remote store exchanges entry archives (see [`crate::archive`]) keyed by
//! fingerprint. Two backends share the contract: an HTTP server speaking
//! `GET`/`PUT {base}/entries/{fingerprint}` and a shared directory holding
//! `entries/{fingerprint}.tar.zst` files.

use crate::cas::write_atomic;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::{Error, Fingerprint, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A cache tier shared across machines or project copies.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the archive stored under `fingerprint`. `Ok(None)` is a miss.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>>;

    /// Upload an archive under `fingerprint`, replacing any previous one.
    async fn put(&self, fingerprint: &Fingerprint, archive: Vec<u8>) -> Result<()>;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;
}

/// HTTP remote cache backend
pub struct HttpRemoteStore {
    name: String,
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpRemoteStore {
    /// Create a backend for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: base_url.clone(),
            base_url,
            token,
            client,
            retry,
        })
    }

    fn entry_url(&self, fingerprint: &Fingerprint) -> String {
        format!("{}/entries/{}", self.base_url, fingerprint.to_hex())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn transport_error(&self, e: &reqwest::Error) -> Error {
        Error::remote_unavailable(&self.name, e.to_string())
    }

    fn status_error(&self, operation: &str, status: reqwest::StatusCode) -> Error {
        Error::RemoteStatus {
            store: self.name.clone(),
            operation: operation.to_string(),
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        let url = self.entry_url(fingerprint);
        let url = url.as_str();
        retry_with_backoff(&self.retry, "remote get", move || async move {
            let response = self
                .authorize(self.client.get(url))
                .send()
                .await
                .map_err(|e| self.transport_error(&e))?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(self.status_error("get", status));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| self.transport_error(&e))?;
            debug!(%fingerprint, bytes = body.len(), "Fetched remote cache entry");
            Ok(Some(body.to_vec()))
        })
        .await
    }

    async fn put(&self, fingerprint: &Fingerprint, archive: Vec<u8>) -> Result<()> {
        let url = self.entry_url(fingerprint);
        let (url, archive) = (url.as_str(), &archive);
        retry_with_backoff(&self.retry, "remote put", move || async move {
            let response = self
                .authorize(self.client.put(url))
                .header(reqwest::header::CONTENT_TYPE, "application/zstd")
                .body(archive.clone())
                .send()
                .await
                .map_err(|e| self.transport_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(self.status_error("put", status));
            }
            debug!(%fingerprint, "Pushed remote cache entry");
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Remote cache backed by a shared directory (network mount, CI volume).
pub struct DirectoryRemoteStore {
    name: String,
    root: PathBuf,
}

impl DirectoryRemoteStore {
    /// Use `root` as the shared cache directory. It must already exist.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: root.display().to_string(),
            root,
        }
    }

    /// Shared directory root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn archive_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join("entries")
            .join(format!("{}.tar.zst", fingerprint.to_hex()))
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::remote_unavailable(
                &self.name,
                "shared cache directory does not exist",
            ))
        }
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemoteStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>> {
        self.ensure_reachable()?;
        let path = self.archive_path(fingerprint);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::remote_unavailable(
                &self.name,
                format!("read {}: {e}", path.display()),
            )),
        }
    }

    async fn put(&self, fingerprint: &Fingerprint, archive: Vec<u8>) -> Result<()> {
        self.ensure_reachable()?;
        let path = self.archive_path(fingerprint);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &archive))
            .await
            .map_err(|e| Error::remote_unavailable(name, format!("write task failed: {e}")))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}
