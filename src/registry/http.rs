use crate::error::{Result, SyncError};
use crate::models::registry::{ArtifactId, ArtifactRecord, Listing};
use crate::registry::Registry;
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::ProgressBar;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Deserialize)]
struct ListingResponse {
    data: Vec<ArtifactRecord>,
}

/// Registry reached over its HTTP JSON API
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistry")
            .field("client", &"Client { ... }")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpRegistry {
    /// Create a client for the registry at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Registry root; `/model` and `/models/...` are appended
    /// * `token` - Optional bearer token sent with every request
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn file_url(&self, id: &ArtifactId, file: &str) -> String {
        format!("{}/models/{}/{}", self.base_url, id, file)
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    fn url(&self) -> &str {
        &self.base_url
    }

    async fn list_artifacts(&self) -> Result<Listing> {
        let url = format!("{}/model", self.base_url);
        tracing::debug!(registry = %self.base_url, "Listing artifacts");

        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::unreachable(&self.base_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::unreachable(
                &self.base_url,
                format!("listing returned {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::unreachable(&self.base_url, e.to_string()))?;

        let listing: ListingResponse = serde_json::from_str(&body).map_err(|e| {
            SyncError::unreachable(&self.base_url, format!("malformed listing: {e}"))
        })?;

        tracing::debug!(
            registry = %self.base_url,
            count = listing.data.len(),
            "Listed artifacts"
        );

        Ok(Listing::new(listing.data))
    }

    async fn download_file(
        &self,
        id: &ArtifactId,
        file: &str,
        dest: &Path,
        progress: &ProgressBar,
    ) -> Result<u64> {
        let url = self.file_url(id, file);
        let existing = tokio::fs::metadata(dest).await.map_or(0, |m| m.len());

        let mut request = self.get(&url);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }

        let response = request.send().await?;
        let status = response.status();

        let mut file_handle = match status {
            StatusCode::PARTIAL_CONTENT => {
                tracing::debug!(%id, file, offset = existing, "Resuming download");
                OpenOptions::new().append(true).open(dest).await?
            }
            StatusCode::RANGE_NOT_SATISFIABLE if existing > 0 => {
                // Nothing left past our offset
                tracing::debug!(%id, file, size = existing, "Partial file already complete");
                return Ok(existing);
            }
            s if s.is_success() => {
                if existing > 0 {
                    tracing::debug!(%id, file, "Registry ignored range request, restarting");
                }
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(dest)
                    .await?
            }
            s => {
                return Err(SyncError::Other(format!("GET {url} returned {s}")));
            }
        };

        let mut written = if status == StatusCode::PARTIAL_CONTENT {
            existing
        } else {
            0
        };

        if let Some(len) = response.content_length() {
            progress.inc_length(len);
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file_handle.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.inc(chunk.len() as u64);
        }

        file_handle.flush().await?;
        file_handle.sync_all().await?;

        Ok(written)
    }
}
