use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::archive::{self, ArchiveStore};
use crate::models::locks::IdLocks;
use crate::models::registry::{ArtifactId, PAYLOAD_FILES};
use crate::registry::Registry;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Artifact with leftover staging state (an interrupted fetch)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub id: ArtifactId,
    /// Payload files fully downloaded
    pub complete: Vec<String>,
    /// Bytes held in `.part` files
    pub partial_bytes: u64,
}

/// Fetches an artifact's payload files and packages them into a bundle.
///
/// Downloads land in `staging_root/<id>/`, named `<file>.part` until complete.
/// Staging survives failures so the next fetch resumes instead of restarting.
pub struct BundleFetcher {
    staging_root: PathBuf,
    archives: ArchiveStore,
    locks: IdLocks,
    attempts: u32,
    retry_delay: Duration,
    progress: Option<MultiProgress>,
}

impl BundleFetcher {
    /// Create new fetcher writing bundles into `archives`
    pub fn new(
        staging_root: impl Into<PathBuf>,
        archives: ArchiveStore,
        locks: IdLocks,
    ) -> Result<Self> {
        let staging_root = staging_root.into();
        fs::create_dir_all(&staging_root)?;

        Ok(Self {
            staging_root,
            archives,
            locks,
            attempts: 1,
            retry_delay: Duration::ZERO,
            progress: None,
        })
    }

    /// Create fetcher for the configured staging root and archive store
    pub fn from_config(config: &Config, locks: IdLocks) -> Result<Self> {
        let archives = ArchiveStore::new(&config.paths.archive_dir)?;
        Ok(Self::new(&config.paths.staging_root, archives, locks)?
            .with_retries(
                config.transfer.download_attempts,
                Duration::from_millis(config.transfer.retry_delay_ms),
            )
            .with_progress(config.transfer.progress))
    }

    /// Retry each file up to `attempts` times, waiting `delay * attempt` between tries
    #[must_use]
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Show download progress bars on stderr
    #[must_use]
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled.then(MultiProgress::new);
        self
    }

    #[must_use]
    pub const fn archives(&self) -> &ArchiveStore {
        &self.archives
    }

    /// Staging directory for `id`
    #[must_use]
    pub fn staging_dir(&self, id: &ArtifactId) -> PathBuf {
        self.staging_root.join(id.as_str())
    }

    /// Fetch `id` from `registry` and package it.
    ///
    /// Returns the existing bundle without touching the network when one is
    /// already in the archive store.
    ///
    /// # Errors
    /// - `PartialDownload` if any payload file could not be retrieved; the
    ///   staging directory is kept for the next attempt
    pub async fn fetch(&self, registry: &dyn Registry, id: &ArtifactId) -> Result<PathBuf> {
        let _guard = self.locks.lock(id).await;

        let archive_path = self.archives.path_for(id);
        if archive_path.is_file() {
            tracing::info!(%id, path = %archive_path.display(), "Bundle already packaged, skipping fetch");
            return Ok(archive_path);
        }

        let staging = self.staging_dir(id);
        tokio::fs::create_dir_all(&staging).await?;

        tracing::info!(%id, registry = registry.url(), "Fetching artifact");

        let bar = self.progress_bar(id);
        let mut missing = Vec::new();
        let mut total = 0;
        for file in PAYLOAD_FILES {
            match self.fetch_file(registry, id, file, &staging, &bar).await {
                Ok(size) => total += size,
                Err(e) => {
                    tracing::warn!(%id, file, error = %e, "Failed to retrieve payload file");
                    missing.push(file.to_string());
                }
            }
        }
        bar.finish_and_clear();

        if !missing.is_empty() {
            return Err(SyncError::PartialDownload {
                id: id.to_string(),
                missing,
            });
        }

        let (pack_staging, pack_id, pack_dest) =
            (staging.clone(), id.clone(), archive_path.clone());
        tokio::task::spawn_blocking(move || archive::pack(&pack_staging, &pack_id, &pack_dest))
            .await
            .map_err(|e| SyncError::Other(format!("Packaging task failed: {e}")))??;

        tokio::fs::remove_dir_all(&staging).await?;

        tracing::info!(
            %id,
            size = %format_bytes(total),
            path = %archive_path.display(),
            "Packaged artifact"
        );

        Ok(archive_path)
    }

    async fn fetch_file(
        &self,
        registry: &dyn Registry,
        id: &ArtifactId,
        file: &str,
        staging: &Path,
        bar: &ProgressBar,
    ) -> Result<u64> {
        let final_path = staging.join(file);
        if let Ok(metadata) = tokio::fs::metadata(&final_path).await {
            tracing::debug!(%id, file, "Already staged");
            return Ok(metadata.len());
        }

        let part_path = staging.join(format!("{file}.part"));
        let mut attempt = 1;
        loop {
            match registry.download_file(id, file, &part_path, bar).await {
                Ok(size) => {
                    tokio::fs::rename(&part_path, &final_path).await?;
                    tracing::debug!(%id, file, size = %format_bytes(size), "Downloaded");
                    return Ok(size);
                }
                Err(e) if attempt < self.attempts => {
                    tracing::debug!(%id, file, attempt, error = %e, "Download attempt failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn progress_bar(&self, id: &ArtifactId) -> ProgressBar {
        let Some(multi) = &self.progress else {
            return ProgressBar::hidden();
        };

        let style = ProgressStyle::with_template(
            "{msg:12!} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bar.set_message(id.to_string());
        bar
    }

    /// Artifacts with an interrupted fetch in the staging root
    pub fn staged(&self) -> Result<Vec<StagedArtifact>> {
        let mut staged = Vec::new();

        for entry in fs::read_dir(&self.staging_root)?.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(ArtifactId::new) else {
                continue;
            };

            let dir = entry.path();
            let complete = PAYLOAD_FILES
                .iter()
                .filter(|file| dir.join(file).is_file())
                .map(|file| (*file).to_string())
                .collect();
            let partial_bytes = PAYLOAD_FILES
                .iter()
                .filter_map(|file| fs::metadata(dir.join(format!("{file}.part"))).ok())
                .map(|m| m.len())
                .sum();

            staged.push(StagedArtifact {
                id,
                complete,
                partial_bytes,
            });
        }

        staged.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(staged)
    }
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
