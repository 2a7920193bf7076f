use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::archive::{ArchiveStore, StoredArchive};
use crate::models::download::{BundleFetcher, StagedArtifact};
use crate::models::import::{ImportSummary, Importer};
use crate::models::locks::IdLocks;
use crate::models::mirror::{MirrorUploader, RemoteImport, UploadOutcome};
use crate::models::reconcile::missing_from;
use crate::models::registry::{ArtifactId, Selection};
use crate::registry::{HttpRegistry, Registry};
use crate::report::Report;
use crate::transport::MirrorTransport;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::time::Duration;

/// Local state shown by `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub archives: Vec<StoredArchive>,
    pub staged: Vec<StagedArtifact>,
}

/// Batch front-end over the sync pipeline: one method per CLI verb
pub struct SyncManager {
    config: Config,
    locks: IdLocks,
    source: Box<dyn Registry>,
    local: Box<dyn Registry>,
    mirror: Option<Box<dyn Registry>>,
}

impl SyncManager {
    /// Create manager talking to the configured registries over HTTP
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let timeout = Duration::from_secs(config.transfer.request_timeout_secs);
        let token = config.registries.token.clone();
        let source = HttpRegistry::new(&config.registries.source, token.clone(), timeout)?;
        let local = HttpRegistry::new(&config.registries.local, token.clone(), timeout)?;
        let mirror = config
            .registries
            .mirror
            .as_deref()
            .map(|url| HttpRegistry::new(url, token.clone(), timeout))
            .transpose()?;

        Ok(Self::with_registries(
            config,
            Box::new(source),
            Box::new(local),
            mirror.map(|m| Box::new(m) as Box<dyn Registry>),
        ))
    }

    /// Create manager over arbitrary registry implementations
    #[must_use]
    pub fn with_registries(
        config: Config,
        source: Box<dyn Registry>,
        local: Box<dyn Registry>,
        mirror: Option<Box<dyn Registry>>,
    ) -> Self {
        Self {
            config,
            locks: IdLocks::new(),
            source,
            local,
            mirror,
        }
    }

    /// Download every selected artifact the local registry lacks into the
    /// archive store.
    ///
    /// # Errors
    /// Only when a registry listing is unusable; per-artifact failures are
    /// entries in the returned report.
    pub async fn download(&self, selections: &[Selection]) -> Result<Report> {
        let source = self.source.list_artifacts().await?;
        let local = self.local.list_artifacts().await?;
        let fetcher = BundleFetcher::from_config(&self.config, self.locks.clone())?;

        let mut report = Report::new();
        let mut skipped = BTreeSet::new();
        let mut work = BTreeSet::new();

        for selection in selections {
            let mut candidates = source.select(selection);
            if let Selection::Selector(selector) = selection {
                if candidates.is_empty() {
                    // Known locally only: nothing to download
                    candidates = local.select(selection);
                }
                if candidates.is_empty() {
                    report.failed(
                        selector.as_str(),
                        &SyncError::SelectorNotFound {
                            selector: selector.clone(),
                            suggestion: source.suggest(selector),
                        },
                    );
                    continue;
                }
            }

            for id in candidates.into_iter().filter(|id| local.contains(id)) {
                if skipped.insert(id.clone()) {
                    report.skipped(id.as_str(), "already present in local registry");
                }
            }

            for id in missing_from(&local, &source, selection) {
                if fetcher.archives().contains(&id) {
                    if skipped.insert(id.clone()) {
                        report.skipped(id.as_str(), "bundle already waiting for import");
                    }
                } else {
                    work.insert(id);
                }
            }
        }

        if work.is_empty() {
            tracing::info!("Nothing to download");
            return Ok(report);
        }

        tracing::info!(
            count = work.len(),
            source = self.source.url(),
            "Downloading artifacts"
        );

        let source_registry = self.source.as_ref();
        let mut results: Vec<(ArtifactId, Result<_>)> = stream::iter(work)
            .map(|id| {
                let fetcher = &fetcher;
                async move {
                    let result = fetcher.fetch(source_registry, &id).await;
                    (id, result)
                }
            })
            .buffer_unordered(self.config.transfer.concurrency.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, result) in results {
            match result {
                Ok(path) => {
                    report.succeeded(id.as_str(), format!("packaged {}", path.display()));
                }
                Err(e) => report.failed(id.as_str(), &e),
            }
        }

        Ok(report)
    }

    /// Import all pending bundles into the model store
    pub async fn import(&self) -> Result<ImportSummary> {
        Importer::from_config(&self.config, self.locks.clone())?
            .import_all()
            .await
    }

    /// Upload each selected local artifact to the mirror.
    ///
    /// Selectors are handled one after another; a bad selector or failed
    /// transfer is reported and the rest still run.
    ///
    /// # Errors
    /// When no mirror is configured or a registry listing is unusable
    pub async fn upload(
        &self,
        selections: &[Selection],
        transport: &dyn MirrorTransport,
    ) -> Result<Report> {
        let mirror = self.mirror.as_deref().ok_or_else(|| {
            SyncError::Config("registries.mirror is not set; upload needs a mirror".to_string())
        })?;

        let mut selectors = Vec::new();
        for selection in selections {
            match selection {
                Selection::All => {
                    let listing = self.local.list_artifacts().await?;
                    selectors.extend(listing.ids().iter().map(|id| id.as_str().to_string()));
                }
                Selection::Selector(s) => selectors.push(s.clone()),
            }
        }

        let upload_dir = &self.config.paths.upload_dir;
        let fetcher = BundleFetcher::new(
            upload_dir.join("staging"),
            ArchiveStore::new(upload_dir)?,
            self.locks.clone(),
        )?
        .with_retries(
            self.config.transfer.download_attempts,
            Duration::from_millis(self.config.transfer.retry_delay_ms),
        )
        .with_progress(self.config.transfer.progress);
        let uploader = MirrorUploader::new(fetcher, self.config.mirror.verify_remote_import);

        tracing::info!(
            count = selectors.len(),
            mirror = mirror.url(),
            transport = transport.name(),
            "Uploading artifacts"
        );

        let mut report = Report::new();
        for selector in selectors {
            let result = uploader
                .upload(self.local.as_ref(), mirror, &selector, transport)
                .await;
            match result {
                Ok(UploadOutcome::AlreadyMirrored(id)) => {
                    report.skipped(selector, format!("{id} already mirrored"));
                }
                Ok(UploadOutcome::Transmitted {
                    id,
                    remote_path,
                    remote_import,
                }) => match remote_import {
                    RemoteImport::Triggered | RemoteImport::Confirmed => {
                        report.succeeded(
                            selector,
                            format!("{id} sent to {remote_path}, {remote_import}"),
                        );
                    }
                    RemoteImport::Unknown(_) | RemoteImport::Unconfirmed => {
                        report.failed(
                            selector,
                            &SyncError::Transport(format!(
                                "{id} sent to {remote_path}, {remote_import}"
                            )),
                        );
                    }
                },
                Err(e @ SyncError::RegistryUnreachable { .. }) => return Err(e),
                Err(e) => report.failed(selector, &e),
            }
        }

        Ok(report)
    }

    /// Pending archives and interrupted downloads
    pub fn status(&self) -> Result<Status> {
        let archives = ArchiveStore::new(&self.config.paths.archive_dir)?.entries()?;
        let staged = BundleFetcher::from_config(&self.config, self.locks.clone())?.staged()?;
        Ok(Status { archives, staged })
    }
}
