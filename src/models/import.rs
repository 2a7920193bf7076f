use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::archive::{self, ArchiveStore};
use crate::models::locks::IdLocks;
use crate::models::registry::ArtifactId;
use crate::report::Report;
use futures_util::stream::{self, StreamExt};
use std::fs;
use std::path::PathBuf;

/// Result of one `import_all` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSummary {
    /// The archive store held nothing to import
    NoWork,
    Completed {
        imported: usize,
        failed: usize,
        report: Report,
    },
}

enum ImportResult {
    Imported,
    ClaimedElsewhere,
}

/// Unpacks pending bundles from an archive store into the model store
pub struct Importer {
    archives: ArchiveStore,
    model_store: PathBuf,
    locks: IdLocks,
    concurrency: usize,
}

impl Importer {
    pub fn new(
        archives: ArchiveStore,
        model_store: impl Into<PathBuf>,
        locks: IdLocks,
    ) -> Result<Self> {
        let model_store = model_store.into();
        fs::create_dir_all(&model_store)?;

        Ok(Self {
            archives,
            model_store,
            locks,
            concurrency: 1,
        })
    }

    pub fn from_config(config: &Config, locks: IdLocks) -> Result<Self> {
        let archives = ArchiveStore::new(&config.paths.archive_dir)?;
        Ok(Self::new(archives, &config.paths.model_store, locks)?
            .with_concurrency(config.transfer.concurrency))
    }

    /// Import up to `concurrency` archives at once
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Import every pending archive.
    ///
    /// Each archive is claimed before unpacking, deleted once unpacked and
    /// put back when unpacking fails. One archive failing never stops the
    /// others; failed archives are not retried within the same run.
    pub async fn import_all(&self) -> Result<ImportSummary> {
        let recovered = self.archives.recover_stale_claims()?;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered archives from interrupted imports");
        }

        let pending = self.archives.pending()?;
        if pending.is_empty() {
            tracing::info!(dir = %self.archives.dir().display(), "No archives to import");
            return Ok(ImportSummary::NoWork);
        }

        tracing::info!(count = pending.len(), "Importing archives");

        let mut results: Vec<(ArtifactId, Result<ImportResult>)> = stream::iter(pending)
            .map(|id| async move {
                let result = self.import_one(&id).await;
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = Report::new();
        let (mut imported, mut failed) = (0, 0);
        for (id, result) in results {
            match result {
                Ok(ImportResult::Imported) => {
                    imported += 1;
                    report.succeeded(id.archive_name(), "imported");
                }
                Ok(ImportResult::ClaimedElsewhere) => {
                    report.skipped(id.archive_name(), "claimed by another importer");
                }
                Err(e) => {
                    failed += 1;
                    report.failed(id.archive_name(), &e);
                }
            }
        }

        Ok(ImportSummary::Completed {
            imported,
            failed,
            report,
        })
    }

    async fn import_one(&self, id: &ArtifactId) -> Result<ImportResult> {
        let _guard = self.locks.lock(id).await;

        let Some(claim) = self.archives.claim(id)? else {
            tracing::debug!(%id, "Archive vanished before claim");
            return Ok(ImportResult::ClaimedElsewhere);
        };

        let (path, unpack_id, store) = (
            claim.path().to_path_buf(),
            id.clone(),
            self.model_store.clone(),
        );
        let unpacked =
            tokio::task::spawn_blocking(move || archive::unpack(&path, &unpack_id, &store))
                .await
                .map_err(|e| SyncError::Other(format!("Unpack task failed: {e}")))
                .and_then(|r| r);

        match unpacked {
            Ok(()) => {
                claim.complete()?;
                tracing::debug!(%id, store = %self.model_store.display(), "Unpacked");
                Ok(ImportResult::Imported)
            }
            Err(e) => {
                claim.release()?;
                Err(SyncError::ImportFailure {
                    archive: id.archive_name(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
