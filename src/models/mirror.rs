//! Pushing one local artifact to the mirror registry
//!
//! Lifecycle of a mirrored artifact:
//!
//! ```text
//! Unmirrored -> Fetching -> Packaged -> Transmitted -> RemoteImportTriggered
//!                                                   \-> RemoteImportUnknown
//! ```
//!
//! The mirror's importer runs out of band, so "triggered" only means the
//! remote command exited cleanly. With `verify_remote_import` the mirror is
//! listed again afterwards and the outcome says whether the artifact showed up.

use crate::error::{Result, SyncError};
use crate::models::download::BundleFetcher;
use crate::models::registry::ArtifactId;
use crate::registry::Registry;
use crate::transport::MirrorTransport;
use std::fmt;

/// Where an artifact is in its mirroring lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Unmirrored,
    Fetching,
    Packaged,
    Transmitted,
    RemoteImportTriggered,
    RemoteImportUnknown,
}

/// What is known about the mirror's import after transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteImport {
    /// Remote importer started and exited cleanly; result unverified
    Triggered,
    /// Remote importer could not be started or reported failure
    Unknown(String),
    /// Verification found the artifact on the mirror
    Confirmed,
    /// Verification did not find the artifact on the mirror
    Unconfirmed,
}

impl fmt::Display for RemoteImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triggered => f.write_str("remote import triggered (unconfirmed)"),
            Self::Unknown(reason) => write!(f, "remote import state unknown: {reason}"),
            Self::Confirmed => f.write_str("remote import confirmed"),
            Self::Unconfirmed => f.write_str("artifact not visible on mirror after import"),
        }
    }
}

/// Result of a single upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The mirror already had the artifact; nothing was fetched or sent
    AlreadyMirrored(ArtifactId),
    Transmitted {
        id: ArtifactId,
        remote_path: String,
        remote_import: RemoteImport,
    },
}

impl UploadOutcome {
    /// Final lifecycle state reached, `None` when nothing had to be mirrored
    #[must_use]
    pub const fn state(&self) -> Option<MirrorState> {
        match self {
            Self::AlreadyMirrored(_) => None,
            Self::Transmitted {
                remote_import: RemoteImport::Unknown(_),
                ..
            } => Some(MirrorState::RemoteImportUnknown),
            Self::Transmitted { .. } => Some(MirrorState::RemoteImportTriggered),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ArtifactId {
        match self {
            Self::AlreadyMirrored(id) | Self::Transmitted { id, .. } => id,
        }
    }
}

/// Uploads artifacts from the local registry to the mirror
pub struct MirrorUploader {
    fetcher: BundleFetcher,
    verify_remote_import: bool,
}

impl MirrorUploader {
    /// `fetcher` should write into a store no importer reads from, since the
    /// bundles it produces are temporary
    #[must_use]
    pub const fn new(fetcher: BundleFetcher, verify_remote_import: bool) -> Self {
        Self {
            fetcher,
            verify_remote_import,
        }
    }

    /// Mirror the artifact `selector` names in `local`.
    ///
    /// An ambiguous name uploads the first match in listing order.
    ///
    /// # Errors
    /// - `SelectorNotFound` if nothing in `local` matches
    /// - `RegistryUnreachable` if either listing fails
    /// - `PartialDownload` if the bundle could not be fetched
    /// - `Transport` if the bundle could not be sent; the local bundle is kept
    pub async fn upload(
        &self,
        local: &dyn Registry,
        mirror: &dyn Registry,
        selector: &str,
        transport: &dyn MirrorTransport,
    ) -> Result<UploadOutcome> {
        let listing = local.list_artifacts().await?;
        let matches = listing.resolve(selector);
        let Some(id) = matches.first().cloned() else {
            return Err(SyncError::SelectorNotFound {
                selector: selector.to_string(),
                suggestion: listing.suggest(selector),
            });
        };
        if matches.len() > 1 {
            tracing::warn!(
                selector,
                %id,
                candidates = matches.len(),
                "Selector is ambiguous, uploading first match; select by identifier to choose"
            );
        }

        let mut state = MirrorState::Unmirrored;

        if mirror.list_artifacts().await?.contains(&id) {
            tracing::info!(%id, mirror = mirror.url(), "Already mirrored");
            return Ok(UploadOutcome::AlreadyMirrored(id));
        }

        advance(&id, &mut state, MirrorState::Fetching);
        let bundle = self.fetcher.fetch(local, &id).await?;
        advance(&id, &mut state, MirrorState::Packaged);

        let remote_path = transport.send(&bundle, mirror.url()).await?;
        advance(&id, &mut state, MirrorState::Transmitted);

        let trigger = transport.trigger_import(mirror.url()).await;

        // Cleanup does not wait for any confirmation from the mirror
        if let Err(e) = tokio::fs::remove_file(&bundle).await {
            tracing::warn!(
                %id,
                bundle = %bundle.display(),
                error = %e,
                "Failed to remove local bundle"
            );
        }

        let remote_import = match trigger {
            Ok(()) => {
                advance(&id, &mut state, MirrorState::RemoteImportTriggered);
                if self.verify_remote_import {
                    verify(mirror, &id).await
                } else {
                    RemoteImport::Triggered
                }
            }
            Err(e) => {
                advance(&id, &mut state, MirrorState::RemoteImportUnknown);
                tracing::warn!(%id, error = %e, "Remote import trigger failed");
                let reason = e.to_string();
                RemoteImport::Unknown(reason.lines().next().unwrap_or_default().to_string())
            }
        };

        Ok(UploadOutcome::Transmitted {
            id,
            remote_path,
            remote_import,
        })
    }
}

async fn verify(mirror: &dyn Registry, id: &ArtifactId) -> RemoteImport {
    match mirror.list_artifacts().await {
        Ok(listing) if listing.contains(id) => RemoteImport::Confirmed,
        Ok(_) => RemoteImport::Unconfirmed,
        Err(e) => RemoteImport::Unknown(format!("verification listing failed: {e}")),
    }
}

fn advance(id: &ArtifactId, state: &mut MirrorState, next: MirrorState) {
    tracing::debug!(%id, from = ?*state, to = ?next, "Mirror state");
    *state = next;
}
