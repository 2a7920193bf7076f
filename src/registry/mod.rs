pub mod http;

use crate::error::Result;
use crate::models::registry::{ArtifactId, Listing};
use async_trait::async_trait;
use indicatif::ProgressBar;
use std::path::Path;

pub use http::HttpRegistry;

/// Read-only view of a model registry
#[async_trait]
pub trait Registry: Send + Sync {
    /// Base URL, used for logging and error reports
    fn url(&self) -> &str;

    /// Fetch the registry's artifact listing
    ///
    /// Fails with `RegistryUnreachable` when the listing is absent or malformed.
    async fn list_artifacts(&self) -> Result<Listing>;

    /// Download one payload file of an artifact into `dest`
    ///
    /// Bytes already present in `dest` are kept and the transfer resumes after
    /// them when the registry supports it.
    ///
    /// # Returns
    /// Final size of `dest` in bytes
    async fn download_file(
        &self,
        id: &ArtifactId,
        file: &str,
        dest: &Path,
        progress: &ProgressBar,
    ) -> Result<u64>;

    /// Resolve a selector against a fresh listing (name first, then identifier)
    async fn find_by_name_or_identifier(&self, selector: &str) -> Result<Vec<ArtifactId>> {
        Ok(self.list_artifacts().await?.resolve(selector))
    }
}
