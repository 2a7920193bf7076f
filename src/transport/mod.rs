pub mod ssh;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

pub use ssh::SshTransport;

/// Moves bundles to a mirror host and starts its importer there
#[async_trait]
pub trait MirrorTransport: Send + Sync {
    /// Transport name for logging/debugging
    fn name(&self) -> &str;

    /// Copy a local bundle to the mirror host
    ///
    /// # Returns
    /// Where the bundle landed on the remote side
    async fn send(&self, bundle: &Path, mirror_registry: &str) -> Result<String>;

    /// Ask the mirror host to import the bundles it has received
    async fn trigger_import(&self, mirror_registry: &str) -> Result<()>;
}
