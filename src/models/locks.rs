use crate::models::registry::ArtifactId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Per-artifact mutual exclusion shared by the fetcher and the importer.
///
/// Holding the guard for an id means no other task in this process is
/// fetching, staging or importing that id.
#[derive(Debug, Clone, Default)]
pub struct IdLocks {
    inner: Arc<Mutex<HashMap<ArtifactId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl IdLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: &ArtifactId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop slots nobody holds or waits on
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(id.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }
}
