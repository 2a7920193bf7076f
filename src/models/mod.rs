pub mod archive;
pub mod download;
pub mod import;
pub mod locks;
pub mod manager;
pub mod mirror;
pub mod reconcile;
pub mod registry;

pub use archive::{ArchiveStore, StoredArchive};
pub use download::{BundleFetcher, StagedArtifact};
pub use import::{ImportSummary, Importer};
pub use locks::IdLocks;
pub use manager::{Status, SyncManager};
pub use mirror::{MirrorState, MirrorUploader, RemoteImport, UploadOutcome};
pub use reconcile::missing_from;
pub use registry::{ArtifactId, ArtifactRecord, Listing, Selection, PAYLOAD_FILES};
