use crate::error::{Result, SyncError};
use crate::models::registry::{ArtifactId, PAYLOAD_FILES};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

const ARCHIVE_SUFFIX: &str = ".tar.gz";
const CLAIM_MARKER: &str = ".tar.gz.claim-";

/// A bundle waiting in the store, as shown by `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    pub id: ArtifactId,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Process currently importing it, if claimed
    pub claimed_by: Option<i32>,
}

/// Directory of completed `<id>.tar.gz` bundles awaiting import.
///
/// There is no index file: an archive being present under its plain name is
/// the "pending import" state.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

/// Exclusive ownership of one archive, taken by renaming it to
/// `<id>.tar.gz.claim-<pid>`
#[derive(Debug)]
pub struct Claim {
    id: ArtifactId,
    path: PathBuf,
    original: PathBuf,
}

impl ArchiveStore {
    /// Open (creating if needed) the store at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a complete bundle for `id` lives at
    #[must_use]
    pub fn path_for(&self, id: &ArtifactId) -> PathBuf {
        self.dir.join(id.archive_name())
    }

    #[must_use]
    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.path_for(id).is_file()
    }

    /// Identifiers with an unclaimed bundle, sorted
    pub fn pending(&self) -> Result<Vec<ArtifactId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(ARCHIVE_SUFFIX) {
                if entry.path().is_file() {
                    ids.push(ArtifactId::new(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Every bundle in the store, claimed or not
    pub fn entries(&self) -> Result<Vec<StoredArchive>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }

            let (id, claimed_by) = if let Some((id, pid)) = parse_claim(name) {
                (id, Some(pid))
            } else if let Some(id) = name.strip_suffix(ARCHIVE_SUFFIX) {
                (ArtifactId::new(id), None)
            } else {
                continue;
            };

            let metadata = entry.metadata().ok();
            entries.push(StoredArchive {
                id,
                size_bytes: metadata.as_ref().map_or(0, fs::Metadata::len),
                modified: metadata
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from),
                claimed_by,
            });
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    /// Claim the bundle for `id` for this process.
    ///
    /// Returns `None` when there is no such bundle, including when another
    /// importer claimed it first.
    pub fn claim(&self, id: &ArtifactId) -> Result<Option<Claim>> {
        let original = self.path_for(id);
        let path = self
            .dir
            .join(format!("{}{CLAIM_MARKER}{}", id, std::process::id()));

        match fs::rename(&original, &path) {
            Ok(()) => Ok(Some(Claim {
                id: id.clone(),
                path,
                original,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Return claims left behind by importers that are no longer running.
    ///
    /// # Returns
    /// Number of archives put back in the pending state
    pub fn recover_stale_claims(&self) -> Result<usize> {
        let own_pid = std::process::id();
        let mut recovered = 0;

        for entry in fs::read_dir(&self.dir)?.flatten() {
            let name = entry.file_name();
            let Some((id, pid)) = name.to_str().and_then(parse_claim) else {
                continue;
            };
            if u32::try_from(pid).ok() == Some(own_pid) || process_alive(pid) {
                continue;
            }

            if self.recover_claim(&entry.path(), &id, pid)? {
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    /// Put one dead importer's claim back, returning whether an archive
    /// became pending again. A claim that vanished meanwhile was recovered
    /// by another importer.
    fn recover_claim(&self, claim: &Path, id: &ArtifactId, pid: i32) -> Result<bool> {
        let original = self.path_for(id);
        let result = if original.exists() {
            // A newer bundle arrived since; the stale copy is redundant
            tracing::warn!(%id, pid, "Dropping stale claim superseded by a newer archive");
            fs::remove_file(claim).map(|()| false)
        } else {
            tracing::warn!(%id, pid, "Recovering archive claimed by a dead importer");
            fs::rename(claim, &original).map(|()| true)
        };

        match result {
            Ok(recovered) => Ok(recovered),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%id, pid, "Stale claim already recovered elsewhere");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Claim {
    #[must_use]
    pub const fn id(&self) -> &ArtifactId {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put the archive back under its pending name
    pub fn release(self) -> Result<()> {
        fs::rename(&self.path, &self.original)?;
        Ok(())
    }

    /// Delete the archive; the import it guarded is done
    pub fn complete(self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

fn parse_claim(name: &str) -> Option<(ArtifactId, i32)> {
    let (id, pid) = name.split_once(CLAIM_MARKER)?;
    let pid = pid.parse().ok()?;
    Some((ArtifactId::new(id), pid))
}

fn process_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(errno) => errno != Errno::ESRCH,
    }
}

/// Package a complete staging directory into `dest` atomically.
///
/// Entries are written as `<id>/<file>` in payload order. The archive is
/// built under a hidden name next to `dest` and renamed into place, so `dest`
/// never exists in a partial state.
pub fn pack(staging_dir: &Path, id: &ArtifactId, dest: &Path) -> Result<()> {
    let missing: Vec<String> = PAYLOAD_FILES
        .iter()
        .filter(|file| !staging_dir.join(file).is_file())
        .map(|file| (*file).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::PartialDownload {
            id: id.to_string(),
            missing,
        });
    }

    let parent = dest
        .parent()
        .ok_or_else(|| SyncError::Archive(format!("No parent for {}", dest.display())))?;
    let tmp_path = parent.join(format!(".{}.partial-{}", id.archive_name(), std::process::id()));

    let result = write_archive(staging_dir, id, &tmp_path);
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, dest)?;
    Ok(())
}

fn write_archive(staging_dir: &Path, id: &ArtifactId, tmp_path: &Path) -> Result<()> {
    let file = File::create(tmp_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for name in PAYLOAD_FILES {
        builder
            .append_path_with_name(staging_dir.join(name), format!("{id}/{name}"))
            .map_err(|e| SyncError::Archive(format!("Failed to add {name}: {e}")))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| SyncError::Archive(format!("Failed to finish tar stream: {e}")))?;
    let file = encoder
        .finish()
        .map_err(|e| SyncError::Archive(format!("Failed to finish gzip stream: {e}")))?;
    file.sync_all()?;
    Ok(())
}

/// Unpack a bundle for `id` into `store`, yielding `store/<id>/<file>`.
///
/// Entries outside `<id>/` or not named like a payload file are rejected.
/// The bundle is extracted into a hidden `.<id>.importing-<pid>` directory
/// and only moved over `store/<id>` once all payload files are there, so a
/// bad bundle never leaves files in the store. An earlier import of the same
/// id is replaced.
pub fn unpack(archive: &Path, id: &ArtifactId, store: &Path) -> Result<()> {
    fs::create_dir_all(store)?;
    let scratch = store.join(format!(".{id}.importing-{}", std::process::id()));
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }
    fs::create_dir_all(&scratch)?;

    let result = extract(archive, id, &scratch).and_then(|()| {
        let target = store.join(id.as_str());
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(scratch.join(id.as_str()), &target)?;
        Ok(())
    });

    if let Err(e) = fs::remove_dir_all(&scratch) {
        tracing::warn!(
            %id,
            dir = %scratch.display(),
            error = %e,
            "Failed to remove import scratch dir"
        );
    }
    result
}

fn extract(archive: &Path, id: &ArtifactId, dir: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));

    let entries = tar
        .entries()
        .map_err(|e| SyncError::Archive(format!("Unreadable archive: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| SyncError::Archive(format!("Corrupt entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| SyncError::Archive(format!("Bad entry path: {e}")))?
            .into_owned();

        if !entry_allowed(&path, id) {
            return Err(SyncError::Archive(format!(
                "Unexpected entry {} in bundle for {id}",
                path.display()
            )));
        }

        entry
            .unpack_in(dir)
            .map_err(|e| SyncError::Archive(format!("Failed to unpack {}: {e}", path.display())))?;
    }

    let target = dir.join(id.as_str());
    let missing: Vec<&str> = PAYLOAD_FILES
        .iter()
        .copied()
        .filter(|name| !target.join(name).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(SyncError::Archive(format!(
            "Bundle for {id} lacks {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

fn entry_allowed(path: &Path, id: &ArtifactId) -> bool {
    let components: Vec<Component<'_>> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    match components.as_slice() {
        [Component::Normal(dir)] => dir.to_str() == Some(id.as_str()),
        [Component::Normal(dir), Component::Normal(file)] => {
            dir.to_str() == Some(id.as_str())
                && file.to_str().is_some_and(|f| PAYLOAD_FILES.contains(&f))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage(root: &Path, id: &str) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        for name in PAYLOAD_FILES {
            fs::write(dir.join(name), format!("{id}:{name}")).unwrap();
        }
        dir
    }

    #[test]
    fn test_pack_then_unpack() {
        let temp_dir = TempDir::new().unwrap();
        let id = ArtifactId::from("a1");
        let staging = stage(&temp_dir.path().join("staging"), "a1");
        let store = ArchiveStore::new(temp_dir.path().join("archives")).unwrap();

        pack(&staging, &id, &store.path_for(&id)).unwrap();
        assert!(store.contains(&id));

        let models = temp_dir.path().join("models");
        unpack(&store.path_for(&id), &id, &models).unwrap();
        for name in PAYLOAD_FILES {
            let content = fs::read_to_string(models.join("a1").join(name)).unwrap();
            assert_eq!(content, format!("a1:{name}"));
        }
    }

    #[test]
    fn test_pack_refuses_incomplete_staging() {
        let temp_dir = TempDir::new().unwrap();
        let id = ArtifactId::from("a1");
        let staging = stage(temp_dir.path(), "a1");
        fs::remove_file(staging.join("model.data")).unwrap();
        let dest = temp_dir.path().join("a1.tar.gz");

        let result = pack(&staging, &id, &dest);
        match result {
            Err(SyncError::PartialDownload { missing, .. }) => {
                assert_eq!(missing, vec!["model.data".to_string()]);
            }
            other => panic!("expected PartialDownload, got {other:?}"),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn test_unpack_rejects_foreign_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("b2.tar.gz");
        let staging = stage(temp_dir.path(), "a1");

        // Bundle claims to be b2 but holds a1's files
        pack(&staging, &ArtifactId::from("a1"), &archive).unwrap();
        let result = unpack(&archive, &ArtifactId::from("b2"), &temp_dir.path().join("models"));
        assert!(matches!(result, Err(SyncError::Archive(_))));
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("a1.tar.gz");
        fs::write(&archive, "not a tarball").unwrap();

        let result = unpack(&archive, &ArtifactId::from("a1"), &temp_dir.path().join("models"));
        assert!(result.is_err());
    }

    #[test]
    fn test_entry_allowed() {
        let id = ArtifactId::from("a1");
        assert!(entry_allowed(Path::new("a1"), &id));
        assert!(entry_allowed(Path::new("a1/"), &id));
        assert!(entry_allowed(Path::new("./a1/model.json"), &id));
        assert!(!entry_allowed(Path::new("a1/other.txt"), &id));
        assert!(!entry_allowed(Path::new("../a1/model.json"), &id));
        assert!(!entry_allowed(Path::new("b2/model.json"), &id));
        assert!(!entry_allowed(Path::new("/a1/model.json"), &id));
    }

    #[test]
    fn test_pending_ignores_claims_and_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("b2.tar.gz"), "x").unwrap();
        fs::write(temp_dir.path().join("a1.tar.gz"), "x").unwrap();
        fs::write(temp_dir.path().join("c3.tar.gz.claim-1"), "x").unwrap();
        fs::write(temp_dir.path().join(".d4.tar.gz.partial-7"), "x").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        let pending = store.pending().unwrap();
        assert_eq!(pending, vec![ArtifactId::from("a1"), ArtifactId::from("b2")]);

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].claimed_by, Some(1));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path()).unwrap();
        let id = ArtifactId::from("a1");
        fs::write(store.path_for(&id), "x").unwrap();

        let claim = store.claim(&id).unwrap().expect("first claim succeeds");
        assert!(!store.contains(&id));
        assert!(store.claim(&id).unwrap().is_none());

        claim.release().unwrap();
        assert!(store.contains(&id));

        let claim = store.claim(&id).unwrap().unwrap();
        claim.complete().unwrap();
        assert!(!store.contains(&id));
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn test_recover_stale_claims() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path()).unwrap();

        // i32::MAX is never a live pid
        let stale = temp_dir.path().join(format!("a1{CLAIM_MARKER}{}", i32::MAX));
        fs::write(&stale, "x").unwrap();
        let own = temp_dir
            .path()
            .join(format!("b2{CLAIM_MARKER}{}", std::process::id()));
        fs::write(&own, "x").unwrap();

        assert_eq!(store.recover_stale_claims().unwrap(), 1);
        assert!(store.contains(&ArtifactId::from("a1")));
        assert!(!stale.exists());
        assert!(own.exists());
    }

    #[test]
    fn test_recover_claim_taken_by_another_importer() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArchiveStore::new(temp_dir.path()).unwrap();
        let id = ArtifactId::from("a1");
        let stale = temp_dir.path().join(format!("a1{CLAIM_MARKER}{}", i32::MAX));
        fs::write(&stale, "x").unwrap();

        // Another importer renamed the claim back between listing and recovery
        fs::rename(&stale, store.path_for(&id)).unwrap();
        assert!(!store.recover_claim(&stale, &id, i32::MAX).unwrap());
        assert!(store.contains(&id));

        // ... and then imported it, so neither claim nor bundle is left
        fs::remove_file(store.path_for(&id)).unwrap();
        assert!(!store.recover_claim(&stale, &id, i32::MAX).unwrap());
        assert_eq!(store.recover_stale_claims().unwrap(), 0);
    }

    #[test]
    fn test_failed_unpack_leaves_store_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let id = ArtifactId::from("a1");
        let models = temp_dir.path().join("models");
        let archive = temp_dir.path().join("a1.tar.gz");
        let staging = stage(&temp_dir.path().join("staging"), "a1");

        // Bundle holding only two of the payload files
        let file = File::create(&archive).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for name in ["image.jpg", "model.json"] {
            builder
                .append_path_with_name(staging.join(name), format!("a1/{name}"))
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let result = unpack(&archive, &id, &models);
        assert!(matches!(result, Err(SyncError::Archive(_))));
        assert!(!models.join("a1").exists());
        assert_eq!(fs::read_dir(&models).unwrap().count(), 0, "scratch dir removed");
    }

    #[test]
    fn test_failed_unpack_keeps_previous_import() {
        let temp_dir = TempDir::new().unwrap();
        let id = ArtifactId::from("a1");
        let models = temp_dir.path().join("models");
        let staging = stage(&temp_dir.path().join("staging"), "a1");
        let good = temp_dir.path().join("good.tar.gz");
        pack(&staging, &id, &good).unwrap();
        unpack(&good, &id, &models).unwrap();

        let bad = temp_dir.path().join("bad.tar.gz");
        fs::write(&bad, "not a tarball").unwrap();
        assert!(unpack(&bad, &id, &models).is_err());

        for name in PAYLOAD_FILES {
            let content = fs::read_to_string(models.join("a1").join(name)).unwrap();
            assert_eq!(content, format!("a1:{name}"));
        }
    }

    #[test]
    fn test_parse_claim() {
        assert_eq!(
            parse_claim("a1.tar.gz.claim-42"),
            Some((ArtifactId::from("a1"), 42))
        );
        assert_eq!(parse_claim("a1.tar.gz"), None);
        assert_eq!(parse_claim("a1.tar.gz.claim-x"), None);
    }
}
