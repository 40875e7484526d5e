//! Version slots and the copy-on-write version manager
//!
//! A dataset root holds one directory per version, named by its integer.
//! Slot 0 is the baseline and exists for the dataset's whole lifetime.
//! Creating a version copies metadata only; block payloads stay in the
//! version directory they were first written to and are reached through
//! the fallback chain in [`crate::chain`].

use crate::error::{DatastoreError, Result};
use crate::metadata::DatasetMetadata;
use crate::store::{FsBlockStore, BLOCK_FILE_SUFFIX};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Baseline version slot
pub const INITIAL_VERSION: u32 = 0;

/// One registered dataset: its identity and its on-disk root
#[derive(Debug, Clone)]
pub struct Dataset {
    pub uuid: Uuid,
    pub root: PathBuf,
}

impl Dataset {
    pub fn new(uuid: Uuid, root: impl AsRef<Path>) -> Self {
        Self {
            uuid,
            root: root.as_ref().to_path_buf(),
        }
    }
}

/// Creates, enumerates, promotes and deletes version slots of one dataset.
pub struct VersionManager {
    dataset: Dataset,
}

impl VersionManager {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }

    /// Create the dataset on disk: the baseline slot 0 with its metadata
    /// document.
    pub async fn initialize(dataset: Dataset, metadata: &DatasetMetadata) -> Result<Self> {
        let manager = Self::new(dataset);
        let baseline = manager.version_dir(INITIAL_VERSION);
        fs::create_dir_all(&baseline).await?;
        metadata.save(&baseline).await?;
        info!(uuid = %manager.dataset.uuid, "dataset initialized");
        Ok(manager)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn version_dir(&self, version: u32) -> PathBuf {
        self.dataset.root.join(version.to_string())
    }

    /// Version numbers present on disk, ascending. Directory entries
    /// whose name is not a plain decimal number are ignored.
    pub async fn list_versions(&self) -> Result<Vec<u32>> {
        let mut versions = Vec::new();
        let mut entries = fs::read_dir(&self.dataset.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(version) = entry.file_name().to_str().and_then(parse_version_name) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Highest existing version number.
    pub async fn latest_version(&self) -> Result<u32> {
        self.list_versions().await?.last().copied().ok_or_else(|| {
            DatastoreError::NotFound(format!("dataset {} has no versions", self.dataset.uuid))
        })
    }

    /// Create a new version on top of the latest one.
    ///
    /// Copies attribute and metadata files into the new directory; block
    /// payload files are never copied and stay physically resident where
    /// they were written. Returns the new version number.
    pub async fn create_version(&self) -> Result<u32> {
        let latest = self.latest_version().await?;
        let new_version = latest + 1;
        copy_metadata_tree(&self.version_dir(latest), &self.version_dir(new_version)).await?;
        info!(uuid = %self.dataset.uuid, version = new_version, "version created");
        Ok(new_version)
    }

    /// Relocate a version into the baseline slot 0 by rename.
    ///
    /// Rename is atomic on one filesystem, so a crash mid-operation
    /// leaves either the old layout or the new one, never a dataset
    /// without a valid slot 0.
    pub async fn promote(&self, version: u32) -> Result<()> {
        if version == INITIAL_VERSION {
            return Ok(());
        }
        let version_path = self.version_dir(version);
        if !fs::try_exists(&version_path).await? {
            return Err(self.version_not_found(version));
        }
        let baseline = self.version_dir(INITIAL_VERSION);
        if fs::try_exists(&baseline).await? {
            return Err(DatastoreError::InvalidState(format!(
                "baseline slot of dataset {} is occupied, delete version {} first",
                self.dataset.uuid, INITIAL_VERSION
            )));
        }
        fs::rename(&version_path, &baseline).await?;
        info!(uuid = %self.dataset.uuid, version, "version promoted to baseline");
        Ok(())
    }

    /// Delete one version. The last remaining version cannot be deleted.
    ///
    /// No check is made whether a newer version's fallback chain still
    /// depends on blocks physically stored only here; deleting such a
    /// version makes those blocks unreadable from the newer version's
    /// perspective.
    pub async fn delete_version(&self, version: u32) -> Result<()> {
        let version_path = self.version_dir(version);
        if !fs::try_exists(&version_path).await? {
            return Err(self.version_not_found(version));
        }
        // At least one version must remain
        if self.list_versions().await?.len() == 1 {
            return Err(DatastoreError::InvalidState(format!(
                "version {} is the last version in dataset {}",
                version, self.dataset.uuid
            )));
        }
        fs::remove_dir_all(&version_path).await?;
        info!(uuid = %self.dataset.uuid, version, "version deleted");
        Ok(())
    }

    /// Delete several versions, stopping at the first failure.
    pub async fn delete_versions(&self, versions: &[u32]) -> Result<()> {
        for &version in versions {
            self.delete_version(version).await?;
        }
        Ok(())
    }

    /// Open the block store of one version's own directory.
    pub async fn store_for(&self, version: u32) -> Result<FsBlockStore> {
        let version_path = self.version_dir(version);
        if !fs::try_exists(&version_path).await? {
            return Err(self.version_not_found(version));
        }
        Ok(FsBlockStore::new(version_path))
    }

    /// Load the metadata document of one version.
    pub async fn metadata(&self, version: u32) -> Result<DatasetMetadata> {
        let version_path = self.version_dir(version);
        if !fs::try_exists(&version_path).await? {
            return Err(self.version_not_found(version));
        }
        DatasetMetadata::load(&version_path).await
    }

    fn version_not_found(&self, version: u32) -> DatastoreError {
        DatastoreError::NotFound(format!(
            "dataset {} does not have version {}",
            self.dataset.uuid, version
        ))
    }
}

/// Recursively copy a version directory, skipping block payload files.
async fn copy_metadata_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), to.join(&name)));
            } else if !is_block_payload(&name) {
                debug!(file = %entry.path().display(), "copying metadata file");
                fs::copy(entry.path(), to.join(&name)).await?;
            }
        }
    }
    Ok(())
}

fn is_block_payload(name: &OsStr) -> bool {
    name.to_str()
        .map_or(false, |n| n.ends_with(BLOCK_FILE_SUFFIX))
}

/// Digits only; rejects signs and whitespace that `u32::from_str` accepts.
fn parse_version_name(name: &str) -> Option<u32> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;
    use tempfile::TempDir;

    async fn test_manager(root: &Path) -> VersionManager {
        let dataset = Dataset::new(Uuid::new_v4(), root);
        let metadata = DatasetMetadata::new(dataset.uuid, DataType::U16, [512, 512, 128]);
        VersionManager::initialize(dataset, &metadata).await.unwrap()
    }

    #[tokio::test]
    async fn test_version_enumeration_ignores_non_numeric() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(temp_dir.path()).await;

        fs::create_dir(temp_dir.path().join("thumbnails")).await.unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"x").await.unwrap();
        // u32::from_str would accept a leading sign; directory names must not.
        fs::create_dir(temp_dir.path().join("+7")).await.unwrap();

        assert_eq!(manager.list_versions().await.unwrap(), vec![0]);
        assert_eq!(manager.latest_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_version_increments() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(temp_dir.path()).await;

        assert_eq!(manager.create_version().await.unwrap(), 1);
        assert_eq!(manager.create_version().await.unwrap(), 2);
        assert_eq!(manager.list_versions().await.unwrap(), vec![0, 1, 2]);

        // Metadata document travels to the new version
        let metadata = manager.metadata(2).await.unwrap();
        assert_eq!(metadata.dimensions, [512, 512, 128]);
    }

    #[tokio::test]
    async fn test_delete_last_version_is_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(temp_dir.path()).await;

        assert!(matches!(
            manager.delete_version(0).await,
            Err(DatastoreError::InvalidState(_))
        ));

        manager.create_version().await.unwrap();
        manager.delete_version(0).await.unwrap();
        assert!(matches!(
            manager.delete_version(1).await,
            Err(DatastoreError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_version_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(temp_dir.path()).await;

        assert!(matches!(
            manager.delete_version(7).await,
            Err(DatastoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_promote_renames_into_baseline() {
        let temp_dir = TempDir::new().unwrap();
        let manager = test_manager(temp_dir.path()).await;

        manager.create_version().await.unwrap();

        // Occupied baseline refuses the rename
        assert!(matches!(
            manager.promote(1).await,
            Err(DatastoreError::InvalidState(_))
        ));

        manager.delete_version(0).await.unwrap();
        manager.promote(1).await.unwrap();
        assert_eq!(manager.list_versions().await.unwrap(), vec![0]);
    }
}
