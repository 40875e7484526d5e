//! Read-only fallback view across a stack of version stores
//!
//! A chain composes the per-version stores of every version up to a
//! target into one logical store. A block lives physically in the
//! version it was last written in, so a read starts at the newest store
//! and falls through to older ones until the block is found or the
//! chain is exhausted. Exhaustion is a legitimate sparse result.

use crate::error::{DatastoreError, Result};
use crate::store::{BlockAttributes, BlockKeyStore};
use crate::types::Block;
use crate::version::VersionManager;
use async_trait::async_trait;
use std::sync::Arc;

/// Ordered stack of version stores, newest first.
///
/// Built once at session start and immutable afterwards; safe to share
/// across concurrent requests without locking.
pub struct VersionChainReader {
    /// Stores newest to oldest
    stores: Vec<Arc<dyn BlockKeyStore>>,
    /// Target version the chain was built for
    target: u32,
}

impl VersionChainReader {
    /// Build the chain for every version `<= target` of the dataset.
    pub async fn build(manager: &VersionManager, target: u32) -> Result<Self> {
        let mut stores: Vec<Arc<dyn BlockKeyStore>> = Vec::new();
        for version in manager.list_versions().await? {
            if version > target {
                continue;
            }
            stores.push(Arc::new(manager.store_for(version).await?));
        }
        if stores.is_empty() {
            return Err(DatastoreError::NotFound(format!(
                "dataset {} does not have version {}",
                manager.dataset().uuid,
                target
            )));
        }
        stores.reverse();
        Ok(Self { stores, target })
    }

    /// Number of version stores in the chain.
    pub fn depth(&self) -> usize {
        self.stores.len()
    }

    pub fn target(&self) -> u32 {
        self.target
    }
}

#[async_trait]
impl BlockKeyStore for VersionChainReader {
    async fn read_block(
        &self,
        path: &str,
        attrs: &BlockAttributes,
        grid_position: [i64; 3],
    ) -> Result<Option<Block>> {
        for store in &self.stores {
            if let Some(block) = store.read_block(path, attrs, grid_position).await? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    async fn write_block(
        &self,
        _path: &str,
        _attrs: &BlockAttributes,
        _block: &Block,
    ) -> Result<()> {
        // Writing into an intermediate historical layer would corrupt the
        // copy-on-write invariant; a chained view is read-only.
        Err(DatastoreError::Unsupported(
            "writing is not supported through a version chain".to_string(),
        ))
    }

    async fn get_attributes(&self, path: &str) -> Result<Arc<BlockAttributes>> {
        // Metadata is copied on version create, so the newest store that
        // knows the path answers.
        let mut last_err = None;
        for store in &self.stores {
            match store.get_attributes(path).await {
                Ok(attrs) => return Ok(attrs),
                Err(err @ DatastoreError::NotFound(_)) => last_err = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            DatastoreError::NotFound(format!("no attributes for block path {:?}", path))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DatasetMetadata;
    use crate::store::block_path;
    use crate::types::{DataType, ResolutionLevel};
    use crate::version::Dataset;
    use bytes::Bytes;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn fixture(root: &std::path::Path) -> (VersionManager, BlockAttributes, String) {
        let dataset = Dataset::new(Uuid::new_v4(), root);
        let metadata = DatasetMetadata::new(dataset.uuid, DataType::U8, [64, 64, 64]);
        let manager = VersionManager::initialize(dataset, &metadata).await.unwrap();

        let attrs = BlockAttributes::new([4, 4, 4], DataType::U8);
        let path = block_path(&ResolutionLevel::base(), 0, 0, 0);
        let store = manager.store_for(0).await.unwrap();
        store.put_attributes(&path, &attrs).await.unwrap();
        (manager, attrs, path)
    }

    #[tokio::test]
    async fn test_fallback_read_finds_older_block() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, attrs, path) = fixture(temp_dir.path()).await;

        let block = Block::new([4, 4, 4], [0, 0, 0], Bytes::from(vec![7u8; 64]));
        let store = manager.store_for(0).await.unwrap();
        store.write_block(&path, &attrs, &block).await.unwrap();

        manager.create_version().await.unwrap();
        manager.create_version().await.unwrap();

        let chain = VersionChainReader::build(&manager, 2).await.unwrap();
        assert_eq!(chain.depth(), 3);

        let read = chain.read_block(&path, &attrs, [0, 0, 0]).await.unwrap();
        assert_eq!(read.unwrap(), block);
    }

    #[tokio::test]
    async fn test_newest_version_shadows_older() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, attrs, path) = fixture(temp_dir.path()).await;

        let old = Block::new([4, 4, 4], [1, 0, 0], Bytes::from(vec![1u8; 64]));
        let store = manager.store_for(0).await.unwrap();
        store.write_block(&path, &attrs, &old).await.unwrap();

        let v1 = manager.create_version().await.unwrap();
        let new = Block::new([4, 4, 4], [1, 0, 0], Bytes::from(vec![2u8; 64]));
        let store = manager.store_for(v1).await.unwrap();
        store.write_block(&path, &attrs, &new).await.unwrap();

        let chain = VersionChainReader::build(&manager, v1).await.unwrap();
        let read = chain.read_block(&path, &attrs, [1, 0, 0]).await.unwrap();
        assert_eq!(read.unwrap(), new);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_sparse_not_error() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, attrs, path) = fixture(temp_dir.path()).await;

        let chain = VersionChainReader::build(&manager, 0).await.unwrap();
        let read = chain.read_block(&path, &attrs, [9, 9, 9]).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_chain_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, attrs, path) = fixture(temp_dir.path()).await;

        let chain = VersionChainReader::build(&manager, 0).await.unwrap();
        let block = Block::new([4, 4, 4], [0, 0, 0], Bytes::from(vec![0u8; 64]));
        assert!(matches!(
            chain.write_block(&path, &attrs, &block).await,
            Err(DatastoreError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_target_version() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, _, _) = fixture(temp_dir.path()).await;

        // The chain itself tolerates a target beyond the latest version
        // and spans what exists; session start validates the version.
        let chain = VersionChainReader::build(&manager, 5).await.unwrap();
        assert_eq!(chain.depth(), 1);
    }
}
