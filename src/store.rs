//! Block key store contract and the filesystem implementation
//!
//! One [`BlockKeyStore`] covers exactly one version's data directory. The
//! chained read view in [`crate::chain`] and the session bindings in
//! [`crate::server`] both consume this contract and never reach the
//! filesystem directly.

use crate::compression::{get_compressor, CompressionLevel, CompressionMethod};
use crate::error::{DatastoreError, Result};
use crate::types::{Block, DataType, ResolutionLevel};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// File name of the per-path attribute document
pub const ATTRIBUTES_FILE: &str = "attributes.json";

/// Suffix of block payload files, `<x>.<y>.<z>.blk`
pub const BLOCK_FILE_SUFFIX: &str = ".blk";

/// Attributes shared by every block under one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAttributes {
    /// Sample extent of a full block per axis
    pub block_dimensions: [i32; 3],
    /// Sample data type
    pub data_type: DataType,
    /// Compression applied to payloads at rest
    pub compression: CompressionMethod,
}

impl BlockAttributes {
    pub fn new(block_dimensions: [i32; 3], data_type: DataType) -> Self {
        Self {
            block_dimensions,
            data_type,
            compression: CompressionMethod::Deflate,
        }
    }

    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    /// Payload size in bytes of a full block
    pub fn full_block_bytes(&self) -> usize {
        self.block_dimensions
            .iter()
            .map(|&d| d as usize)
            .product::<usize>()
            * self.data_type.size_in_bytes()
    }
}

/// Derive the block path for one (resolution level, time, channel, angle)
/// combination, relative to a version directory.
pub fn block_path(level: &ResolutionLevel, time: i32, channel: i32, angle: i32) -> String {
    format!("{}/{}/{}/{}", level, time, channel, angle)
}

/// Per-version block storage contract.
///
/// `read_block` resolves to `Ok(None)` for a grid position that holds no
/// data; that is a legitimate sparse result, not an error.
#[async_trait]
pub trait BlockKeyStore: Send + Sync {
    async fn read_block(
        &self,
        path: &str,
        attrs: &BlockAttributes,
        grid_position: [i64; 3],
    ) -> Result<Option<Block>>;

    async fn write_block(&self, path: &str, attrs: &BlockAttributes, block: &Block) -> Result<()>;

    async fn get_attributes(&self, path: &str) -> Result<Arc<BlockAttributes>>;
}

/// Filesystem-backed block store over one version's data directory.
///
/// Blocks live as `<x>.<y>.<z>.blk` files under their block path; each
/// file carries a 12-byte size header followed by the compressed payload.
pub struct FsBlockStore {
    data_root: PathBuf,

    /// Attribute lookup cache, keyed by block path. Shared by all blocks
    /// under one path; the lock is held around map access only, never
    /// across I/O, so distinct paths resolve in parallel.
    attr_cache: RwLock<HashMap<String, Arc<BlockAttributes>>>,
}

impl FsBlockStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
            attr_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    fn block_file(&self, path: &str, grid_position: [i64; 3]) -> PathBuf {
        self.data_root.join(path).join(format!(
            "{}.{}.{}{}",
            grid_position[0], grid_position[1], grid_position[2], BLOCK_FILE_SUFFIX
        ))
    }

    fn attributes_file(&self, path: &str) -> PathBuf {
        self.data_root.join(path).join(ATTRIBUTES_FILE)
    }

    /// Write the attribute document for a block path, creating the path
    /// directories as needed.
    pub async fn put_attributes(&self, path: &str, attrs: &BlockAttributes) -> Result<()> {
        let file = self.attributes_file(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(attrs)?;
        fs::write(&file, &json).await?;
        self.attr_cache
            .write()
            .insert(path.to_string(), Arc::new(attrs.clone()));
        Ok(())
    }
}

#[async_trait]
impl BlockKeyStore for FsBlockStore {
    async fn read_block(
        &self,
        path: &str,
        attrs: &BlockAttributes,
        grid_position: [i64; 3],
    ) -> Result<Option<Block>> {
        let file = self.block_file(path, grid_position);
        let raw = match fs::read(&file).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if raw.len() < 12 {
            return Err(DatastoreError::InvalidFormat(format!(
                "block file {} shorter than its size header",
                file.display()
            )));
        }
        let mut size = [0i32; 3];
        for (i, slot) in size.iter_mut().enumerate() {
            let mut be = [0u8; 4];
            be.copy_from_slice(&raw[i * 4..i * 4 + 4]);
            *slot = i32::from_be_bytes(be);
        }

        let compressor = get_compressor(attrs.compression);
        let payload = compressor.decompress(&raw[12..], Some(attrs.full_block_bytes()))?;

        Ok(Some(Block::new(size, grid_position, Bytes::from(payload))))
    }

    async fn write_block(&self, path: &str, attrs: &BlockAttributes, block: &Block) -> Result<()> {
        let file = self.block_file(path, block.grid_position);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }

        let compressor = get_compressor(attrs.compression);
        let compressed = compressor.compress(&block.payload, CompressionLevel::default())?;

        let mut raw = Vec::with_capacity(12 + compressed.len());
        for dim in block.size {
            raw.extend_from_slice(&dim.to_be_bytes());
        }
        raw.extend_from_slice(&compressed);

        fs::write(&file, &raw).await?;
        Ok(())
    }

    async fn get_attributes(&self, path: &str) -> Result<Arc<BlockAttributes>> {
        if let Some(attrs) = self.attr_cache.read().get(path) {
            return Ok(Arc::clone(attrs));
        }

        let file = self.attributes_file(path);
        let raw = match fs::read(&file).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DatastoreError::NotFound(format!(
                    "no attributes for block path {:?}",
                    path
                )))
            }
            Err(err) => return Err(err.into()),
        };
        let attrs: BlockAttributes = serde_json::from_slice(&raw)?;

        let attrs = Arc::new(attrs);
        self.attr_cache
            .write()
            .entry(path.to_string())
            .or_insert_with(|| Arc::clone(&attrs));
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_attrs() -> BlockAttributes {
        BlockAttributes::new([2, 2, 2], DataType::U16)
    }

    #[tokio::test]
    async fn test_block_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlockStore::new(temp_dir.path());
        let attrs = test_attrs();
        let path = block_path(&ResolutionLevel::base(), 0, 0, 0);

        let payload = Bytes::from((0u8..16).collect::<Vec<_>>());
        let block = Block::new([2, 2, 2], [1, 2, 3], payload.clone());
        store.write_block(&path, &attrs, &block).await.unwrap();

        let read = store
            .read_block(&path, &attrs, [1, 2, 3])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.size, [2, 2, 2]);
        assert_eq!(read.payload, payload);
    }

    #[tokio::test]
    async fn test_missing_block_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlockStore::new(temp_dir.path());
        let attrs = test_attrs();

        let read = store
            .read_block("1-1-1/0/0/0", &attrs, [9, 9, 9])
            .await
            .unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_attributes_cache() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlockStore::new(temp_dir.path());
        let attrs = test_attrs();

        store.put_attributes("1-1-1/0/0/0", &attrs).await.unwrap();

        let first = store.get_attributes("1-1-1/0/0/0").await.unwrap();
        let second = store.get_attributes("1-1-1/0/0/0").await.unwrap();
        assert_eq!(*first, attrs);
        // Repeated lookups of one path share one cached entry
        assert!(Arc::ptr_eq(&first, &second));

        let missing = store.get_attributes("1-1-1/0/0/9").await;
        assert!(matches!(missing, Err(DatastoreError::NotFound(_))));
    }
}
