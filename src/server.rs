//! Per-session dataset server: the bound store and block operations
//!
//! One `DatasetServer` exists per session. At bind time it resolves the
//! requested version and mode into either a single version's own store
//! (read-write) or an immutable [`VersionChainReader`] (read / mixed
//! latest); every later block operation goes through that binding.

use crate::address::BlockFrame;
use crate::chain::VersionChainReader;
use crate::error::{DatastoreError, Result};
use crate::store::{block_path, BlockKeyStore};
use crate::types::{Block, BlockIdentification, DataType, ResolutionLevel};
use crate::version::{Dataset, VersionManager};
use bytes::{Bytes, BytesMut};
use futures::future::try_join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Access mode a session is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Read,
    ReadWrite,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMode::Read => write!(f, "read"),
            OperationMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

impl FromStr for OperationMode {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(OperationMode::Read),
            "read-write" | "write" => Ok(OperationMode::ReadWrite),
            other => Err(DatastoreError::InvalidFormat(format!(
                "operation mode {:?} not supported",
                other
            ))),
        }
    }
}

/// Reserved wire token for the mixed-latest pseudo-version
pub const MIXED_LATEST_TOKEN: &str = "mixedLatest";

/// Version a session is bound to: a concrete slot, or the read-only
/// pseudo-version spanning every version existing at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSpec {
    Concrete(u32),
    MixedLatest,
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Concrete(v) => write!(f, "{}", v),
            VersionSpec::MixedLatest => write!(f, "{}", MIXED_LATEST_TOKEN),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s == MIXED_LATEST_TOKEN {
            return Ok(VersionSpec::MixedLatest);
        }
        s.parse()
            .map(VersionSpec::Concrete)
            .map_err(|_| DatastoreError::InvalidFormat(format!("invalid version {:?}", s)))
    }
}

/// One session's bound view of a dataset.
pub struct DatasetServer {
    uuid: Uuid,
    mode: OperationMode,
    version: VersionSpec,
    resolution_levels: Vec<ResolutionLevel>,
    store: Arc<dyn BlockKeyStore>,
    manager: VersionManager,
}

impl DatasetServer {
    /// Resolve the requested version and mode into a bound store.
    ///
    /// A read-write session binds exactly one concrete version's own
    /// store. A read session binds a chain up to its concrete version. A
    /// mixed-latest session binds a chain spanning every version up to
    /// the latest at bind time, fixed then, and is always read-only.
    pub async fn bind(
        dataset: Dataset,
        resolution_levels: Vec<ResolutionLevel>,
        version: VersionSpec,
        mode: OperationMode,
    ) -> Result<Self> {
        if resolution_levels.is_empty() {
            return Err(DatastoreError::InvalidFormat(
                "session needs at least one resolution level".to_string(),
            ));
        }
        let uuid = dataset.uuid;
        let manager = VersionManager::new(dataset);

        let store: Arc<dyn BlockKeyStore> = match (version, mode) {
            (VersionSpec::MixedLatest, OperationMode::ReadWrite) => {
                return Err(DatastoreError::InvalidState(
                    "a mixedLatest session cannot be read-write".to_string(),
                ));
            }
            (VersionSpec::MixedLatest, OperationMode::Read) => {
                let latest = manager.latest_version().await?;
                Arc::new(VersionChainReader::build(&manager, latest).await?)
            }
            (VersionSpec::Concrete(v), OperationMode::ReadWrite) => {
                Arc::new(manager.store_for(v).await?)
            }
            (VersionSpec::Concrete(v), OperationMode::Read) => {
                // Validate the version exists before spanning the chain
                manager.store_for(v).await?;
                Arc::new(VersionChainReader::build(&manager, v).await?)
            }
        };

        debug!(%uuid, %version, %mode, "dataset server bound");
        Ok(Self {
            uuid,
            mode,
            version,
            resolution_levels,
            store,
            manager,
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn version(&self) -> VersionSpec {
        self.version
    }

    pub fn resolution_levels(&self) -> &[ResolutionLevel] {
        &self.resolution_levels
    }

    /// Version operations are reserved for read-write sessions.
    pub fn version_manager(&self) -> Option<&VersionManager> {
        match self.mode {
            OperationMode::ReadWrite => Some(&self.manager),
            OperationMode::Read => None,
        }
    }

    fn path_for(&self, time: i32, channel: i32, angle: i32) -> String {
        block_path(&self.resolution_levels[0], time, channel, angle)
    }

    /// Read one block through the bound store; `None` is a sparse result.
    pub async fn read_one(&self, id: &BlockIdentification) -> Result<Option<Block>> {
        let path = self.path_for(id.time, id.channel, id.angle);
        let attrs = self.store.get_attributes(&path).await?;
        self.store.read_block(&path, &attrs, id.grid_position).await
    }

    /// Read a batch of blocks into one framed stream, request order
    /// preserved. Absent blocks are framed as the `[-1, -1, -1]`
    /// sentinel instead of failing the batch.
    pub async fn read_batch(&self, ids: &[BlockIdentification]) -> Result<Bytes> {
        let futures: Vec<_> = ids
            .iter()
            .map(|id| async move {
                let block = self.read_one(id).await?;
                Ok::<_, DatastoreError>(block.unwrap_or_else(|| Block::absent(id.grid_position)))
            })
            .collect();

        let blocks = match try_join_all(futures).await {
            Ok(blocks) => blocks,
            Err(err) => {
                warn!(uuid = %self.uuid, %err, "batch read failed");
                return Err(err);
            }
        };

        let mut buf = BytesMut::new();
        for block in &blocks {
            BlockFrame::write_to(&mut buf, block);
        }
        Ok(buf.freeze())
    }

    /// Write a batch of blocks from one framed input stream.
    ///
    /// Frames are consumed strictly in identification order, one per
    /// block. If the input runs out early the batch fails `Truncated`;
    /// blocks written before the failure stay written, so callers retry
    /// idempotently. Returns the number of blocks written.
    pub async fn write_batch(&self, ids: &[BlockIdentification], input: &[u8]) -> Result<usize> {
        self.ensure_writable()?;

        let mut cursor = input;
        let mut written = 0;
        for (index, id) in ids.iter().enumerate() {
            let frame = BlockFrame::read_from(&mut cursor)?.ok_or_else(|| {
                DatastoreError::Truncated(format!(
                    "input exhausted after {} of {} blocks",
                    index,
                    ids.len()
                ))
            })?;
            // The absent sentinel carries no data to persist
            if frame.is_absent() {
                continue;
            }
            let path = self.path_for(id.time, id.channel, id.angle);
            let attrs = self.store.get_attributes(&path).await?;
            let block = Block::new(frame.size, id.grid_position, frame.payload);
            if let Err(err) = self.store.write_block(&path, &attrs, &block).await {
                warn!(uuid = %self.uuid, block = %id, %err, "batch write failed");
                return Err(err);
            }
            written += 1;
        }
        Ok(written)
    }

    /// Sample data type stored at a (time, channel, angle) path.
    pub async fn data_type(&self, time: i32, channel: i32, angle: i32) -> Result<DataType> {
        let path = self.path_for(time, channel, angle);
        Ok(self.store.get_attributes(&path).await?.data_type)
    }

    fn ensure_writable(&self) -> Result<()> {
        match (self.mode, self.version) {
            (OperationMode::ReadWrite, _) => Ok(()),
            (OperationMode::Read, VersionSpec::MixedLatest) => Err(DatastoreError::Unsupported(
                format!("writing is not supported for version {}", MIXED_LATEST_TOKEN),
            )),
            (OperationMode::Read, VersionSpec::Concrete(_)) => Err(DatastoreError::InvalidState(
                "session was started read-only".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("read".parse::<OperationMode>().unwrap(), OperationMode::Read);
        assert_eq!(
            "read-write".parse::<OperationMode>().unwrap(),
            OperationMode::ReadWrite
        );
        assert!("append".parse::<OperationMode>().is_err());
    }

    #[test]
    fn test_version_spec_parsing() {
        assert_eq!("7".parse::<VersionSpec>().unwrap(), VersionSpec::Concrete(7));
        assert_eq!(
            "mixedLatest".parse::<VersionSpec>().unwrap(),
            VersionSpec::MixedLatest
        );
        assert!("latest-ish".parse::<VersionSpec>().is_err());
        assert_eq!(VersionSpec::MixedLatest.to_string(), "mixedLatest");
        assert_eq!(VersionSpec::Concrete(3).to_string(), "3");
    }
}
