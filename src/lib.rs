//! VBDS - Versioned Block Data Store
//!
//! Storage core for large multi-dimensional imaging datasets
//! (volumetric time-series, multi-channel, multi-angle,
//! multi-resolution) kept as addressable tiled blocks.
//!
//! # Features
//!
//! - Copy-on-write versioning: creating a snapshot copies metadata only,
//!   block payloads stay where they were first written
//! - Chained fallback reads across historical versions
//! - Batch block addressing: one request touches many blocks
//! - Session-scoped access with idle-timeout reclamation
//! - Async I/O throughout; pluggable per-version storage via the
//!   `BlockKeyStore` trait
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vbds::{
//!     Dataset, OperationMode, ResolutionLevel, SessionLifecycleManager, VersionSpec,
//! };
//!
//! # async fn example(dataset: Dataset) -> vbds::Result<()> {
//! let sessions = SessionLifecycleManager::new();
//! let handle = sessions
//!     .start(
//!         dataset,
//!         vec![ResolutionLevel::base()],
//!         VersionSpec::MixedLatest,
//!         OperationMode::Read,
//!         Duration::from_secs(60),
//!     )
//!     .await?;
//! let ids = vbds::BlockAddressCodec::decode_with_leading(0, 0, 0, 0, 0, 0, "1/0/0/0/0/0");
//! let stream = sessions.read_block(handle, &ids).await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod chain;
pub mod compression;
pub mod error;
pub mod metadata;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
pub mod version;

// Re-exports
pub use address::{BlockAddressCodec, BlockFrame};
pub use chain::VersionChainReader;
pub use compression::{CompressionMethod, Compressor};
pub use error::{DatastoreError, Result};
pub use metadata::DatasetMetadata;
pub use server::{DatasetServer, OperationMode, VersionSpec, MIXED_LATEST_TOKEN};
pub use session::{SessionHandle, SessionLifecycleManager, SessionState, SessionStatus};
pub use store::{block_path, BlockAttributes, BlockKeyStore, FsBlockStore};
pub use types::{Block, BlockIdentification, DataType, ResolutionLevel};
pub use version::{Dataset, VersionManager, INITIAL_VERSION};

/// Version of the VBDS implementation
pub const VBDS_VERSION: &str = env!("CARGO_PKG_VERSION");
