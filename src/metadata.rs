//! Per-dataset descriptive metadata
//!
//! Stored as `dataset.json` inside every version directory and copied,
//! like all non-block files, when a new version is created.

use crate::error::Result;
use crate::types::{DataType, ResolutionLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

/// File name of the metadata document inside a version directory
pub const DATASET_METADATA_FILE: &str = "dataset.json";

/// Descriptive metadata for one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Dataset identity
    pub uuid: Uuid,

    /// Sample data type of the full-resolution data
    pub voxel_type: DataType,

    /// Full-resolution extent per axis
    pub dimensions: [i64; 3],

    /// Number of timepoints
    pub timepoints: u32,

    /// Number of channels
    pub channels: u32,

    /// Number of acquisition angles
    pub angles: u32,

    /// Resolution pyramid, base level first
    pub resolution_levels: Vec<ResolutionLevel>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,

    /// Free-form label key-value pairs
    pub labels: HashMap<String, String>,
}

impl DatasetMetadata {
    pub fn new(uuid: Uuid, voxel_type: DataType, dimensions: [i64; 3]) -> Self {
        let now = Utc::now();
        Self {
            uuid,
            voxel_type,
            dimensions,
            timepoints: 1,
            channels: 1,
            angles: 1,
            resolution_levels: vec![ResolutionLevel::base()],
            created_at: now,
            modified_at: now,
            labels: HashMap::new(),
        }
    }

    pub fn with_timepoints(mut self, timepoints: u32) -> Self {
        self.timepoints = timepoints;
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_angles(mut self, angles: u32) -> Self {
        self.angles = angles;
        self
    }

    pub fn with_resolution_levels(mut self, levels: Vec<ResolutionLevel>) -> Self {
        self.resolution_levels = levels;
        self
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.insert(key.into(), value.into());
        self.touch();
    }

    pub fn get_label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|s| s.as_str())
    }

    /// Update the modification timestamp
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Load the metadata document from a version directory
    pub async fn load(version_dir: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read(version_dir.as_ref().join(DATASET_METADATA_FILE)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Save the metadata document into a version directory
    pub async fn save(&self, version_dir: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(version_dir.as_ref().join(DATASET_METADATA_FILE), &json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_metadata_builder() {
        let mut metadata =
            DatasetMetadata::new(Uuid::new_v4(), DataType::U16, [2048, 2048, 512])
                .with_channels(3)
                .with_resolution_levels(vec![
                    ResolutionLevel::base(),
                    ResolutionLevel::new(2, 2, 1),
                ]);

        metadata.set_label("microscope", "SPIM-4");
        assert_eq!(metadata.get_label("microscope"), Some("SPIM-4"));
        assert_eq!(metadata.channels, 3);
        assert_eq!(metadata.resolution_levels.len(), 2);
    }

    #[tokio::test]
    async fn test_metadata_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let metadata = DatasetMetadata::new(Uuid::new_v4(), DataType::F32, [100, 100, 100]);
        metadata.save(temp_dir.path()).await.unwrap();

        let loaded = DatasetMetadata::load(temp_dir.path()).await.unwrap();
        assert_eq!(loaded.uuid, metadata.uuid);
        assert_eq!(loaded.voxel_type, DataType::F32);
        assert_eq!(loaded.dimensions, [100, 100, 100]);
    }
}
