//! Core data types for the versioned block store

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DatastoreError, Result};

/// Voxel data types supported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Unsigned 64-bit integer
    U64,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Signed 64-bit integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
}

impl DataType {
    /// Size in bytes of one sample of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One tiled block of sample data.
///
/// `size` holds the sample extent per axis; the absent sentinel
/// `[-1, -1, -1]` marks a grid position that carries no data, which is
/// distinct from a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Sample extent of this block per axis
    pub size: [i32; 3],
    /// Grid position within the resolution level
    pub grid_position: [i64; 3],
    /// Raw sample payload
    pub payload: Bytes,
}

/// Size triple marking an absent block
pub const ABSENT_BLOCK_SIZE: [i32; 3] = [-1, -1, -1];

impl Block {
    pub fn new(size: [i32; 3], grid_position: [i64; 3], payload: Bytes) -> Self {
        Self {
            size,
            grid_position,
            payload,
        }
    }

    /// Sentinel block for a grid position that holds no data
    pub fn absent(grid_position: [i64; 3]) -> Self {
        Self {
            size: ABSENT_BLOCK_SIZE,
            grid_position,
            payload: Bytes::new(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.size == ABSENT_BLOCK_SIZE
    }

    /// Number of samples in this block, zero for the absent sentinel
    pub fn num_elements(&self) -> usize {
        if self.is_absent() {
            return 0;
        }
        self.size.iter().map(|&d| d as usize).product()
    }
}

/// Address of one block: grid position plus time/channel/angle coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIdentification {
    pub grid_position: [i64; 3],
    pub time: i32,
    pub channel: i32,
    pub angle: i32,
}

impl BlockIdentification {
    pub fn new(grid_position: [i64; 3], time: i32, channel: i32, angle: i32) -> Self {
        Self {
            grid_position,
            time,
            channel,
            angle,
        }
    }
}

impl fmt::Display for BlockIdentification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.grid_position[0],
            self.grid_position[1],
            self.grid_position[2],
            self.time,
            self.channel,
            self.angle
        )
    }
}

/// Per-axis subsampling factors identifying one resolution level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolutionLevel(pub [i32; 3]);

impl ResolutionLevel {
    pub fn new(rx: i32, ry: i32, rz: i32) -> Self {
        Self([rx, ry, rz])
    }

    /// Full-resolution level, subsampling factor 1 on every axis
    pub fn base() -> Self {
        Self([1, 1, 1])
    }
}

impl fmt::Display for ResolutionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.0[0], self.0[1], self.0[2])
    }
}

impl std::str::FromStr for ResolutionLevel {
    type Err = DatastoreError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 {
            return Err(DatastoreError::InvalidFormat(format!(
                "resolution level must be rx-ry-rz, got {:?}",
                s
            )));
        }
        let mut factors = [0i32; 3];
        for (slot, part) in factors.iter_mut().zip(parts) {
            *slot = part.parse().map_err(|_| {
                DatastoreError::InvalidFormat(format!("invalid subsampling factor {:?}", part))
            })?;
        }
        Ok(Self(factors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::U8.size_in_bytes(), 1);
        assert_eq!(DataType::U16.size_in_bytes(), 2);
        assert_eq!(DataType::F32.size_in_bytes(), 4);
        assert_eq!(DataType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_absent_block() {
        let block = Block::absent([3, 4, 5]);
        assert!(block.is_absent());
        assert_eq!(block.num_elements(), 0);
        assert_eq!(block.grid_position, [3, 4, 5]);

        let real = Block::new([2, 2, 2], [0, 0, 0], Bytes::from_static(&[0; 8]));
        assert!(!real.is_absent());
        assert_eq!(real.num_elements(), 8);
    }

    #[test]
    fn test_identification_display() {
        let id = BlockIdentification::new([1, 2, 3], 4, 5, 6);
        assert_eq!(id.to_string(), "1/2/3/4/5/6");
    }

    #[test]
    fn test_resolution_level_round_trip() {
        let level = ResolutionLevel::new(2, 2, 4);
        assert_eq!(level.to_string(), "2-2-4");
        assert_eq!("2-2-4".parse::<ResolutionLevel>().unwrap(), level);
        assert!("2-2".parse::<ResolutionLevel>().is_err());
    }
}
