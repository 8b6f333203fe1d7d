//! Hex-grid coordinates, chunk keys and the pointy-top world layout.
//! 六边形网格坐标、区块键以及尖顶布局的世界坐标换算

use bevy::math::{Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// √3, the horizontal spacing factor of a pointy-top hex.
pub const SQRT_3: f32 = 1.732_050_8;

/// Vertical spacing factor of a pointy-top hex (`height * 0.75` with `height = 2 * size`).
pub const ROW_SPACING: f32 = 1.5;

/// Opaque identifier delivered by the chain indexer.
pub type EntityId = u32;

/// Owner address as delivered by the indexer (hex string).
pub type Address = String;

/// One tile of the world grid.
/// 世界网格中的一个格子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HexCoordinate {
    pub col: i32,
    pub row: i32,
}

impl HexCoordinate {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    /// World-space `(x, z)` centre of this hex.
    pub fn to_world(self, hex_size: f32) -> Vec2 {
        let horizontal = SQRT_3 * hex_size;
        let row_offset = (self.row % 2) as f32 * (self.row.signum() as f32) * horizontal / 2.0;
        Vec2::new(
            self.col as f32 * horizontal - row_offset,
            self.row as f32 * ROW_SPACING * hex_size,
        )
    }

    /// Nearest hex to a world-space `(x, z)` position.
    pub fn from_world(position: Vec2, hex_size: f32) -> Self {
        let horizontal = SQRT_3 * hex_size;
        let row = (position.y / (ROW_SPACING * hex_size)).round() as i32;
        let row_offset = (row % 2) as f32 * (row.signum() as f32) * horizontal / 2.0;
        let col = ((position.x + row_offset) / horizontal).round() as i32;
        Self { col, row }
    }
}

impl fmt::Display for HexCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.col, self.row)
    }
}

/// Chunk key parse failure.
/// 区块键解析错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKeyError {
    /// No `,` in the input.
    MissingSeparator(String),
    /// More than two comma separated segments.
    WrongSegmentCount { input: String, segments: usize },
    /// One side of the separator is blank.
    EmptyComponent(String),
    /// A segment is not a finite integer.
    NotANumber { input: String, segment: String },
}

impl fmt::Display for ChunkKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKeyError::MissingSeparator(input) => {
                write!(f, "chunk key {input:?} has no ',' separator")
            }
            ChunkKeyError::WrongSegmentCount { input, segments } => {
                write!(f, "chunk key {input:?} has {segments} segments, expected 2")
            }
            ChunkKeyError::EmptyComponent(input) => {
                write!(f, "chunk key {input:?} has an empty component")
            }
            ChunkKeyError::NotANumber { input, segment } => {
                write!(f, "chunk key {input:?}: {segment:?} is not a finite integer")
            }
        }
    }
}

impl std::error::Error for ChunkKeyError {}

/// Origin of a chunk in hex space. Canonical text form is `"row,col"`.
/// 区块原点，规范字符串形式为 "row,col"
///
/// The default key is the origin chunk `"0,0"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub row: i32,
    pub col: i32,
}

impl ChunkKey {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Chunk containing `coord` for a square chunk of `stride` hexes.
    pub fn containing(coord: HexCoordinate, stride: i32) -> Self {
        Self {
            row: coord.row.div_euclid(stride) * stride,
            col: coord.col.div_euclid(stride) * stride,
        }
    }

    /// Chunk under a world-space `(x, z)` position.
    pub fn from_world(position: Vec2, chunk_size: u32, hex_size: f32) -> Self {
        let extent = chunk_world_extent(chunk_size, hex_size);
        let stride = chunk_size as i32;
        Self {
            row: (position.y / extent.y).floor() as i32 * stride,
            col: (position.x / extent.x).floor() as i32 * stride,
        }
    }

    /// Hex bounds covered by this chunk (`stride × stride`).
    pub fn bounds(self, stride: i32) -> ChunkBounds {
        ChunkBounds {
            min_col: self.col,
            max_col: self.col + stride,
            min_row: self.row,
            max_row: self.row + stride,
        }
    }

    /// World-space rectangle covered by this chunk, used for view intersection.
    pub fn world_rect(self, chunk_size: u32, hex_size: f32) -> Rect {
        let extent = chunk_world_extent(chunk_size, hex_size);
        let stride = chunk_size.max(1) as f32;
        let min = Vec2::new(
            self.col as f32 / stride * extent.x,
            self.row as f32 / stride * extent.y,
        );
        Rect::from_corners(min, min + extent)
    }

    pub fn offset(self, rows: i32, cols: i32) -> Self {
        Self {
            row: self.row + rows,
            col: self.col + cols,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

impl FromStr for ChunkKey {
    type Err = ChunkKeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if !input.contains(',') {
            return Err(ChunkKeyError::MissingSeparator(input.to_string()));
        }
        let segments: Vec<&str> = input.split(',').collect();
        if segments.len() != 2 {
            return Err(ChunkKeyError::WrongSegmentCount {
                input: input.to_string(),
                segments: segments.len(),
            });
        }
        let parse = |segment: &str| -> Result<i32, ChunkKeyError> {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                return Err(ChunkKeyError::EmptyComponent(input.to_string()));
            }
            trimmed.parse::<i32>().map_err(|_| ChunkKeyError::NotANumber {
                input: input.to_string(),
                segment: trimmed.to_string(),
            })
        };
        Ok(Self {
            row: parse(segments[0])?,
            col: parse(segments[1])?,
        })
    }
}

impl Serialize for ChunkKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Rectangular hex region; min inclusive, max exclusive.
/// 六边形矩形区域（最小值包含，最大值不包含）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkBounds {
    pub min_col: i32,
    pub max_col: i32,
    pub min_row: i32,
    pub max_row: i32,
}

impl ChunkBounds {
    /// Bounds centred on `center`, `width × height` hexes, both edges inclusive.
    pub fn around(center: ChunkKey, width: u32, height: u32) -> Self {
        let half_w = (width / 2) as i32;
        let half_h = (height / 2) as i32;
        Self {
            min_col: center.col - half_w,
            max_col: center.col + half_w + 1,
            min_row: center.row - half_h,
            max_row: center.row + half_h + 1,
        }
    }

    pub fn contains(&self, coord: HexCoordinate) -> bool {
        coord.col >= self.min_col
            && coord.col < self.max_col
            && coord.row >= self.min_row
            && coord.row < self.max_row
    }
}

/// World-space `(width, depth)` of one chunk: `(size·hex·√3, size·hex·1.5)`.
pub fn chunk_world_extent(chunk_size: u32, hex_size: f32) -> Vec2 {
    let size = chunk_size as f32 * hex_size;
    Vec2::new(size * SQRT_3, size * ROW_SPACING)
}
