//! Directional prefetch: which chunks to load ahead of camera travel.
//! 方向性预取：沿相机移动方向提前加载的区块

use crate::hex::{ChunkKey, ChunkKeyError};
use bevy::math::Vec2;
use serde::{Deserialize, Serialize};

/// Axis of camera travel. `X` advances columns, `Z` advances rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementAxis {
    X,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementSign {
    Positive,
    Negative,
}

impl MovementSign {
    pub fn as_i32(self) -> i32 {
        match self {
            MovementSign::Positive => 1,
            MovementSign::Negative => -1,
        }
    }
}

/// Direction of travel: an axis plus a sign along it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TravelDirection {
    pub axis: MovementAxis,
    pub sign: MovementSign,
}

impl TravelDirection {
    /// Dominant direction of a `(dx, dz)` displacement. `None` for a zero vector.
    /// Ties go to the x axis.
    pub fn dominant(delta: Vec2) -> Option<Self> {
        if delta.x == 0.0 && delta.y == 0.0 {
            return None;
        }
        let (axis, component) = if delta.x.abs() >= delta.y.abs() {
            (MovementAxis::X, delta.x)
        } else {
            (MovementAxis::Z, delta.y)
        };
        let sign = if component >= 0.0 {
            MovementSign::Positive
        } else {
            MovementSign::Negative
        };
        Some(Self { axis, sign })
    }

    /// Direction from chunk `from` to chunk `to`, by the larger of the row/col steps.
    pub fn between_chunks(from: ChunkKey, to: ChunkKey) -> Option<Self> {
        Self::dominant(Vec2::new(
            (to.col - from.col) as f32,
            (to.row - from.row) as f32,
        ))
    }
}

/// Input of [`derive_directional_prefetch_chunk_keys`].
#[derive(Debug, Clone, Copy)]
pub struct DirectionalPrefetchRequest<'a> {
    /// Chunk the camera is entering, as `"row,col"`.
    pub forward_chunk_key: &'a str,
    pub chunk_size: u32,
    pub forward_depth_strides: u32,
    pub side_radius_strides: u32,
    pub movement_axis: MovementAxis,
    pub movement_sign: MovementSign,
}

/// Enumerate the chunk band ahead of travel.
/// 枚举移动方向前方的区块带
///
/// Forward strides `0..=forward_depth_strides` form the outer loop and lateral
/// strides `-side_radius_strides..=side_radius_strides` the inner loop.
/// Duplicates are kept; callers dedupe against what is already loaded.
pub fn derive_directional_prefetch_chunk_keys(
    request: &DirectionalPrefetchRequest<'_>,
) -> Result<Vec<ChunkKey>, ChunkKeyError> {
    let origin: ChunkKey = request.forward_chunk_key.parse()?;
    Ok(prefetch_band(
        origin,
        request.chunk_size,
        request.forward_depth_strides,
        request.side_radius_strides,
        TravelDirection {
            axis: request.movement_axis,
            sign: request.movement_sign,
        },
    ))
}

/// Typed form of [`derive_directional_prefetch_chunk_keys`] for callers that
/// already hold a parsed key.
pub fn prefetch_band(
    origin: ChunkKey,
    chunk_size: u32,
    forward_depth_strides: u32,
    side_radius_strides: u32,
    direction: TravelDirection,
) -> Vec<ChunkKey> {
    let stride = chunk_size as i32;
    let depth = forward_depth_strides as i32;
    let radius = side_radius_strides as i32;
    let sign = direction.sign.as_i32();

    let mut keys = Vec::with_capacity(((depth + 1) * (2 * radius + 1)) as usize);
    for forward in 0..=depth {
        for side in -radius..=radius {
            let advance = forward * stride * sign;
            let lateral = side * stride;
            let key = match direction.axis {
                MovementAxis::X => origin.offset(lateral, advance),
                MovementAxis::Z => origin.offset(advance, lateral),
            };
            keys.push(key);
        }
    }
    keys
}
