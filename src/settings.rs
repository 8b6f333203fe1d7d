use bevy::math::UVec2;
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised while loading or validating [`StreamingSettings`].
/// 流式设置加载或校验错误
#[derive(Debug)]
pub enum SettingsError {
    /// The settings document is not valid JSON for this type.
    /// 设置文档不是有效的 JSON
    Parse(serde_json::Error),
    /// A field holds a value the streaming systems cannot work with.
    /// 字段值无效
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Parse(e) => write!(f, "Failed to parse streaming settings: {e}"),
            SettingsError::InvalidValue { field, reason } => {
                write!(f, "Invalid streaming setting `{field}`: {reason}")
            }
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Parse(e) => Some(e),
            SettingsError::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Parse(e)
    }
}

/// Global configuration resource for worldmap streaming.
/// 世界地图流式加载的全局设置
///
/// # Configuration Categories
///
/// ## Grid
/// - `chunk_size`: data chunk stride in hexes, the unit of load/unload
/// - `render_chunk_size`: columns × rows of hexes that make up the render window
/// - `hex_size`: world-space radius of a single hex
///
/// ## Streaming
/// - `switch_padding`: hysteresis band, as a fraction of a chunk's width/depth
/// - `prefetch_forward_strides` / `prefetch_side_strides`: shape of the directional prefetch band
/// - `max_concurrent_fetches`: upper bound of chunk fetches in flight
///
/// ## Visibility
/// - `max_registered_chunks`: FIFO cap on chunk bounds known to the visibility owner
/// - `animation_max_distance`: beyond this distance from the focus, animations are culled
///
/// # Example
/// ```rust
/// # use bevy_worldmap_streaming::prelude::*;
/// let settings = StreamingSettings {
///     chunk_size: 16,
///     max_concurrent_fetches: 6,
///     ..Default::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Data chunk stride in hexes.
    /// 数据区块边长（格子数）
    pub chunk_size: u32,

    /// Render window size in hexes (cols, rows).
    /// 渲染窗口大小（列，行）
    pub render_chunk_size: UVec2,

    /// World-space size of one hex.
    /// 单个六边形的世界尺寸
    pub hex_size: f32,

    /// Fraction of the chunk extent the camera must travel before a new switch is accepted.
    /// 区块切换滞后带（占区块宽/深的比例）
    pub switch_padding: f32,

    /// Forward strides prefetched ahead of travel.
    /// 沿移动方向预取的步数
    pub prefetch_forward_strides: u32,

    /// Lateral strides prefetched on each side of travel.
    /// 移动方向两侧预取的步数
    pub prefetch_side_strides: u32,

    /// Chunk fetches allowed in flight at once.
    /// 同时进行的区块请求上限
    pub max_concurrent_fetches: usize,

    /// Chunk bounds kept by the visibility owner before the oldest is evicted.
    /// 可见性管理器保留的区块上限
    pub max_registered_chunks: usize,

    /// Maximum animation distance from the focus point.
    /// 动画最大距离
    pub animation_max_distance: f32,

    /// Drop move-request bookkeeping for armies whose last cell is unloaded.
    /// 区块卸载时清理军队移动请求记录
    pub clear_move_requests_on_unload: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 8,
            render_chunk_size: UVec2::new(60, 44),
            hex_size: 1.0,
            switch_padding: 0.25,
            prefetch_forward_strides: 1,
            prefetch_side_strides: 1,
            max_concurrent_fetches: 3,
            max_registered_chunks: 256,
            animation_max_distance: 140.0,
            clear_move_requests_on_unload: true,
        }
    }
}

impl StreamingSettings {
    /// Parse and validate a JSON settings document. Missing fields take their defaults.
    /// 解析并校验 JSON 设置
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.chunk_size == 0 {
            return Err(SettingsError::InvalidValue {
                field: "chunk_size",
                reason: "must be greater than zero",
            });
        }
        if self.render_chunk_size.x == 0 || self.render_chunk_size.y == 0 {
            return Err(SettingsError::InvalidValue {
                field: "render_chunk_size",
                reason: "both dimensions must be greater than zero",
            });
        }
        if !self.hex_size.is_finite() || self.hex_size <= 0.0 {
            return Err(SettingsError::InvalidValue {
                field: "hex_size",
                reason: "must be a finite positive number",
            });
        }
        if !self.switch_padding.is_finite() || !(0.0..=1.0).contains(&self.switch_padding) {
            return Err(SettingsError::InvalidValue {
                field: "switch_padding",
                reason: "must lie within 0.0..=1.0",
            });
        }
        if self.max_concurrent_fetches == 0 {
            return Err(SettingsError::InvalidValue {
                field: "max_concurrent_fetches",
                reason: "must be greater than zero",
            });
        }
        if self.max_registered_chunks == 0 {
            return Err(SettingsError::InvalidValue {
                field: "max_registered_chunks",
                reason: "must be greater than zero",
            });
        }
        if !self.animation_max_distance.is_finite() || self.animation_max_distance < 0.0 {
            return Err(SettingsError::InvalidValue {
                field: "animation_max_distance",
                reason: "must be a finite non-negative number",
            });
        }
        Ok(())
    }

    /// Chunk stride as a signed hex offset.
    pub fn stride(&self) -> i32 {
        self.chunk_size as i32
    }
}
