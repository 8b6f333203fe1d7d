use crate::hex::{ChunkKey, chunk_world_extent};
use crate::prefetch::TravelDirection;
use crate::settings::StreamingSettings;
use bevy::log::{debug, trace};
use bevy::math::Vec2;
use bevy::prelude::*;

/// Camera input for the current frame, written by the host.
/// 当前帧的相机输入（由宿主写入）
///
/// `position` is the camera target on the ground plane as `(x, z)`.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct CameraFocus {
    pub position: Vec2,
    /// Half size of the visible ground rectangle around `position`.
    pub view_half_extent: Vec2,
    /// Travel direction reported by the input provider, if any.
    pub travel: Option<TravelDirection>,
}

impl Default for CameraFocus {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            view_half_extent: Vec2::new(40.0, 30.0),
            travel: None,
        }
    }
}

/// Committed chunk-switch state.
/// 已提交的区块切换状态
#[derive(Resource, Debug, Default, Clone)]
pub struct ChunkSwitchTracker {
    /// Chunk the scene is currently centred on. `None` until the first switch
    /// and again after a hard reset.
    current: Option<ChunkKey>,
    /// Camera position at the last accepted switch.
    last_switch_position: Option<Vec2>,
    switches: u64,
}

impl ChunkSwitchTracker {
    pub fn current(&self) -> Option<ChunkKey> {
        self.current
    }

    pub fn last_switch_position(&self) -> Option<Vec2> {
        self.last_switch_position
    }

    /// Number of switches committed since the last reset.
    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn commit(&mut self, chunk: ChunkKey, position: Vec2) -> Option<ChunkKey> {
        let previous = self.current.replace(chunk);
        self.last_switch_position = Some(position);
        self.switches += 1;
        previous
    }
}

/// Sent when the scene moves its centre to a new chunk.
/// 场景中心切换到新区块时发送
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub struct ChunkSwitchCommitted {
    pub previous: Option<ChunkKey>,
    pub chunk: ChunkKey,
    pub direction: Option<TravelDirection>,
}

/// Whether a pending chunk switch should be held back by the hysteresis band.
/// 判断区块切换是否应被滞后带延迟
///
/// Without an anchor or a recorded switch position the answer is always
/// `false`. Otherwise the switch is delayed only while the camera is strictly
/// inside `padding × width` on x *and* `padding × depth` on z of the last
/// switch position.
pub fn should_delay_chunk_switch(
    anchor: Option<ChunkKey>,
    last_switch_position: Option<Vec2>,
    camera_position: Vec2,
    chunk_size: u32,
    hex_size: f32,
    padding: f32,
) -> bool {
    let (Some(_), Some(last)) = (anchor, last_switch_position) else {
        return false;
    };
    let extent = chunk_world_extent(chunk_size, hex_size);
    let dx = (camera_position.x - last.x).abs();
    let dz = (camera_position.y - last.y).abs();
    dx < padding * extent.x && dz < padding * extent.y
}

/// Chunk the camera is looking at, sampled slightly ahead so chunks load early
/// in both directions.
pub fn focus_chunk(position: Vec2, chunk_size: u32, hex_size: f32) -> ChunkKey {
    let extent = chunk_world_extent(chunk_size, hex_size);
    let adjusted = Vec2::new(position.x + extent.x / 2.0, position.y + extent.y / 3.0);
    ChunkKey::from_world(adjusted, chunk_size, hex_size)
}

/// Commit a new centre chunk when the camera leaves the current one.
/// 相机离开当前区块时提交新的中心区块
pub fn evaluate_chunk_switch(
    settings: Res<StreamingSettings>,
    focus: Res<CameraFocus>,
    mut tracker: ResMut<ChunkSwitchTracker>,
    mut committed: EventWriter<ChunkSwitchCommitted>,
) {
    let candidate = focus_chunk(focus.position, settings.chunk_size, settings.hex_size);
    if tracker.current == Some(candidate) {
        return;
    }

    if should_delay_chunk_switch(
        tracker.current,
        tracker.last_switch_position,
        focus.position,
        settings.chunk_size,
        settings.hex_size,
        settings.switch_padding,
    ) {
        trace!(
            "Chunk switch to {} delayed inside hysteresis band",
            candidate
        );
        return;
    }

    let direction = focus.travel.or_else(|| {
        tracker
            .current
            .and_then(|previous| TravelDirection::between_chunks(previous, candidate))
    });
    let previous = tracker.commit(candidate, focus.position);
    debug!(
        "Chunk switch committed: {:?} -> {} ({:?})",
        previous.map(|key| key.to_string()),
        candidate,
        direction
    );
    committed.write(ChunkSwitchCommitted {
        previous,
        chunk: candidate,
        direction,
    });
}
