use crate::chunk_switch::{CameraFocus, ChunkSwitchTracker};
use crate::hex::{ChunkBounds, ChunkKey, HexCoordinate};
use crate::settings::StreamingSettings;
use bevy::log::{debug, trace};
use bevy::math::{Rect, Vec2};
use bevy::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};

/// Ask the visibility owner to recompute on its next pass.
/// 请求可见性管理器在下一次计算时刷新
///
/// Managers send this instead of computing visibility themselves.
#[derive(Event, Debug, Clone, Copy, Default)]
pub struct RefreshVisibleChunks;

/// Counters describing the visibility pass.
/// 可见性计算统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibilityStats {
    pub frame_id: u64,
    pub registered_chunks: usize,
    pub visible_chunks: usize,
    /// Passes that actually recomputed.
    pub recomputations: u64,
    /// Passes that found nothing dirty.
    pub reused_frames: u64,
}

/// Chunk bounds known to the visibility pass.
/// 可见性计算所用的区块边界注册表
///
/// Registration keeps insertion order; past `max_registered_chunks` the
/// oldest chunk is evicted first.
#[derive(Resource, Debug)]
pub struct VisibilityOwner {
    chunks: HashMap<ChunkKey, Rect>,
    order: VecDeque<ChunkKey>,
    max_registered: usize,
    dirty: bool,
    last_focus: Option<Vec2>,
    last_view_half_extent: Option<Vec2>,
    last_center: Option<ChunkKey>,
}

impl Default for VisibilityOwner {
    fn default() -> Self {
        Self::new(StreamingSettings::default().max_registered_chunks)
    }
}

impl VisibilityOwner {
    pub fn new(max_registered: usize) -> Self {
        Self {
            chunks: HashMap::new(),
            order: VecDeque::new(),
            max_registered: max_registered.max(1),
            dirty: true,
            last_focus: None,
            last_view_half_extent: None,
            last_center: None,
        }
    }

    /// Register or update the world rectangle of `chunk`.
    pub fn register_chunk(&mut self, chunk: ChunkKey, rect: Rect) {
        if self.chunks.insert(chunk, rect).is_none() {
            self.order.push_back(chunk);
            while self.order.len() > self.max_registered {
                if let Some(evicted) = self.order.pop_front() {
                    self.chunks.remove(&evicted);
                    trace!("Evicted chunk {} from visibility registry", evicted);
                }
            }
        }
        self.dirty = true;
    }

    pub fn unregister_chunk(&mut self, chunk: ChunkKey) {
        if self.chunks.remove(&chunk).is_some() {
            self.order.retain(|key| *key != chunk);
            self.dirty = true;
        }
    }

    pub fn is_registered(&self, chunk: ChunkKey) -> bool {
        self.chunks.contains_key(&chunk)
    }

    pub fn registered_len(&self) -> usize {
        self.chunks.len()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_max_registered(&mut self, max: usize) {
        self.max_registered = max.max(1);
    }

    /// Forget every registered chunk.
    pub fn reset(&mut self) {
        let max = self.max_registered;
        *self = Self::new(max);
    }
}

/// Visibility computed for the current frame. Read-only outside this module.
/// 当前帧的可见性结果（模块外只读）
#[derive(Resource, Debug, Default)]
pub struct FrameVisibility {
    frame_id: u64,
    focus: Vec2,
    view: Rect,
    visible_chunks: HashSet<ChunkKey>,
    render_bounds: Option<ChunkBounds>,
    animation_max_distance: f32,
    stats: VisibilityStats,
}

impl FrameVisibility {
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn is_chunk_visible(&self, chunk: ChunkKey) -> bool {
        self.visible_chunks.contains(&chunk)
    }

    /// Visible chunks, sorted.
    pub fn visible_chunks(&self) -> Vec<ChunkKey> {
        let mut chunks: Vec<ChunkKey> = self.visible_chunks.iter().copied().collect();
        chunks.sort();
        chunks
    }

    /// Hex window around the committed centre chunk, if one was committed.
    pub fn render_bounds(&self) -> Option<ChunkBounds> {
        self.render_bounds
    }

    pub fn is_hex_in_render_bounds(&self, coord: HexCoordinate) -> bool {
        self.render_bounds
            .is_some_and(|bounds| bounds.contains(coord))
    }

    /// Whether something at `point` with bounding `radius` is close enough to animate.
    pub fn should_animate(&self, point: Vec2, radius: f32) -> bool {
        let reach = Rect::from_center_half_size(
            self.view.center(),
            self.view.half_size() + Vec2::splat(radius.max(0.0)),
        );
        reach.contains(point)
            && point.distance(self.focus) <= self.animation_max_distance + radius
    }

    pub fn stats(&self) -> VisibilityStats {
        self.stats
    }

    fn begin_frame(
        &mut self,
        owner: &mut VisibilityOwner,
        focus: &CameraFocus,
        center: Option<ChunkKey>,
        settings: &StreamingSettings,
    ) {
        self.frame_id += 1;
        self.stats.frame_id = self.frame_id;

        if owner.last_focus != Some(focus.position)
            || owner.last_view_half_extent != Some(focus.view_half_extent)
            || owner.last_center != center
        {
            owner.dirty = true;
        }
        if !owner.dirty {
            self.stats.reused_frames += 1;
            return;
        }

        self.focus = focus.position;
        self.view = Rect::from_center_half_size(focus.position, focus.view_half_extent);
        self.animation_max_distance = settings.animation_max_distance;
        self.visible_chunks = owner
            .chunks
            .iter()
            .filter(|(_, rect)| !rect.intersect(self.view).is_empty())
            .map(|(&key, _)| key)
            .collect();
        self.render_bounds = center.map(|center| {
            ChunkBounds::around(
                center,
                settings.render_chunk_size.x,
                settings.render_chunk_size.y,
            )
        });

        owner.dirty = false;
        owner.last_focus = Some(focus.position);
        owner.last_view_half_extent = Some(focus.view_half_extent);
        owner.last_center = center;

        self.stats.registered_chunks = owner.chunks.len();
        self.stats.visible_chunks = self.visible_chunks.len();
        self.stats.recomputations += 1;
        trace!(
            "Visibility frame {}: {} of {} chunk(s) visible",
            self.frame_id, self.stats.visible_chunks, self.stats.registered_chunks
        );
    }

    fn reset(&mut self) {
        *self = Self {
            frame_id: self.frame_id,
            ..Default::default()
        };
    }
}

/// The one per-frame visibility pass.
/// 每帧唯一的可见性计算入口
///
/// Runs in [`StreamingSystems::Visibility`](crate::StreamingSystems::Visibility);
/// every manager runs after it and only reads [`FrameVisibility`].
pub fn begin_visibility_frame(
    settings: Res<StreamingSettings>,
    focus: Res<CameraFocus>,
    tracker: Res<ChunkSwitchTracker>,
    mut refresh: EventReader<RefreshVisibleChunks>,
    mut owner: ResMut<VisibilityOwner>,
    mut frame: ResMut<FrameVisibility>,
) {
    if refresh.read().count() > 0 {
        owner.mark_dirty();
    }
    frame.begin_frame(&mut owner, &focus, tracker.current(), &settings);
}

/// Drop all visibility state. Used by the worldmap reset.
pub(crate) fn reset_visibility(owner: &mut VisibilityOwner, frame: &mut FrameVisibility) {
    owner.reset();
    frame.reset();
    debug!("Visibility state reset");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_at(x: f32, z: f32) -> Rect {
        Rect::from_corners(Vec2::new(x, z), Vec2::new(x + 10.0, z + 10.0))
    }

    fn app() -> App {
        let mut app = App::new();
        app.insert_resource(StreamingSettings::default())
            .insert_resource(CameraFocus {
                position: Vec2::ZERO,
                view_half_extent: Vec2::splat(20.0),
                travel: None,
            })
            .init_resource::<ChunkSwitchTracker>()
            .init_resource::<VisibilityOwner>()
            .init_resource::<FrameVisibility>()
            .add_event::<RefreshVisibleChunks>()
            .add_systems(Update, begin_visibility_frame);
        app
    }

    #[test]
    fn one_pass_per_frame() {
        let mut app = app();
        app.update();
        app.update();
        app.update();
        let stats = app.world().resource::<FrameVisibility>().stats();
        assert_eq!(stats.frame_id, 3);
        assert_eq!(stats.recomputations, 1);
        assert_eq!(stats.reused_frames, 2);
    }

    #[test]
    fn registered_chunks_intersecting_the_view_are_visible() {
        let mut app = app();
        {
            let mut owner = app.world_mut().resource_mut::<VisibilityOwner>();
            owner.register_chunk(ChunkKey::new(0, 0), rect_at(0.0, 0.0));
            owner.register_chunk(ChunkKey::new(0, 80), rect_at(100.0, 0.0));
        }
        app.update();
        let frame = app.world().resource::<FrameVisibility>();
        assert!(frame.is_chunk_visible(ChunkKey::new(0, 0)));
        assert!(!frame.is_chunk_visible(ChunkKey::new(0, 80)));
        assert_eq!(frame.visible_chunks(), vec![ChunkKey::new(0, 0)]);
    }

    #[test]
    fn refresh_event_forces_a_recompute() {
        let mut app = app();
        app.update();
        app.world_mut().send_event(RefreshVisibleChunks);
        app.update();
        assert_eq!(
            app.world().resource::<FrameVisibility>().stats().recomputations,
            2
        );
    }

    #[test]
    fn zooming_out_recomputes_the_visible_set() {
        let mut app = app();
        app.world_mut()
            .resource_mut::<VisibilityOwner>()
            .register_chunk(ChunkKey::new(0, 80), rect_at(100.0, 0.0));
        app.update();
        assert!(
            !app.world()
                .resource::<FrameVisibility>()
                .is_chunk_visible(ChunkKey::new(0, 80))
        );

        app.world_mut().resource_mut::<CameraFocus>().view_half_extent = Vec2::splat(200.0);
        app.update();

        let frame = app.world().resource::<FrameVisibility>();
        assert!(frame.is_chunk_visible(ChunkKey::new(0, 80)));
        assert_eq!(frame.stats().recomputations, 2);
    }

    #[test]
    fn registry_evicts_oldest_first() {
        let mut owner = VisibilityOwner::new(2);
        owner.register_chunk(ChunkKey::new(0, 0), rect_at(0.0, 0.0));
        owner.register_chunk(ChunkKey::new(0, 8), rect_at(10.0, 0.0));
        owner.register_chunk(ChunkKey::new(0, 0), rect_at(0.0, 0.0));
        owner.register_chunk(ChunkKey::new(0, 16), rect_at(20.0, 0.0));
        assert!(!owner.is_registered(ChunkKey::new(0, 0)));
        assert!(owner.is_registered(ChunkKey::new(0, 8)));
        assert!(owner.is_registered(ChunkKey::new(0, 16)));
        assert_eq!(owner.registered_len(), 2);
    }

    #[test]
    fn animation_is_culled_by_distance() {
        let mut app = app();
        app.world_mut().resource_mut::<StreamingSettings>().animation_max_distance = 10.0;
        app.update();
        let frame = app.world().resource::<FrameVisibility>();
        assert!(frame.should_animate(Vec2::new(5.0, 0.0), 0.0));
        assert!(!frame.should_animate(Vec2::new(15.0, 0.0), 0.0));
        assert!(frame.should_animate(Vec2::new(15.0, 0.0), 6.0));
    }
}
