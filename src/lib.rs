//! Chunked hex-grid worldmap streaming for Bevy.
//! 基于区块的六边形世界地图流式加载
//!
//! The plugin keeps a large hex world streamed around a moving camera:
//! chunk switching with a hysteresis band, directional prefetch, a spatial
//! index tolerant of duplicated and reordered indexer updates, per-entity move
//! sequencing, pooled render resources, and a single visibility pass per frame
//! that every entity manager reads from.
//!
//! ```rust,no_run
//! use bevy::prelude::*;
//! use bevy_worldmap_streaming::prelude::*;
//!
//! App::new()
//!     .insert_resource(StreamingSettings {
//!         chunk_size: 8,
//!         ..Default::default()
//!     })
//!     .add_plugins(WorldmapStreamingPlugin)
//!     .run();
//! ```

use crate::chunk_loader::{
    ChunkLoaded, ChunkLoader, ChunkUnloaded, apply_completed_chunk_loads, queue_chunk_loads,
    spawn_chunk_fetches,
};
use crate::chunk_state::ChunkStateTracker;
use crate::chunk_switch::{
    CameraFocus, ChunkSwitchCommitted, ChunkSwitchTracker, evaluate_chunk_switch,
};
use crate::feed::{
    EntityUpdateEvent, ExploredTiles, IndexerFeed, apply_tile_updates, drain_indexer_feed,
};
use crate::managers::{
    ArmyManager, StructureManager, advance_army_moves, apply_army_updates,
    apply_structure_updates, unload_manager_chunks, update_army_visibility,
    update_structure_visibility,
};
use crate::move_sequencer::MoveRequestSequencer;
use crate::render_resources::{GeometryPool, LabelPool};
use crate::scene::{
    ResetWorldmap, WindowSignalReceived, WorldmapScene, handle_window_signals, reset_worldmap,
};
use crate::settings::StreamingSettings;
use crate::spatial_index::HexIndices;
use crate::visibility::{
    FrameVisibility, RefreshVisibleChunks, VisibilityOwner, begin_visibility_frame,
};
use bevy::log::{error, info};
use bevy::prelude::*;

pub mod chunk_loader;
pub mod chunk_state;
pub mod chunk_switch;
pub mod feed;
pub mod hex;
pub mod managers;
pub mod move_sequencer;
pub mod policy;
pub mod pool;
pub mod prefetch;
pub mod prelude;
pub mod render_resources;
pub mod scene;
pub mod settings;
pub mod spatial_index;
pub mod visibility;

/// Ordered stages of one streaming frame, chained in `Update`.
/// 流式加载每帧的有序阶段
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamingSystems {
    /// Window signals, resets and the indexer feed.
    /// 窗口信号、重置与索引器数据
    Input,
    /// Chunk switch decision.
    /// 区块切换判断
    ChunkSwitch,
    /// Queue, fetch and apply chunk loads.
    /// 区块加载
    ChunkLoad,
    /// Entity updates into the managers and indices.
    /// 实体更新
    Updates,
    /// The single visibility pass.
    /// 可见性计算
    Visibility,
    /// Managers reading this frame's visibility.
    /// 管理器读取可见性
    Managers,
}

/// Registers the streaming resources, events and systems.
/// 注册流式加载所需的资源、事件与系统
///
/// Insert [`StreamingSettings`](settings::StreamingSettings) before adding the
/// plugin to override the defaults; invalid settings are logged and replaced
/// by the defaults.
pub struct WorldmapStreamingPlugin;

impl Plugin for WorldmapStreamingPlugin {
    fn build(&self, app: &mut App) {
        let settings = match app.world().get_resource::<StreamingSettings>() {
            Some(settings) => match settings.validate() {
                Ok(()) => settings.clone(),
                Err(e) => {
                    error!("{}; falling back to default streaming settings", e);
                    StreamingSettings::default()
                }
            },
            None => StreamingSettings::default(),
        };
        info!(
            "Worldmap streaming: chunk size {}, render window {}x{}",
            settings.chunk_size, settings.render_chunk_size.x, settings.render_chunk_size.y
        );

        app.insert_resource(VisibilityOwner::new(settings.max_registered_chunks))
            .insert_resource(settings)
            .init_resource::<CameraFocus>()
            .init_resource::<ChunkSwitchTracker>()
            .init_resource::<ChunkLoader>()
            .init_resource::<ChunkStateTracker>()
            .init_resource::<HexIndices>()
            .init_resource::<MoveRequestSequencer>()
            .init_resource::<ArmyManager>()
            .init_resource::<StructureManager>()
            .init_resource::<LabelPool>()
            .init_resource::<GeometryPool>()
            .init_resource::<IndexerFeed>()
            .init_resource::<ExploredTiles>()
            .init_resource::<FrameVisibility>()
            .init_resource::<WorldmapScene>()
            .add_event::<ChunkSwitchCommitted>()
            .add_event::<ChunkLoaded>()
            .add_event::<ChunkUnloaded>()
            .add_event::<EntityUpdateEvent>()
            .add_event::<RefreshVisibleChunks>()
            .add_event::<WindowSignalReceived>()
            .add_event::<ResetWorldmap>()
            .configure_sets(
                Update,
                (
                    StreamingSystems::Input,
                    StreamingSystems::ChunkSwitch,
                    StreamingSystems::ChunkLoad,
                    StreamingSystems::Updates,
                    StreamingSystems::Visibility,
                    StreamingSystems::Managers,
                )
                    .chain(),
            )
            .add_systems(
                Update,
                (
                    (handle_window_signals, reset_worldmap, drain_indexer_feed)
                        .chain()
                        .in_set(StreamingSystems::Input),
                    evaluate_chunk_switch.in_set(StreamingSystems::ChunkSwitch),
                    (
                        queue_chunk_loads,
                        spawn_chunk_fetches,
                        apply_completed_chunk_loads,
                    )
                        .chain()
                        .in_set(StreamingSystems::ChunkLoad),
                    (
                        unload_manager_chunks,
                        apply_tile_updates,
                        apply_army_updates,
                        apply_structure_updates,
                        advance_army_moves,
                    )
                        .chain()
                        .in_set(StreamingSystems::Updates),
                    begin_visibility_frame.in_set(StreamingSystems::Visibility),
                    (update_army_visibility, update_structure_visibility)
                        .in_set(StreamingSystems::Managers),
                ),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_loader::FetchExecution;
    use crate::hex::{ChunkKey, HexCoordinate};

    fn app() -> App {
        let mut app = App::new();
        app.insert_resource(ChunkLoader::default().with_execution(FetchExecution::Inline))
            .add_plugins(WorldmapStreamingPlugin);
        app
    }

    #[test]
    fn invalid_settings_fall_back_to_defaults() {
        let mut app = App::new();
        app.insert_resource(StreamingSettings {
            chunk_size: 0,
            ..Default::default()
        })
        .add_plugins(WorldmapStreamingPlugin);
        assert_eq!(app.world().resource::<StreamingSettings>().chunk_size, 8);
    }

    #[test]
    fn feed_update_becomes_a_visible_indexed_army() {
        let mut app = app();
        app.world()
            .resource::<IndexerFeed>()
            .push(r#"{ "kind": "army", "entity_id": 7, "owner": "0xabc", "col": 2, "row": 2 }"#);
        app.update();

        let world = app.world();
        assert_eq!(
            world.resource::<ChunkSwitchTracker>().current(),
            Some(ChunkKey::new(0, 0))
        );
        assert_eq!(
            world
                .resource::<HexIndices>()
                .armies
                .get(HexCoordinate::new(2, 2))
                .map(|entry| entry.entity_id),
            Some(7)
        );
        assert_eq!(world.resource::<ArmyManager>().visible_armies(), vec![7]);
        assert_eq!(world.resource::<LabelPool>().in_use(), 1);
        assert_eq!(world.resource::<FrameVisibility>().frame_id(), 1);
        assert_eq!(world.resource::<ChunkLoader>().loaded_chunks().len(), 3);
    }

    #[test]
    fn army_outside_render_window_gets_no_label() {
        let mut app = app();
        app.world()
            .resource::<IndexerFeed>()
            .push(r#"{ "kind": "army", "entity_id": 9, "owner": "0xabc", "col": 500, "row": 0 }"#);
        app.update();

        let world = app.world();
        assert!(world.resource::<ArmyManager>().visible_armies().is_empty());
        assert_eq!(world.resource::<LabelPool>().in_use(), 0);
    }

    #[test]
    fn reset_empties_state_and_streams_again() {
        let mut app = app();
        app.world()
            .resource::<IndexerFeed>()
            .push(r#"{ "kind": "army", "entity_id": 7, "owner": "0xabc", "col": 2, "row": 2 }"#);
        app.update();
        app.update();

        app.world_mut().send_event(ResetWorldmap);
        app.update();

        let world = app.world();
        assert!(world.resource::<ArmyManager>().is_empty());
        assert!(world.resource::<HexIndices>().armies.is_empty());
        assert!(world.resource::<MoveRequestSequencer>().is_empty());
        assert_eq!(world.resource::<LabelPool>().in_use(), 0);
        // the anchor was cleared, so the same frame commits a fresh switch
        assert_eq!(world.resource::<ChunkSwitchTracker>().switches(), 1);
        assert_eq!(world.resource::<ChunkLoader>().loaded_chunks().len(), 3);
    }

    #[test]
    fn structure_count_change_refreshes_visibility_next_pass() {
        let mut app = app();
        app.update();
        let before = app.world().resource::<FrameVisibility>().stats().recomputations;

        app.world().resource::<IndexerFeed>().push(
            r#"{ "kind": "structure", "entity_id": 3, "owner": "0x1", "col": 1, "row": 1 }"#,
        );
        app.update();

        let world = app.world();
        assert_eq!(world.resource::<StructureManager>().total_structures(), 1);
        assert_eq!(world.resource::<StructureManager>().visible_structures(), &[3]);
        assert!(world.resource::<FrameVisibility>().stats().recomputations > before);
    }
}
