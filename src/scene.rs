use crate::chunk_loader::ChunkLoader;
use crate::chunk_state::ChunkStateTracker;
use crate::chunk_switch::ChunkSwitchTracker;
use crate::feed::ExploredTiles;
use crate::managers::{ArmyManager, StructureManager};
use crate::move_sequencer::MoveRequestSequencer;
use crate::render_resources::{GeometryPool, LabelPool};
use crate::settings::StreamingSettings;
use crate::spatial_index::HexIndices;
use crate::visibility::{FrameVisibility, RefreshVisibleChunks, VisibilityOwner, reset_visibility};
use bevy::log::{info, warn};
use bevy::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Window-level signals the worldmap listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSignal {
    /// The location in the URL changed; the camera may have been moved.
    UrlChanged,
    /// The page is going away.
    Teardown,
}

impl WindowSignal {
    pub const ALL: [WindowSignal; 2] = [WindowSignal::UrlChanged, WindowSignal::Teardown];
}

/// Identity of a registered listener. Removal must use the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Window lifecycle provided by the host.
/// 宿主提供的窗口生命周期接口
pub trait WindowHost {
    fn add_listener(&mut self, signal: WindowSignal, handle: ListenerHandle);
    fn remove_listener(&mut self, signal: WindowSignal, handle: ListenerHandle);
}

/// A window signal delivered by the host to a registered listener.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSignalReceived {
    pub signal: WindowSignal,
    pub handle: ListenerHandle,
}

/// Hard reset: anchor, indices, sequencer, managers and chunk state are emptied.
/// 硬重置世界地图
#[derive(Event, Debug, Clone, Copy, Default)]
pub struct ResetWorldmap;

/// Worldmap scene lifecycle.
/// 世界地图场景生命周期
///
/// The scene owns one listener handle for its whole life; `activate` registers
/// it and `deactivate` removes exactly that handle. Both are idempotent.
#[derive(Resource, Debug)]
pub struct WorldmapScene {
    handle: ListenerHandle,
    active: bool,
}

impl Default for WorldmapScene {
    fn default() -> Self {
        Self {
            handle: ListenerHandle::next(),
            active: false,
        }
    }
}

impl WorldmapScene {
    pub fn handle(&self) -> ListenerHandle {
        self.handle
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `false` if the scene was already active.
    pub fn activate(&mut self, host: &mut dyn WindowHost) -> bool {
        if self.active {
            return false;
        }
        for signal in WindowSignal::ALL {
            host.add_listener(signal, self.handle);
        }
        self.active = true;
        info!("Worldmap scene activated (listener {})", self.handle.0);
        true
    }

    /// Returns `false` if the scene was not active.
    pub fn deactivate(&mut self, host: &mut dyn WindowHost) -> bool {
        if !self.active {
            return false;
        }
        for signal in WindowSignal::ALL {
            host.remove_listener(signal, self.handle);
        }
        self.active = false;
        info!("Worldmap scene deactivated (listener {})", self.handle.0);
        true
    }
}

/// Turn window signals addressed to the scene into streaming events.
pub fn handle_window_signals(
    scene: Res<WorldmapScene>,
    mut signals: EventReader<WindowSignalReceived>,
    mut refresh: EventWriter<RefreshVisibleChunks>,
    mut reset: EventWriter<ResetWorldmap>,
) {
    for received in signals.read() {
        if !scene.is_active() || received.handle != scene.handle() {
            warn!(
                "Ignoring {:?} for listener {} (scene listener {}, active: {})",
                received.signal,
                received.handle.0,
                scene.handle().0,
                scene.is_active()
            );
            continue;
        }
        match received.signal {
            WindowSignal::UrlChanged => {
                refresh.write(RefreshVisibleChunks);
            }
            WindowSignal::Teardown => {
                reset.write(ResetWorldmap);
            }
        }
    }
}

/// Apply [`ResetWorldmap`].
#[allow(clippy::too_many_arguments)]
pub fn reset_worldmap(
    settings: Res<StreamingSettings>,
    mut requests: EventReader<ResetWorldmap>,
    mut tracker: ResMut<ChunkSwitchTracker>,
    mut loader: ResMut<ChunkLoader>,
    mut states: ResMut<ChunkStateTracker>,
    mut indices: ResMut<HexIndices>,
    mut sequencer: ResMut<MoveRequestSequencer>,
    mut managers: (ResMut<ArmyManager>, ResMut<StructureManager>),
    mut pools: (ResMut<LabelPool>, ResMut<GeometryPool>),
    mut explored: ResMut<ExploredTiles>,
    mut visibility: (ResMut<VisibilityOwner>, ResMut<FrameVisibility>),
) {
    if requests.read().count() == 0 {
        return;
    }
    let (armies, structures) = &mut managers;
    let (labels, geometry) = &mut pools;
    let (owner, frame) = &mut visibility;

    tracker.reset();
    loader.reset(geometry, settings.chunk_size);
    states.clear();
    armies.clear(labels);
    structures.clear();
    indices.clear();
    sequencer.clear_all();
    explored.clear();
    reset_visibility(owner, frame);
    info!("Worldmap reset");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingHost {
        listeners: HashMap<WindowSignal, Vec<ListenerHandle>>,
    }

    impl WindowHost for RecordingHost {
        fn add_listener(&mut self, signal: WindowSignal, handle: ListenerHandle) {
            self.listeners.entry(signal).or_default().push(handle);
        }

        fn remove_listener(&mut self, signal: WindowSignal, handle: ListenerHandle) {
            if let Some(handles) = self.listeners.get_mut(&signal) {
                handles.retain(|h| *h != handle);
            }
        }
    }

    impl RecordingHost {
        fn total(&self) -> usize {
            self.listeners.values().map(Vec::len).sum()
        }
    }

    #[test]
    fn activation_is_symmetric_and_idempotent() {
        let mut host = RecordingHost::default();
        let mut scene = WorldmapScene::default();

        assert!(scene.activate(&mut host));
        assert!(!scene.activate(&mut host));
        assert_eq!(host.total(), 2);
        assert_eq!(
            host.listeners[&WindowSignal::UrlChanged],
            vec![scene.handle()]
        );

        assert!(scene.deactivate(&mut host));
        assert!(!scene.deactivate(&mut host));
        assert_eq!(host.total(), 0);

        // reactivation reuses the same identity
        scene.activate(&mut host);
        assert_eq!(host.listeners[&WindowSignal::Teardown], vec![scene.handle()]);
    }

    #[test]
    fn scenes_get_distinct_handles() {
        assert_ne!(
            WorldmapScene::default().handle(),
            WorldmapScene::default().handle()
        );
    }

    #[test]
    fn signals_for_other_listeners_are_ignored() {
        let mut app = App::new();
        app.init_resource::<WorldmapScene>()
            .add_event::<WindowSignalReceived>()
            .add_event::<RefreshVisibleChunks>()
            .add_event::<ResetWorldmap>()
            .add_systems(Update, handle_window_signals);

        let mut host = RecordingHost::default();
        app.world_mut()
            .resource_mut::<WorldmapScene>()
            .activate(&mut host);
        let handle = app.world().resource::<WorldmapScene>().handle();

        app.world_mut().send_event(WindowSignalReceived {
            signal: WindowSignal::Teardown,
            handle: ListenerHandle(u64::MAX),
        });
        app.world_mut().send_event(WindowSignalReceived {
            signal: WindowSignal::UrlChanged,
            handle,
        });
        app.update();

        assert_eq!(app.world().resource::<Events<ResetWorldmap>>().len(), 0);
        assert_eq!(app.world().resource::<Events<RefreshVisibleChunks>>().len(), 1);
    }
}
