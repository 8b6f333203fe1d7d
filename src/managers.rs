use crate::chunk_loader::ChunkUnloaded;
use crate::feed::{ArmyUpdate, EntityUpdate, EntityUpdateEvent, StructureUpdate};
use crate::hex::{Address, ChunkBounds, EntityId, HexCoordinate};
use crate::move_sequencer::{MoveRequestSequencer, MoveRequestToken};
use crate::policy::{
    StructureTileUpdateActions, StructureUpdateSignals, resolve_structure_tile_update_actions,
    should_army_remain_visible_in_bounds,
};
use crate::pool::PoolHandle;
use crate::render_resources::{EntityLabel, LabelPool};
use crate::settings::StreamingSettings;
use crate::spatial_index::{EntityHexIndex, HexIndices, SpatialIndexEntry};
use crate::visibility::{FrameVisibility, RefreshVisibleChunks};
use bevy::log::{debug, trace};
use bevy::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// One grid step from `from` towards `to`, moving both axes at once.
fn step_towards(from: HexCoordinate, to: HexCoordinate) -> HexCoordinate {
    HexCoordinate::new(
        from.col + (to.col - from.col).signum(),
        from.row + (to.row - from.row).signum(),
    )
}

/// Cells visited between `from` (exclusive) and `to` (inclusive).
fn step_path(from: HexCoordinate, to: HexCoordinate) -> VecDeque<HexCoordinate> {
    let mut path = VecDeque::new();
    let mut current = from;
    while current != to {
        current = step_towards(current, to);
        path.push_back(current);
    }
    path
}

/// In-flight move of an army.
/// 军队正在进行的移动
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmyMovement {
    pub source: HexCoordinate,
    pub destination: HexCoordinate,
    pub token: MoveRequestToken,
    path: VecDeque<HexCoordinate>,
}

impl ArmyMovement {
    pub fn remaining_steps(&self) -> usize {
        self.path.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmyRecord {
    pub owner: Address,
    /// Cell the army is drawn at this frame.
    pub position: HexCoordinate,
    pub movement: Option<ArmyMovement>,
    pub visible: bool,
    pub animating: bool,
    label: Option<PoolHandle>,
}

impl ArmyRecord {
    pub fn label(&self) -> Option<PoolHandle> {
        self.label
    }

    /// Where the army is heading, or where it stands.
    pub fn destination(&self) -> HexCoordinate {
        self.movement
            .as_ref()
            .map_or(self.position, |movement| movement.destination)
    }
}

/// Armies known to the worldmap.
/// 世界地图上的军队
///
/// While an army moves it is indexed at both its source and its destination;
/// the source cell is released once the move completes.
#[derive(Resource, Debug, Default)]
pub struct ArmyManager {
    armies: HashMap<EntityId, ArmyRecord>,
}

impl ArmyManager {
    pub fn get(&self, entity_id: EntityId) -> Option<&ArmyRecord> {
        self.armies.get(&entity_id)
    }

    pub fn len(&self) -> usize {
        self.armies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armies.is_empty()
    }

    /// Visible armies, sorted by id.
    pub fn visible_armies(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .armies
            .iter()
            .filter(|(_, army)| army.visible)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Apply one update from the feed or a chunk payload.
    /// 应用一条军队更新
    pub fn apply_update(
        &mut self,
        update: &ArmyUpdate,
        index: &mut EntityHexIndex,
        sequencer: &mut MoveRequestSequencer,
        labels: &mut LabelPool,
    ) {
        let id = update.entity_id;
        if update.destroyed {
            self.remove(id, index, sequencer, labels);
            return;
        }

        let destination = update.position();
        let entry = SpatialIndexEntry {
            entity_id: id,
            owner: update.owner.clone(),
        };
        if !self.armies.contains_key(&id) {
            index.insert(destination, entry);
            self.armies.insert(
                id,
                ArmyRecord {
                    owner: update.owner.clone(),
                    position: destination,
                    movement: None,
                    visible: false,
                    animating: false,
                    label: None,
                },
            );
            trace!("Army {} first seen at {}", id, destination);
            return;
        }
        let Some(army) = self.armies.get_mut(&id) else {
            return;
        };

        army.owner = update.owner.clone();
        if army.destination() == destination {
            // duplicate or owner-only change
            for cell in index.cells_for_entity(id) {
                index.insert(cell, entry.clone());
            }
            return;
        }

        let token = sequencer.register(id);
        index.remove_all_entries_for_entity(id);
        index.insert(army.position, entry.clone());
        index.insert(destination, entry);
        debug!(
            "Army {} moving {} -> {} (request {})",
            id, army.position, destination, token
        );
        army.movement = Some(ArmyMovement {
            source: army.position,
            destination,
            token,
            path: step_path(army.position, destination),
        });
    }

    /// Advance every current move by one cell. Superseded moves are dropped.
    /// 推进所有移动一格，过期的移动被丢弃
    pub fn advance_moves(&mut self, index: &mut EntityHexIndex, sequencer: &MoveRequestSequencer) {
        for (&id, army) in self.armies.iter_mut() {
            let Some(movement) = army.movement.as_mut() else {
                continue;
            };
            let entry = SpatialIndexEntry {
                entity_id: id,
                owner: army.owner.clone(),
            };

            if !sequencer.should_apply(id, movement.token) {
                trace!("Dropping stale move {} for army {}", movement.token, id);
                army.movement = None;
                index.remove_all_entries_for_entity(id);
                index.insert(army.position, entry);
                continue;
            }

            if let Some(next) = movement.path.pop_front() {
                army.position = next;
            }
            if movement.path.is_empty() {
                army.position = movement.destination;
                army.movement = None;
                index.remove_all_entries_for_entity(id);
                index.insert(army.position, entry);
                trace!("Army {} arrived at {}", id, army.position);
            }
        }
    }

    /// Forget an army and everything attached to it.
    pub fn remove(
        &mut self,
        entity_id: EntityId,
        index: &mut EntityHexIndex,
        sequencer: &mut MoveRequestSequencer,
        labels: &mut LabelPool,
    ) -> bool {
        index.remove_all_entries_for_entity(entity_id);
        sequencer.clear(entity_id);
        match self.armies.remove(&entity_id) {
            Some(army) => {
                if let Some(handle) = army.label {
                    labels.release(handle);
                }
                debug!("Removed army {}", entity_id);
                true
            }
            None => false,
        }
    }

    /// Drop index cells inside an unloaded chunk; armies left with no cell are forgotten.
    pub fn unload_bounds(
        &mut self,
        bounds: &ChunkBounds,
        index: &mut EntityHexIndex,
        sequencer: &mut MoveRequestSequencer,
        labels: &mut LabelPool,
        clear_move_requests: bool,
    ) -> Vec<EntityId> {
        let touched: BTreeSet<EntityId> = index
            .remove_entries_in_bounds(bounds)
            .into_iter()
            .map(|(_, entry)| entry.entity_id)
            .collect();

        let mut dropped = Vec::new();
        for id in touched {
            if index.contains_entity(id) {
                continue;
            }
            if let Some(army) = self.armies.remove(&id) {
                if let Some(handle) = army.label {
                    labels.release(handle);
                }
            }
            if clear_move_requests {
                sequencer.clear(id);
            }
            dropped.push(id);
        }
        dropped
    }

    /// Recompute which armies are drawn from this frame's visibility.
    pub fn update_visibility(
        &mut self,
        frame: &FrameVisibility,
        labels: &mut LabelPool,
        hex_size: f32,
    ) {
        let bounds = frame.render_bounds();
        for (&id, army) in self.armies.iter_mut() {
            let source = army.movement.as_ref().map(|movement| movement.source);
            let visible = bounds.is_some_and(|bounds| {
                should_army_remain_visible_in_bounds(army.destination(), &bounds, source)
            });
            army.visible = visible;
            army.animating =
                visible && frame.should_animate(army.position.to_world(hex_size), hex_size);

            match (visible, army.label) {
                (true, None) => {
                    let acquired = labels.acquire(EntityLabel::default);
                    army.label = Some(acquired.handle);
                }
                (false, Some(handle)) => {
                    labels.release(handle);
                    army.label = None;
                }
                _ => {}
            }
            if let Some(label) = army.label.and_then(|handle| labels.get_mut(handle)) {
                label.entity_id = id;
                label.text = format!("Army #{id}");
                label.anchor = Some(army.position);
            }
        }
    }

    pub(crate) fn clear(&mut self, labels: &mut LabelPool) {
        for (_, army) in self.armies.drain() {
            if let Some(handle) = army.label {
                labels.release(handle);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureRecord {
    pub owner: Address,
    pub position: HexCoordinate,
    pub category: Option<String>,
}

/// Structures known to the worldmap.
/// 世界地图上的建筑
#[derive(Resource, Debug, Default)]
pub struct StructureManager {
    structures: HashMap<EntityId, StructureRecord>,
    total_structures: usize,
    pending_tile_refresh: BTreeSet<HexCoordinate>,
    cache_generation: u64,
    visible: Vec<EntityId>,
}

impl StructureManager {
    pub fn get(&self, entity_id: EntityId) -> Option<&StructureRecord> {
        self.structures.get(&entity_id)
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Count as of the last count-changing batch.
    pub fn total_structures(&self) -> usize {
        self.total_structures
    }

    /// Bumped whenever cached structure data must be thrown away.
    pub fn cache_generation(&self) -> u64 {
        self.cache_generation
    }

    pub fn pending_tile_refreshes(&self) -> usize {
        self.pending_tile_refresh.len()
    }

    /// Take the tiles the renderer should repaint.
    pub fn take_tile_refreshes(&mut self) -> Vec<HexCoordinate> {
        std::mem::take(&mut self.pending_tile_refresh)
            .into_iter()
            .collect()
    }

    /// Structures inside the current render bounds, sorted by id.
    pub fn visible_structures(&self) -> &[EntityId] {
        &self.visible
    }

    /// Apply a batch of structure updates and carry out the resulting actions.
    /// 应用一批建筑更新并执行相应操作
    pub fn apply_batch(
        &mut self,
        updates: &[&StructureUpdate],
        index: &mut EntityHexIndex,
    ) -> StructureTileUpdateActions {
        if updates.is_empty() {
            return StructureTileUpdateActions::default();
        }

        let count_before = self.structures.len();
        let mut positions = Vec::new();
        for update in updates {
            let id = update.entity_id;
            if update.destroyed {
                index.remove_all_entries_for_entity(id);
                self.structures.remove(&id);
                continue;
            }
            let position = update.position();
            if self
                .structures
                .get(&id)
                .is_some_and(|existing| existing.position != position)
            {
                index.remove_all_entries_for_entity(id);
            }
            index.insert(
                position,
                SpatialIndexEntry {
                    entity_id: id,
                    owner: update.owner.clone(),
                },
            );
            self.structures.insert(
                id,
                StructureRecord {
                    owner: update.owner.clone(),
                    position,
                    category: update.category.clone(),
                },
            );
            positions.push(position);
        }

        let actions = resolve_structure_tile_update_actions(StructureUpdateSignals {
            has_positions: !positions.is_empty(),
            count_changed: self.structures.len() != count_before,
        });
        if actions.schedule_tile_refresh {
            self.pending_tile_refresh.extend(positions);
        }
        if actions.clear_cache {
            self.cache_generation += 1;
            self.pending_tile_refresh.clear();
        }
        if actions.update_total_structures {
            self.total_structures = self.structures.len();
        }
        actions
    }

    /// Drop index cells inside an unloaded chunk and the structures that stood there.
    pub fn unload_bounds(&mut self, bounds: &ChunkBounds, index: &mut EntityHexIndex) -> usize {
        let removed: HashSet<EntityId> = index
            .remove_entries_in_bounds(bounds)
            .into_iter()
            .map(|(_, entry)| entry.entity_id)
            .collect();
        let before = self.structures.len();
        self.structures
            .retain(|id, _| !removed.contains(id) || index.contains_entity(*id));
        self.pending_tile_refresh.retain(|coord| !bounds.contains(*coord));
        before - self.structures.len()
    }

    pub fn update_visibility(&mut self, frame: &FrameVisibility) {
        self.visible = self
            .structures
            .iter()
            .filter(|(_, structure)| frame.is_hex_in_render_bounds(structure.position))
            .map(|(&id, _)| id)
            .collect();
        self.visible.sort_unstable();
    }

    pub(crate) fn clear(&mut self) {
        *self = Self {
            cache_generation: self.cache_generation + 1,
            ..Default::default()
        };
    }
}

/// Remove unloaded chunk cells from both managers.
/// 从各管理器中移除已卸载区块的格子
pub fn unload_manager_chunks(
    settings: Res<StreamingSettings>,
    mut unloaded: EventReader<ChunkUnloaded>,
    mut indices: ResMut<HexIndices>,
    mut armies: ResMut<ArmyManager>,
    mut structures: ResMut<StructureManager>,
    mut sequencer: ResMut<MoveRequestSequencer>,
    mut labels: ResMut<LabelPool>,
) {
    let indices = &mut *indices;
    for event in unloaded.read() {
        let dropped_armies = armies.unload_bounds(
            &event.bounds,
            &mut indices.armies,
            &mut sequencer,
            &mut labels,
            settings.clear_move_requests_on_unload,
        );
        let dropped_structures = structures.unload_bounds(&event.bounds, &mut indices.structures);
        trace!(
            "Unloaded chunk {}: dropped {} army(ies), {} structure(s)",
            event.chunk,
            dropped_armies.len(),
            dropped_structures
        );
    }
}

pub fn apply_army_updates(
    mut updates: EventReader<EntityUpdateEvent>,
    mut indices: ResMut<HexIndices>,
    mut armies: ResMut<ArmyManager>,
    mut sequencer: ResMut<MoveRequestSequencer>,
    mut labels: ResMut<LabelPool>,
) {
    for EntityUpdateEvent(update) in updates.read() {
        if let EntityUpdate::Army(army) = update {
            armies.apply_update(army, &mut indices.armies, &mut sequencer, &mut labels);
        }
    }
}

pub fn advance_army_moves(
    mut indices: ResMut<HexIndices>,
    mut armies: ResMut<ArmyManager>,
    sequencer: Res<MoveRequestSequencer>,
) {
    armies.advance_moves(&mut indices.armies, &sequencer);
}

/// Apply this frame's structure updates as one batch.
pub fn apply_structure_updates(
    mut updates: EventReader<EntityUpdateEvent>,
    mut indices: ResMut<HexIndices>,
    mut structures: ResMut<StructureManager>,
    mut refresh: EventWriter<RefreshVisibleChunks>,
) {
    let batch: Vec<&StructureUpdate> = updates
        .read()
        .filter_map(|EntityUpdateEvent(update)| match update {
            EntityUpdate::Structure(structure) => Some(structure),
            _ => None,
        })
        .collect();
    let actions = structures.apply_batch(&batch, &mut indices.structures);
    if actions.refresh_visible_chunks {
        refresh.write(RefreshVisibleChunks);
    }
}

pub fn update_army_visibility(
    settings: Res<StreamingSettings>,
    frame: Res<FrameVisibility>,
    mut armies: ResMut<ArmyManager>,
    mut labels: ResMut<LabelPool>,
) {
    armies.update_visibility(&frame, &mut labels, settings.hex_size);
}

pub fn update_structure_visibility(
    frame: Res<FrameVisibility>,
    mut structures: ResMut<StructureManager>,
) {
    structures.update_visibility(&frame);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn army(entity_id: EntityId, col: i32, row: i32) -> ArmyUpdate {
        ArmyUpdate {
            entity_id,
            owner: "0xa".to_string(),
            col,
            row,
            destroyed: false,
        }
    }

    fn structure(entity_id: EntityId, col: i32, row: i32) -> StructureUpdate {
        StructureUpdate {
            entity_id,
            owner: "0xb".to_string(),
            col,
            row,
            category: None,
            destroyed: false,
        }
    }

    struct Fixture {
        armies: ArmyManager,
        index: EntityHexIndex,
        sequencer: MoveRequestSequencer,
        labels: LabelPool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                armies: ArmyManager::default(),
                index: EntityHexIndex::new(),
                sequencer: MoveRequestSequencer::default(),
                labels: LabelPool::new(),
            }
        }

        fn apply(&mut self, update: ArmyUpdate) {
            self.armies.apply_update(
                &update,
                &mut self.index,
                &mut self.sequencer,
                &mut self.labels,
            );
        }

        fn tick(&mut self) {
            self.armies.advance_moves(&mut self.index, &self.sequencer);
        }
    }

    #[test]
    fn moving_army_is_indexed_at_source_and_destination() {
        let mut f = Fixture::new();
        f.apply(army(1, 0, 0));
        f.apply(army(1, 3, 0));

        assert_eq!(
            f.index.cells_for_entity(1),
            vec![HexCoordinate::new(0, 0), HexCoordinate::new(3, 0)]
        );
        f.tick();
        f.tick();
        assert_eq!(f.armies.get(1).unwrap().position, HexCoordinate::new(2, 0));
        f.tick();

        let record = f.armies.get(1).unwrap();
        assert_eq!(record.position, HexCoordinate::new(3, 0));
        assert!(record.movement.is_none());
        assert_eq!(f.index.cells_for_entity(1), vec![HexCoordinate::new(3, 0)]);
    }

    #[test]
    fn duplicate_update_does_not_restart_the_move() {
        let mut f = Fixture::new();
        f.apply(army(1, 0, 0));
        f.apply(army(1, 4, 4));
        f.tick();
        let token = f.armies.get(1).unwrap().movement.as_ref().unwrap().token;
        f.apply(army(1, 4, 4));
        assert_eq!(
            f.armies.get(1).unwrap().movement.as_ref().unwrap().token,
            token
        );
        assert_eq!(f.armies.get(1).unwrap().position, HexCoordinate::new(1, 1));
    }

    #[test]
    fn newer_move_supersedes_the_old_destination() {
        let mut f = Fixture::new();
        f.apply(army(1, 0, 0));
        f.apply(army(1, 5, 0));
        f.tick();
        f.apply(army(1, 1, 3));

        let movement = f.armies.get(1).unwrap().movement.clone().unwrap();
        assert_eq!(movement.source, HexCoordinate::new(1, 0));
        assert_eq!(movement.destination, HexCoordinate::new(1, 3));
        assert!(f.index.get(HexCoordinate::new(5, 0)).is_none());
    }

    #[test]
    fn stale_move_token_stops_the_animation() {
        let mut f = Fixture::new();
        f.apply(army(1, 0, 0));
        f.apply(army(1, 4, 0));
        f.tick();
        f.sequencer.clear(1);
        f.tick();

        let record = f.armies.get(1).unwrap();
        assert!(record.movement.is_none());
        assert_eq!(record.position, HexCoordinate::new(1, 0));
        assert_eq!(f.index.cells_for_entity(1), vec![HexCoordinate::new(1, 0)]);
    }

    #[test]
    fn destroyed_army_is_removed_everywhere() {
        let mut f = Fixture::new();
        f.apply(army(1, 0, 0));
        f.apply(army(1, 2, 0));
        let mut destroyed = army(1, 0, 0);
        destroyed.destroyed = true;
        f.apply(destroyed.clone());
        f.apply(destroyed);

        assert!(f.armies.is_empty());
        assert!(f.index.is_empty());
        assert!(f.sequencer.is_empty());
    }

    #[test]
    fn unloading_keeps_armies_with_cells_elsewhere() {
        let mut f = Fixture::new();
        f.apply(army(1, 2, 2));
        f.apply(army(2, 6, 6));
        f.apply(army(2, 10, 6));
        f.apply(army(1, 3, 3));
        let bounds = ChunkBounds {
            min_col: 0,
            max_col: 8,
            min_row: 0,
            max_row: 8,
        };
        let dropped = f.armies.unload_bounds(
            &bounds,
            &mut f.index,
            &mut f.sequencer,
            &mut f.labels,
            true,
        );

        assert_eq!(dropped, vec![1]);
        assert!(f.armies.get(1).is_none());
        assert!(f.armies.get(2).is_some());
        assert_eq!(f.sequencer.current(1), None);
        assert!(f.sequencer.current(2).is_some());
    }

    #[test]
    fn unload_can_leave_move_requests_alone() {
        let mut f = Fixture::new();
        f.apply(army(1, 2, 2));
        f.apply(army(1, 3, 3));
        let bounds = ChunkBounds {
            min_col: 0,
            max_col: 8,
            min_row: 0,
            max_row: 8,
        };
        f.armies.unload_bounds(
            &bounds,
            &mut f.index,
            &mut f.sequencer,
            &mut f.labels,
            false,
        );
        assert_eq!(f.sequencer.current(1), Some(1));
    }

    #[test]
    fn structure_count_change_clears_cache() {
        let mut manager = StructureManager::default();
        let mut index = EntityHexIndex::new();
        let a = structure(1, 0, 0);
        let b = structure(2, 1, 0);
        let actions = manager.apply_batch(&[&a, &b], &mut index);

        assert!(actions.refresh_visible_chunks);
        assert_eq!(manager.total_structures(), 2);
        assert_eq!(manager.cache_generation(), 1);
        assert_eq!(manager.pending_tile_refreshes(), 0);
    }

    #[test]
    fn structure_move_schedules_tile_refresh() {
        let mut manager = StructureManager::default();
        let mut index = EntityHexIndex::new();
        manager.apply_batch(&[&structure(1, 0, 0)], &mut index);

        let moved = structure(1, 4, 4);
        let actions = manager.apply_batch(&[&moved], &mut index);
        assert!(actions.schedule_tile_refresh);
        assert!(!actions.clear_cache);
        assert_eq!(manager.take_tile_refreshes(), vec![HexCoordinate::new(4, 4)]);
        assert_eq!(index.cells_for_entity(1), vec![HexCoordinate::new(4, 4)]);
        assert_eq!(manager.cache_generation(), 1);
    }

    #[test]
    fn structures_in_unloaded_chunks_are_dropped() {
        let mut manager = StructureManager::default();
        let mut index = EntityHexIndex::new();
        manager.apply_batch(&[&structure(1, 1, 1), &structure(2, 20, 20)], &mut index);
        let bounds = ChunkBounds {
            min_col: 0,
            max_col: 8,
            min_row: 0,
            max_row: 8,
        };
        assert_eq!(manager.unload_bounds(&bounds, &mut index), 1);
        assert!(manager.get(1).is_none());
        assert!(manager.get(2).is_some());
    }
}
