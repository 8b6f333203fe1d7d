use crate::hex::{Address, ChunkBounds, EntityId, HexCoordinate};
use bevy::log::trace;
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload stored per occupied hex.
/// 每个被占用格子中存储的数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialIndexEntry {
    pub entity_id: EntityId,
    pub owner: Address,
}

/// Summary counters for an [`EntityHexIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HexIndexStats {
    pub columns: usize,
    pub occupied_cells: usize,
}

/// Column-major map from hex cell to the entity occupying it.
/// 按列组织的格子到实体的映射
///
/// Columns and rows are ordered, so full scans visit cells in a stable
/// column-then-row order. A column left without cells is pruned right away.
///
/// An entity may occupy several cells at once (an army mid-move is indexed at
/// both its source and destination), but a cell holds at most one entry.
#[derive(Debug, Clone, Default)]
pub struct EntityHexIndex {
    columns: BTreeMap<i32, BTreeMap<i32, SpatialIndexEntry>>,
}

impl EntityHexIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` at `coord`, returning whatever was there before.
    pub fn insert(
        &mut self,
        coord: HexCoordinate,
        entry: SpatialIndexEntry,
    ) -> Option<SpatialIndexEntry> {
        self.columns
            .entry(coord.col)
            .or_default()
            .insert(coord.row, entry)
    }

    pub fn get(&self, coord: HexCoordinate) -> Option<&SpatialIndexEntry> {
        self.columns.get(&coord.col)?.get(&coord.row)
    }

    /// Remove the entry at `coord`, pruning its column if it becomes empty.
    pub fn remove(&mut self, coord: HexCoordinate) -> Option<SpatialIndexEntry> {
        let column = self.columns.get_mut(&coord.col)?;
        let removed = column.remove(&coord.row);
        if column.is_empty() {
            self.columns.remove(&coord.col);
        }
        removed
    }

    /// Remove every cell held by `entity_id`.
    /// 移除实体占用的所有格子
    ///
    /// Returns the removed coordinates in scan order. Calling it again for the
    /// same entity returns an empty list and leaves the index untouched.
    pub fn remove_all_entries_for_entity(&mut self, entity_id: EntityId) -> Vec<HexCoordinate> {
        let mut removed = Vec::new();
        self.columns.retain(|&col, rows| {
            rows.retain(|&row, entry| {
                if entry.entity_id == entity_id {
                    removed.push(HexCoordinate::new(col, row));
                    false
                } else {
                    true
                }
            });
            !rows.is_empty()
        });
        if !removed.is_empty() {
            trace!(
                "Removed {} cell(s) for entity {} from hex index",
                removed.len(),
                entity_id
            );
        }
        removed
    }

    /// Cells currently held by `entity_id`, in scan order.
    pub fn cells_for_entity(&self, entity_id: EntityId) -> Vec<HexCoordinate> {
        self.iter()
            .filter(|(_, entry)| entry.entity_id == entity_id)
            .map(|(coord, _)| coord)
            .collect()
    }

    pub fn contains_entity(&self, entity_id: EntityId) -> bool {
        self.iter().any(|(_, entry)| entry.entity_id == entity_id)
    }

    /// Entries whose cell lies inside `bounds`.
    /// 区域内的所有条目
    pub fn entries_in_bounds(
        &self,
        bounds: &ChunkBounds,
    ) -> Vec<(HexCoordinate, &SpatialIndexEntry)> {
        self.columns
            .range(bounds.min_col..bounds.max_col.max(bounds.min_col))
            .flat_map(|(&col, rows)| {
                rows.range(bounds.min_row..bounds.max_row.max(bounds.min_row))
                    .map(move |(&row, entry)| (HexCoordinate::new(col, row), entry))
            })
            .collect()
    }

    /// Drop every entry inside `bounds`, returning what was removed.
    pub fn remove_entries_in_bounds(
        &mut self,
        bounds: &ChunkBounds,
    ) -> Vec<(HexCoordinate, SpatialIndexEntry)> {
        let mut removed = Vec::new();
        self.columns.retain(|&col, rows| {
            if col < bounds.min_col || col >= bounds.max_col {
                return true;
            }
            rows.retain(|&row, entry| {
                if row >= bounds.min_row && row < bounds.max_row {
                    removed.push((HexCoordinate::new(col, row), entry.clone()));
                    false
                } else {
                    true
                }
            });
            !rows.is_empty()
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (HexCoordinate, &SpatialIndexEntry)> {
        self.columns.iter().flat_map(|(&col, rows)| {
            rows.iter()
                .map(move |(&row, entry)| (HexCoordinate::new(col, row), entry))
        })
    }

    /// Number of occupied cells.
    pub fn len(&self) -> usize {
        self.columns.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn clear(&mut self) {
        self.columns.clear();
    }

    pub fn stats(&self) -> HexIndexStats {
        HexIndexStats {
            columns: self.columns.len(),
            occupied_cells: self.len(),
        }
    }
}

/// Free-function form of [`EntityHexIndex::remove_all_entries_for_entity`].
pub fn remove_all_entries_for_entity(
    index: &mut EntityHexIndex,
    entity_id: EntityId,
) -> Vec<HexCoordinate> {
    index.remove_all_entries_for_entity(entity_id)
}

/// The hex indices shared by the entity managers.
/// 各实体管理器共享的格子索引
#[derive(Resource, Debug, Default)]
pub struct HexIndices {
    pub armies: EntityHexIndex,
    pub structures: EntityHexIndex,
}

impl HexIndices {
    pub fn clear(&mut self) {
        self.armies.clear();
        self.structures.clear();
    }
}
