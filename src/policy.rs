//! Pure decision functions applied to incoming entity diffs.
//! 作用于实体变更的纯决策函数

use crate::hex::{ChunkBounds, HexCoordinate};

/// What changed in a batch of structure updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StructureUpdateSignals {
    /// At least one update carried a position.
    pub has_positions: bool,
    /// The total number of known structures changed.
    pub count_changed: bool,
}

/// Follow-up work a structure update requires.
/// 结构更新需要的后续操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StructureTileUpdateActions {
    pub schedule_tile_refresh: bool,
    pub clear_cache: bool,
    pub refresh_visible_chunks: bool,
    pub update_total_structures: bool,
}

/// A count change outranks a position change: it clears caches and refreshes
/// every visible chunk instead of repainting single tiles.
pub fn resolve_structure_tile_update_actions(
    signals: StructureUpdateSignals,
) -> StructureTileUpdateActions {
    if signals.count_changed {
        return StructureTileUpdateActions {
            schedule_tile_refresh: false,
            clear_cache: true,
            refresh_visible_chunks: true,
            update_total_structures: true,
        };
    }
    StructureTileUpdateActions {
        schedule_tile_refresh: signals.has_positions,
        ..Default::default()
    }
}

/// An army stays visible while its destination is in bounds, or while a tracked
/// source hex still is.
pub fn should_army_remain_visible_in_bounds(
    destination: HexCoordinate,
    bounds: &ChunkBounds,
    source: Option<HexCoordinate>,
) -> bool {
    bounds.contains(destination) || source.is_some_and(|source| bounds.contains(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDS: ChunkBounds = ChunkBounds {
        min_col: 0,
        max_col: 10,
        min_row: 0,
        max_row: 10,
    };

    #[test]
    fn count_change_wins_over_positions() {
        for has_positions in [true, false] {
            let actions = resolve_structure_tile_update_actions(StructureUpdateSignals {
                has_positions,
                count_changed: true,
            });
            assert_eq!(
                actions,
                StructureTileUpdateActions {
                    schedule_tile_refresh: false,
                    clear_cache: true,
                    refresh_visible_chunks: true,
                    update_total_structures: true,
                }
            );
        }
    }

    #[test]
    fn positions_only_schedule_a_tile_refresh() {
        let actions = resolve_structure_tile_update_actions(StructureUpdateSignals {
            has_positions: true,
            count_changed: false,
        });
        assert_eq!(
            actions,
            StructureTileUpdateActions {
                schedule_tile_refresh: true,
                ..Default::default()
            }
        );
        assert_eq!(
            resolve_structure_tile_update_actions(StructureUpdateSignals::default()),
            StructureTileUpdateActions::default()
        );
    }

    #[test]
    fn destination_in_bounds_is_enough() {
        let inside = HexCoordinate::new(5, 5);
        let outside = HexCoordinate::new(50, 5);
        assert!(should_army_remain_visible_in_bounds(inside, &BOUNDS, None));
        assert!(should_army_remain_visible_in_bounds(inside, &BOUNDS, Some(outside)));
    }

    #[test]
    fn source_keeps_a_leaving_army_visible() {
        let inside = HexCoordinate::new(9, 9);
        let outside = HexCoordinate::new(10, 9);
        assert!(should_army_remain_visible_in_bounds(outside, &BOUNDS, Some(inside)));
        assert!(!should_army_remain_visible_in_bounds(outside, &BOUNDS, Some(outside)));
        assert!(!should_army_remain_visible_in_bounds(outside, &BOUNDS, None));
    }
}
