use crate::hex::EntityId;
use bevy::prelude::Resource;
use std::collections::HashMap;

/// Token handed out for a move command; only the latest one for an entity is current.
/// 移动请求令牌
pub type MoveRequestToken = u64;

/// Per-entity move request counters.
/// 每个实体的移动请求计数器
///
/// Registering a new request makes every earlier token for the same entity
/// stale. Stale commands are dropped, never merged.
#[derive(Resource, Debug, Default, Clone)]
pub struct MoveRequestSequencer {
    counters: HashMap<EntityId, MoveRequestToken>,
}

impl MoveRequestSequencer {
    /// Bump and return the counter for `entity_id`. The first token is 1.
    pub fn register(&mut self, entity_id: EntityId) -> MoveRequestToken {
        let counter = self.counters.entry(entity_id).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn should_apply(&self, entity_id: EntityId, token: MoveRequestToken) -> bool {
        self.counters.get(&entity_id) == Some(&token)
    }

    pub fn clear(&mut self, entity_id: EntityId) {
        self.counters.remove(&entity_id);
    }

    pub fn clear_all(&mut self) {
        self.counters.clear();
    }

    /// Live token for `entity_id`, if one was issued.
    pub fn current(&self, entity_id: EntityId) -> Option<MoveRequestToken> {
        self.counters.get(&entity_id).copied()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

pub fn register_army_move_request(
    sequencer: &mut MoveRequestSequencer,
    entity_id: EntityId,
) -> MoveRequestToken {
    sequencer.register(entity_id)
}

pub fn should_apply_army_move_request(
    sequencer: &MoveRequestSequencer,
    entity_id: EntityId,
    token: MoveRequestToken,
) -> bool {
    sequencer.should_apply(entity_id, token)
}

pub fn clear_army_move_request(sequencer: &mut MoveRequestSequencer, entity_id: EntityId) {
    sequencer.clear(entity_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_registration_supersedes_earlier_tokens() {
        let mut sequencer = MoveRequestSequencer::default();
        let first = register_army_move_request(&mut sequencer, 42);
        let second = register_army_move_request(&mut sequencer, 42);

        assert_eq!(first, 1);
        assert!(second > first);
        assert!(!should_apply_army_move_request(&sequencer, 42, first));
        assert!(should_apply_army_move_request(&sequencer, 42, second));
    }

    #[test]
    fn clear_invalidates_every_token() {
        let mut sequencer = MoveRequestSequencer::default();
        let token = sequencer.register(7);
        clear_army_move_request(&mut sequencer, 7);
        assert!(!sequencer.should_apply(7, token));
        assert!(sequencer.is_empty());

        // counting restarts after a clear
        assert_eq!(sequencer.register(7), 1);
    }

    #[test]
    fn counters_are_per_entity() {
        let mut sequencer = MoveRequestSequencer::default();
        let a = sequencer.register(1);
        let b = sequencer.register(2);
        sequencer.register(1);
        assert!(!sequencer.should_apply(1, a));
        assert!(sequencer.should_apply(2, b));
        assert_eq!(sequencer.len(), 2);
    }
}
