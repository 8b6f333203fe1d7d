//! Indexer feed: parsing and draining entity updates.
//! 索引器数据流：实体更新的解析与接收
//!
//! Messages are JSON objects tagged by `kind`:
//!
//! ```json
//! { "kind": "army", "entity_id": 12, "owner": "0xabc", "col": 4, "row": 9 }
//! { "kind": "structure", "entity_id": 3, "owner": "0xabc", "col": 1, "row": 2, "category": "realm" }
//! { "kind": "tile", "col": 4, "row": 9, "biome": 7 }
//! ```
//!
//! Delivery order is not guaranteed and messages may repeat.

use crate::hex::{Address, EntityId, HexCoordinate};
use async_channel::{Receiver, Sender};
use bevy::log::{debug, error};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyUpdate {
    pub entity_id: EntityId,
    #[serde(default)]
    pub owner: Address,
    pub col: i32,
    pub row: i32,
    /// Entity was destroyed upstream; position is its last known cell.
    #[serde(default)]
    pub destroyed: bool,
}

impl ArmyUpdate {
    pub fn position(&self) -> HexCoordinate {
        HexCoordinate::new(self.col, self.row)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureUpdate {
    pub entity_id: EntityId,
    #[serde(default)]
    pub owner: Address,
    pub col: i32,
    pub row: i32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub destroyed: bool,
}

impl StructureUpdate {
    pub fn position(&self) -> HexCoordinate {
        HexCoordinate::new(self.col, self.row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileUpdate {
    pub col: i32,
    pub row: i32,
    pub biome: u8,
}

impl TileUpdate {
    pub fn position(&self) -> HexCoordinate {
        HexCoordinate::new(self.col, self.row)
    }
}

/// One validated message from the indexer.
/// 一条经过校验的索引器消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityUpdate {
    Army(ArmyUpdate),
    Structure(StructureUpdate),
    Tile(TileUpdate),
}

#[derive(Debug)]
pub enum FeedError {
    /// Not valid JSON.
    Malformed(serde_json::Error),
    /// Valid JSON, but not a known entity shape.
    UnrecognizedShape(serde_json::Error),
    /// Known shape carrying values that cannot be right.
    InvalidEntity { kind: &'static str, reason: String },
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::Malformed(e) => write!(f, "Malformed indexer message: {e}"),
            FeedError::UnrecognizedShape(e) => write!(f, "Unrecognized indexer message: {e}"),
            FeedError::InvalidEntity { kind, reason } => {
                write!(f, "Invalid {kind} update: {reason}")
            }
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeedError::Malformed(e) | FeedError::UnrecognizedShape(e) => Some(e),
            FeedError::InvalidEntity { .. } => None,
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            serde_json::error::Category::Data => FeedError::UnrecognizedShape(e),
            _ => FeedError::Malformed(e),
        }
    }
}

impl EntityUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityUpdate::Army(_) => "army",
            EntityUpdate::Structure(_) => "structure",
            EntityUpdate::Tile(_) => "tile",
        }
    }

    pub fn position(&self) -> HexCoordinate {
        match self {
            EntityUpdate::Army(u) => u.position(),
            EntityUpdate::Structure(u) => u.position(),
            EntityUpdate::Tile(u) => u.position(),
        }
    }

    pub fn validate(&self) -> Result<(), FeedError> {
        let (entity_id, owner, destroyed) = match self {
            EntityUpdate::Army(u) => (u.entity_id, &u.owner, u.destroyed),
            EntityUpdate::Structure(u) => (u.entity_id, &u.owner, u.destroyed),
            EntityUpdate::Tile(_) => return Ok(()),
        };
        if entity_id == 0 {
            return Err(FeedError::InvalidEntity {
                kind: self.kind(),
                reason: "entity id 0 is reserved".to_string(),
            });
        }
        if !destroyed && owner.trim().is_empty() {
            return Err(FeedError::InvalidEntity {
                kind: self.kind(),
                reason: format!("entity {entity_id} has no owner"),
            });
        }
        Ok(())
    }
}

/// Parse and validate one indexer message.
/// 解析并校验一条索引器消息
pub fn parse_entity_update(raw: &str) -> Result<EntityUpdate, FeedError> {
    let update: EntityUpdate = serde_json::from_str(raw)?;
    update.validate()?;
    Ok(update)
}

/// Validated update ready for the managers.
#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub struct EntityUpdateEvent(pub EntityUpdate);

/// Channel carrying raw indexer messages into the frame loop.
/// 将原始索引器消息送入帧循环的通道
///
/// Producers may live on any thread; they clone [`IndexerFeed::sender`].
#[derive(Resource, Debug)]
pub struct IndexerFeed {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl Default for IndexerFeed {
    fn default() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }
}

impl IndexerFeed {
    pub fn sender(&self) -> Sender<String> {
        self.tx.clone()
    }

    /// Queue a message from the frame thread.
    pub fn push(&self, raw: impl Into<String>) {
        // the feed owns its receiver, so the channel cannot be closed here
        let _ = self.tx.try_send(raw.into());
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// Drain queued indexer messages, dropping the ones that fail validation.
/// 读取索引器消息，丢弃校验失败的消息
pub fn drain_indexer_feed(feed: Res<IndexerFeed>, mut updates: EventWriter<EntityUpdateEvent>) {
    let mut accepted = 0usize;
    while let Ok(raw) = feed.rx.try_recv() {
        match parse_entity_update(&raw) {
            Ok(update) => {
                updates.write(EntityUpdateEvent(update));
                accepted += 1;
            }
            Err(e) => error!("Dropping indexer message: {}", e),
        }
    }
    if accepted > 0 {
        debug!("Accepted {} indexer update(s)", accepted);
    }
}

/// Explored tiles and their biome.
/// 已探索的格子及其地形
#[derive(Resource, Debug, Default, Clone)]
pub struct ExploredTiles {
    tiles: HashMap<HexCoordinate, u8>,
}

impl ExploredTiles {
    /// Record a tile. Returns `true` if it was not known before.
    pub fn insert(&mut self, update: &TileUpdate) -> bool {
        self.tiles.insert(update.position(), update.biome).is_none()
    }

    pub fn biome(&self, coord: HexCoordinate) -> Option<u8> {
        self.tiles.get(&coord).copied()
    }

    pub fn is_explored(&self, coord: HexCoordinate) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }
}

/// Record tile updates in [`ExploredTiles`].
pub fn apply_tile_updates(
    mut updates: EventReader<EntityUpdateEvent>,
    mut explored: ResMut<ExploredTiles>,
) {
    for EntityUpdateEvent(update) in updates.read() {
        if let EntityUpdate::Tile(tile) = update {
            explored.insert(tile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_kind() {
        let army = parse_entity_update(
            r#"{ "kind": "army", "entity_id": 12, "owner": "0xabc", "col": 4, "row": 9 }"#,
        )
        .unwrap();
        assert_eq!(army.kind(), "army");
        assert_eq!(army.position(), HexCoordinate::new(4, 9));

        let structure = parse_entity_update(
            r#"{ "kind": "structure", "entity_id": 3, "owner": "0x1", "col": 1, "row": 2, "category": "realm" }"#,
        )
        .unwrap();
        match structure {
            EntityUpdate::Structure(s) => assert_eq!(s.category.as_deref(), Some("realm")),
            other => panic!("unexpected {other:?}"),
        }

        let tile = parse_entity_update(r#"{ "kind": "tile", "col": -1, "row": 0, "biome": 7 }"#)
            .unwrap();
        assert_eq!(
            tile,
            EntityUpdate::Tile(TileUpdate {
                col: -1,
                row: 0,
                biome: 7
            })
        );
    }

    #[test]
    fn error_categories() {
        assert!(matches!(
            parse_entity_update("{ not json"),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            parse_entity_update(r#"{ "kind": "quest", "entity_id": 1 }"#),
            Err(FeedError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            parse_entity_update(r#"{ "kind": "army", "entity_id": 1, "owner": "0x1" }"#),
            Err(FeedError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            parse_entity_update(
                r#"{ "kind": "army", "entity_id": 0, "owner": "0x1", "col": 0, "row": 0 }"#
            ),
            Err(FeedError::InvalidEntity { kind: "army", .. })
        ));
    }

    #[test]
    fn destroyed_entities_need_no_owner() {
        let update = parse_entity_update(
            r#"{ "kind": "army", "entity_id": 5, "col": 0, "row": 0, "destroyed": true }"#,
        )
        .unwrap();
        assert!(matches!(update, EntityUpdate::Army(ArmyUpdate { destroyed: true, .. })));
        assert!(
            parse_entity_update(r#"{ "kind": "army", "entity_id": 5, "col": 0, "row": 0 }"#)
                .is_err()
        );
    }

    #[test]
    fn drain_skips_bad_messages_and_keeps_going() {
        let mut app = App::new();
        app.init_resource::<IndexerFeed>()
            .init_resource::<ExploredTiles>()
            .add_event::<EntityUpdateEvent>()
            .add_systems(Update, (drain_indexer_feed, apply_tile_updates).chain());

        let sender = app.world().resource::<IndexerFeed>().sender();
        sender
            .try_send(r#"{ "kind": "tile", "col": 1, "row": 1, "biome": 2 }"#.to_string())
            .unwrap();
        sender.try_send("garbage".to_string()).unwrap();
        sender
            .try_send(r#"{ "kind": "tile", "col": 2, "row": 1, "biome": 3 }"#.to_string())
            .unwrap();

        app.update();

        let explored = app.world().resource::<ExploredTiles>();
        assert_eq!(explored.len(), 2);
        assert_eq!(explored.biome(HexCoordinate::new(2, 1)), Some(3));
        assert_eq!(app.world().resource::<IndexerFeed>().pending(), 0);
    }
}
