//! Backend-agnostic render resources handed out by the pools.
//! 由资源池分发的、与后端无关的渲染资源
//!
//! The host renderer reads these records and mirrors them into its own scene
//! graph or markup layer.

use crate::hex::{ChunkKey, EntityId, HexCoordinate};
use crate::pool::{KeyedPool, PooledResource, ResourcePool};

/// Floating label attached to an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityLabel {
    pub entity_id: EntityId,
    pub text: String,
    pub anchor: Option<HexCoordinate>,
    /// Chunk group the label is parented to.
    pub parent: Option<ChunkKey>,
    /// Id of the markup node backing this label, if the host created one.
    pub backing_node: Option<u64>,
    pub visible: bool,
}

impl PooledResource for EntityLabel {
    fn detach_from_parent(&mut self) {
        self.parent = None;
    }

    fn detach_backing_node(&mut self) {
        self.backing_node = None;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

/// Shape descriptor for pooled tile batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileBatchShape {
    pub cols: u32,
    pub rows: u32,
}

impl TileBatchShape {
    pub fn square(size: u32) -> Self {
        Self {
            cols: size,
            rows: size,
        }
    }

    pub fn capacity(&self) -> usize {
        (self.cols * self.rows) as usize
    }
}

/// Instanced hex geometry for one chunk.
/// 一个区块的实例化六边形几何数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileBatch {
    pub tiles: Vec<(HexCoordinate, u8)>,
    pub parent: Option<ChunkKey>,
    pub visible: bool,
}

impl TileBatch {
    pub fn with_capacity(shape: TileBatchShape) -> Self {
        Self {
            tiles: Vec::with_capacity(shape.capacity()),
            ..Default::default()
        }
    }
}

impl PooledResource for TileBatch {
    fn detach_from_parent(&mut self) {
        self.parent = None;
        self.tiles.clear();
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

/// Pool of entity labels.
pub type LabelPool = ResourcePool<EntityLabel>;

/// Pool of chunk tile geometry keyed by batch shape.
pub type GeometryPool = KeyedPool<TileBatchShape, TileBatch>;
