pub use crate::{
    StreamingSystems, WorldmapStreamingPlugin,
    chunk_loader::{
        ChunkLoaded, ChunkLoader, ChunkPayload, ChunkSource, ChunkUnloaded, EmptyChunkSource,
        FetchExecution,
    },
    chunk_state::{ChunkLifecyclePhase, ChunkPriority, ChunkStateTracker},
    chunk_switch::{CameraFocus, ChunkSwitchCommitted, ChunkSwitchTracker},
    feed::{
        ArmyUpdate, EntityUpdate, EntityUpdateEvent, ExploredTiles, FeedError, IndexerFeed,
        StructureUpdate, TileUpdate,
    },
    hex::{ChunkBounds, ChunkKey, ChunkKeyError, EntityId, HexCoordinate},
    managers::{ArmyManager, StructureManager},
    move_sequencer::{MoveRequestSequencer, MoveRequestToken},
    pool::{KeyedPool, PoolHandle, PooledResource, ResourcePool},
    prefetch::{MovementAxis, MovementSign, TravelDirection},
    render_resources::{EntityLabel, GeometryPool, LabelPool, TileBatch, TileBatchShape},
    scene::{
        ListenerHandle, ResetWorldmap, WindowHost, WindowSignal, WindowSignalReceived,
        WorldmapScene,
    },
    settings::{SettingsError, StreamingSettings},
    spatial_index::{EntityHexIndex, HexIndices, SpatialIndexEntry},
    visibility::{FrameVisibility, RefreshVisibleChunks, VisibilityOwner},
};
