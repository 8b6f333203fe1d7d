use crate::chunk_state::{ChunkLifecyclePhase, ChunkPriority, ChunkStateTracker};
use crate::chunk_switch::ChunkSwitchCommitted;
use crate::feed::{EntityUpdate, EntityUpdateEvent, FeedError};
use crate::hex::{ChunkBounds, ChunkKey};
use crate::pool::PoolHandle;
use crate::prefetch::prefetch_band;
use crate::render_resources::{GeometryPool, TileBatch, TileBatchShape};
use crate::settings::StreamingSettings;
use crate::visibility::{FrameVisibility, VisibilityOwner};
use async_channel::{Receiver, Sender};
use bevy::log::{debug, error, info, trace, warn};
use bevy::prelude::*;
use bevy::tasks::{AsyncComputeTaskPool, TaskPool};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Entities delivered for one chunk.
/// 一个区块的实体数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPayload {
    pub chunk: ChunkKey,
    pub updates: Vec<EntityUpdate>,
}

/// Where chunk contents come from.
/// 区块数据来源
///
/// Implementations run on worker threads and must not touch ECS state; the
/// returned payload is applied back on the frame loop.
pub trait ChunkSource: Send + Sync + 'static {
    fn fetch(&self, chunk: ChunkKey, bounds: ChunkBounds) -> Result<ChunkPayload, FeedError>;
}

/// Source that knows no entities. Chunks still go through the full lifecycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyChunkSource;

impl ChunkSource for EmptyChunkSource {
    fn fetch(&self, chunk: ChunkKey, _bounds: ChunkBounds) -> Result<ChunkPayload, FeedError> {
        Ok(ChunkPayload {
            chunk,
            updates: Vec::new(),
        })
    }
}

/// How fetches are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchExecution {
    /// On the async compute task pool.
    #[default]
    TaskPool,
    /// Synchronously inside the spawning system. Results still arrive through
    /// the channel and are applied in the same frame.
    Inline,
}

/// Completed fetch sent back from a worker.
#[derive(Debug)]
pub struct ChunkFetchResult {
    pub chunk: ChunkKey,
    pub result: Result<ChunkPayload, FeedError>,
}

/// A chunk finished loading.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLoaded {
    pub chunk: ChunkKey,
    pub entity_count: usize,
    /// `false` when the scene moved on before the fetch completed.
    pub is_current_target: bool,
}

/// A chunk was dropped from the loaded set.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkUnloaded {
    pub chunk: ChunkKey,
    pub bounds: ChunkBounds,
}

#[derive(Debug, Clone, Copy)]
struct QueuedChunk {
    chunk: ChunkKey,
    priority: ChunkPriority,
}

/// Chunk fetch queue and loaded set.
/// 区块请求队列与已加载集合
#[derive(Resource)]
pub struct ChunkLoader {
    source: Arc<dyn ChunkSource>,
    execution: FetchExecution,
    tx: Sender<ChunkFetchResult>,
    rx: Receiver<ChunkFetchResult>,
    queue: VecDeque<QueuedChunk>,
    in_flight: HashSet<ChunkKey>,
    loaded: HashSet<ChunkKey>,
    /// Chunks wanted around the current centre.
    wanted: HashSet<ChunkKey>,
    tile_batches: HashMap<ChunkKey, PoolHandle>,
}

impl Default for ChunkLoader {
    fn default() -> Self {
        Self::new(Arc::new(EmptyChunkSource))
    }
}

impl ChunkLoader {
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            source,
            execution: FetchExecution::default(),
            tx,
            rx,
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            loaded: HashSet::new(),
            wanted: HashSet::new(),
            tile_batches: HashMap::new(),
        }
    }

    pub fn with_execution(mut self, execution: FetchExecution) -> Self {
        self.execution = execution;
        self
    }

    pub fn set_source(&mut self, source: Arc<dyn ChunkSource>) {
        self.source = source;
    }

    /// Sender for fetch results produced outside the loader.
    pub fn sender(&self) -> Sender<ChunkFetchResult> {
        self.tx.clone()
    }

    pub fn is_loaded(&self, chunk: ChunkKey) -> bool {
        self.loaded.contains(&chunk)
    }

    pub fn is_in_flight(&self, chunk: ChunkKey) -> bool {
        self.in_flight.contains(&chunk)
    }

    pub fn is_queued(&self, chunk: ChunkKey) -> bool {
        self.queue.iter().any(|queued| queued.chunk == chunk)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Loaded chunks, sorted.
    pub fn loaded_chunks(&self) -> Vec<ChunkKey> {
        let mut chunks: Vec<ChunkKey> = self.loaded.iter().copied().collect();
        chunks.sort();
        chunks
    }

    pub fn tile_batch(&self, chunk: ChunkKey) -> Option<PoolHandle> {
        self.tile_batches.get(&chunk).copied()
    }

    fn enqueue(&mut self, chunk: ChunkKey, priority: ChunkPriority) -> bool {
        if let Some(queued) = self.queue.iter_mut().find(|queued| queued.chunk == chunk) {
            queued.priority = queued.priority.min(priority);
            return false;
        }
        self.queue.push_back(QueuedChunk { chunk, priority });
        true
    }

    /// Pop the most urgent queued chunk; FIFO within a priority.
    fn pop_next(&mut self) -> Option<QueuedChunk> {
        let best = self
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(index, queued)| (queued.priority, *index))
            .map(|(index, _)| index)?;
        self.queue.remove(best)
    }

    /// Drop all queue and load state. In-flight results that arrive later are ignored.
    pub(crate) fn reset(&mut self, geometry: &mut GeometryPool, chunk_size: u32) {
        let shape = TileBatchShape::square(chunk_size);
        for (_, handle) in self.tile_batches.drain() {
            geometry.release(&shape, handle);
        }
        self.queue.clear();
        self.in_flight.clear();
        self.loaded.clear();
        self.wanted.clear();
        while self.rx.try_recv().is_ok() {}
    }
}

/// Chunks loaded around a centre: rows `-2..=1`, cols `-1..=1` in chunk strides.
/// 以中心区块为基准需要加载的周边区块
pub fn surrounding_chunk_keys(center: ChunkKey, chunk_size: u32) -> Vec<ChunkKey> {
    let stride = chunk_size as i32;
    let mut keys = Vec::with_capacity(12);
    for row_offset in -2..=1 {
        for col_offset in -1..=1 {
            keys.push(center.offset(row_offset * stride, col_offset * stride));
        }
    }
    keys
}

/// React to committed chunk switches: queue what the new centre needs and
/// unload what it no longer does.
/// 响应区块切换：排队加载需要的区块，卸载不再需要的区块
pub fn queue_chunk_loads(
    settings: Res<StreamingSettings>,
    mut switches: EventReader<ChunkSwitchCommitted>,
    mut loader: ResMut<ChunkLoader>,
    mut states: ResMut<ChunkStateTracker>,
    mut owner: ResMut<VisibilityOwner>,
    mut geometry: ResMut<GeometryPool>,
    mut unloaded: EventWriter<ChunkUnloaded>,
) {
    // Only the latest switch matters when several land in one frame.
    let Some(switch) = switches.read().last().copied() else {
        return;
    };

    let mut planned: Vec<(ChunkKey, ChunkPriority)> =
        surrounding_chunk_keys(switch.chunk, settings.chunk_size)
            .into_iter()
            .map(|key| {
                let priority = if key == switch.chunk {
                    ChunkPriority::Critical
                } else {
                    ChunkPriority::High
                };
                (key, priority)
            })
            .collect();
    if let Some(direction) = switch.direction {
        let ahead = prefetch_band(
            switch.chunk,
            settings.chunk_size,
            settings.prefetch_forward_strides,
            settings.prefetch_side_strides,
            direction,
        );
        planned.extend(ahead.into_iter().map(|key| (key, ChunkPriority::Low)));
    }

    let wanted: HashSet<ChunkKey> = planned.iter().map(|(key, _)| *key).collect();
    states.set_active_chunk(Some(switch.chunk));

    let mut queued = 0usize;
    for (chunk, priority) in planned {
        if loader.is_loaded(chunk) {
            // a load that landed after an earlier switch was indexed but never registered
            if !owner.is_registered(chunk) {
                trace!("Registering late-loaded chunk {} with the visibility owner", chunk);
                owner.register_chunk(
                    chunk,
                    chunk.world_rect(settings.chunk_size, settings.hex_size),
                );
            }
            continue;
        }
        if loader.is_in_flight(chunk) {
            continue;
        }
        if states.phase(chunk) == ChunkLifecyclePhase::Error {
            if let Err(e) = states.transition(chunk, ChunkLifecyclePhase::Idle) {
                warn!("Not retrying chunk {}: {}", chunk, e);
                continue;
            }
        }
        if loader.enqueue(chunk, priority) {
            if let Err(e) = states.transition(chunk, ChunkLifecyclePhase::Prefetching) {
                warn!("{}", e);
                continue;
            }
            queued += 1;
        }
        states.set_priority(chunk, priority);
    }

    // Queued chunks the new centre no longer needs are dropped before fetching.
    let stale: Vec<ChunkKey> = loader
        .queue
        .iter()
        .filter(|queued| !wanted.contains(&queued.chunk))
        .map(|queued| queued.chunk)
        .collect();
    for chunk in &stale {
        if let Err(e) = states.transition(*chunk, ChunkLifecyclePhase::Idle) {
            warn!("Dropped queued chunk {} without resetting its state: {}", chunk, e);
        }
    }
    loader.queue.retain(|queued| wanted.contains(&queued.chunk));

    let shape = TileBatchShape::square(settings.chunk_size);
    let to_unload: Vec<ChunkKey> = loader
        .loaded_chunks()
        .into_iter()
        .filter(|chunk| !wanted.contains(chunk))
        .collect();
    for chunk in &to_unload {
        if let Err(e) = states.transition(*chunk, ChunkLifecyclePhase::Unloading) {
            warn!("{}", e);
            continue;
        }
        loader.loaded.remove(chunk);
        if let Some(handle) = loader.tile_batches.remove(chunk) {
            geometry.release(&shape, handle);
        }
        owner.unregister_chunk(*chunk);
        unloaded.write(ChunkUnloaded {
            chunk: *chunk,
            bounds: chunk.bounds(settings.stride()),
        });
        if let Err(e) = states.transition(*chunk, ChunkLifecyclePhase::Idle) {
            warn!("Unloaded chunk {} is stuck in Unloading: {}", chunk, e);
        }
    }

    loader.wanted = wanted;
    debug!(
        "Chunk switch to {}: queued {}, dropped {} stale, unloaded {}",
        switch.chunk,
        queued,
        stale.len(),
        to_unload.len()
    );
}

/// Start fetches while there is room under `max_concurrent_fetches`.
/// 在并发上限内启动区块请求
pub fn spawn_chunk_fetches(
    settings: Res<StreamingSettings>,
    mut loader: ResMut<ChunkLoader>,
    mut states: ResMut<ChunkStateTracker>,
) {
    while loader.in_flight.len() < settings.max_concurrent_fetches {
        let Some(next) = loader.pop_next() else {
            break;
        };
        if let Err(e) = states.transition(next.chunk, ChunkLifecyclePhase::Fetching) {
            warn!("{}", e);
            continue;
        }
        loader.in_flight.insert(next.chunk);

        let chunk = next.chunk;
        let bounds = chunk.bounds(settings.stride());
        let source = loader.source.clone();
        let tx = loader.tx.clone();
        trace!("Fetching chunk {} ({:?})", chunk, next.priority);
        match loader.execution {
            FetchExecution::TaskPool => {
                AsyncComputeTaskPool::get_or_init(TaskPool::new)
                    .spawn(async move {
                        let result = source.fetch(chunk, bounds);
                        // the loader holds the receiver; a closed channel means it was dropped
                        let _ = tx.send(ChunkFetchResult { chunk, result }).await;
                    })
                    .detach();
            }
            FetchExecution::Inline => {
                let result = source.fetch(chunk, bounds);
                let _ = tx.try_send(ChunkFetchResult { chunk, result });
            }
        }
    }
}

/// Mark a load that cannot continue as failed, so the next switch that wants
/// the chunk queues it again. Entity updates already sent stay indexed.
fn abandon_load(states: &mut ChunkStateTracker, chunk: ChunkKey, stage: ChunkLifecyclePhase) {
    match states.transition(chunk, ChunkLifecyclePhase::Error) {
        Ok(()) => error!("Load of chunk {} stopped before {:?}", chunk, stage),
        Err(e) => error!(
            "Load of chunk {} stopped before {:?} and could not be marked failed: {}",
            chunk, stage, e
        ),
    }
}

/// Apply fetch results: hand entities to the managers, prepare tile geometry
/// and register the chunk with the visibility owner.
/// 应用请求结果：分发实体更新、准备几何数据并注册到可见性管理器
#[allow(clippy::too_many_arguments)]
pub fn apply_completed_chunk_loads(
    settings: Res<StreamingSettings>,
    frame: Res<FrameVisibility>,
    mut loader: ResMut<ChunkLoader>,
    mut states: ResMut<ChunkStateTracker>,
    mut owner: ResMut<VisibilityOwner>,
    mut geometry: ResMut<GeometryPool>,
    mut updates: EventWriter<EntityUpdateEvent>,
    mut loaded: EventWriter<ChunkLoaded>,
) {
    states.set_frame(frame.frame_id());
    let shape = TileBatchShape::square(settings.chunk_size);

    while let Ok(ChunkFetchResult { chunk, result }) = loader.rx.try_recv() {
        if !loader.in_flight.remove(&chunk) {
            debug!("Ignoring fetch result for chunk {} that is not in flight", chunk);
            continue;
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to fetch chunk {}: {}", chunk, e);
                abandon_load(&mut states, chunk, ChunkLifecyclePhase::Hydrating);
                continue;
            }
        };
        if states.transition(chunk, ChunkLifecyclePhase::Hydrating).is_err() {
            abandon_load(&mut states, chunk, ChunkLifecyclePhase::Hydrating);
            continue;
        }

        let mut batch_tiles = Vec::new();
        let mut entity_count = 0usize;
        for update in payload.updates {
            if let Err(e) = update.validate() {
                warn!("Dropping entry of chunk {}: {}", chunk, e);
                continue;
            }
            match &update {
                EntityUpdate::Tile(tile) => batch_tiles.push((tile.position(), tile.biome)),
                EntityUpdate::Army(_) | EntityUpdate::Structure(_) => entity_count += 1,
            }
            updates.write(EntityUpdateEvent(update));
        }
        states.set_entity_count(chunk, entity_count);

        if states.transition(chunk, ChunkLifecyclePhase::Rendering).is_err() {
            abandon_load(&mut states, chunk, ChunkLifecyclePhase::Rendering);
            continue;
        }
        let acquired = geometry.acquire(&shape, || TileBatch::with_capacity(shape));
        if let Some(batch) = geometry.get_mut(&shape, acquired.handle) {
            batch.tiles = batch_tiles;
            batch.parent = Some(chunk);
        }

        if states.transition(chunk, ChunkLifecyclePhase::Active).is_err() {
            geometry.release(&shape, acquired.handle);
            abandon_load(&mut states, chunk, ChunkLifecyclePhase::Active);
            continue;
        }
        loader.tile_batches.insert(chunk, acquired.handle);
        loader.loaded.insert(chunk);

        let is_current_target = loader.wanted.contains(&chunk);
        if is_current_target {
            let rect = chunk.world_rect(settings.chunk_size, settings.hex_size);
            owner.register_chunk(chunk, rect);
        } else {
            trace!(
                "Chunk {} completed after the scene moved on; indexed only",
                chunk
            );
        }
        info!("Loaded chunk {} with {} entities", chunk, entity_count);
        loaded.write(ChunkLoaded {
            chunk,
            entity_count,
            is_current_target,
        });
    }
}
