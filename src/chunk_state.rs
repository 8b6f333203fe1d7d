use crate::hex::ChunkKey;
use bevy::log::{trace, warn};
use bevy::prelude::Resource;
use std::collections::HashMap;
use std::fmt;

/// Lifecycle phase of a streamed chunk.
/// 区块生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkLifecyclePhase {
    /// Not loaded.
    /// 未加载
    #[default]
    Idle,
    /// Queued ahead of need.
    /// 预取排队中
    Prefetching,
    /// Fetch in flight.
    /// 请求进行中
    Fetching,
    /// Payload received, being written into the indices.
    /// 数据写入索引中
    Hydrating,
    /// Render resources being prepared.
    /// 渲染资源准备中
    Rendering,
    /// Loaded and usable.
    /// 已加载可用
    Active,
    /// Being torn down.
    /// 卸载中
    Unloading,
    /// Fetch or hydration failed.
    /// 失败
    Error,
}

impl ChunkLifecyclePhase {
    /// Phases reachable from `self`.
    pub fn allowed_transitions(self) -> &'static [ChunkLifecyclePhase] {
        use ChunkLifecyclePhase::*;
        match self {
            Idle => &[Prefetching, Fetching],
            Prefetching => &[Fetching, Idle, Error],
            Fetching => &[Hydrating, Error, Idle],
            Hydrating => &[Rendering, Error, Idle],
            Rendering => &[Active, Error, Idle],
            Active => &[Unloading, Rendering],
            Unloading => &[Idle],
            Error => &[Idle, Fetching],
        }
    }

    pub fn can_transition_to(self, next: ChunkLifecyclePhase) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Queued or in flight.
    pub fn is_loading(self) -> bool {
        matches!(
            self,
            ChunkLifecyclePhase::Prefetching
                | ChunkLifecyclePhase::Fetching
                | ChunkLifecyclePhase::Hydrating
                | ChunkLifecyclePhase::Rendering
        )
    }
}

/// Load priority; lower values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ChunkPriority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStateError {
    /// The requested transition is not in the lifecycle table.
    InvalidTransition {
        chunk: ChunkKey,
        from: ChunkLifecyclePhase,
        to: ChunkLifecyclePhase,
    },
}

impl fmt::Display for ChunkStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStateError::InvalidTransition { chunk, from, to } => {
                write!(f, "Invalid transition for chunk {chunk}: {from:?} -> {to:?}")
            }
        }
    }
}

impl std::error::Error for ChunkStateError {}

/// Per-chunk bookkeeping kept by [`ChunkStateTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkState {
    pub phase: ChunkLifecyclePhase,
    pub priority: ChunkPriority,
    /// Frame in which the phase last changed.
    pub changed_at: u64,
    pub entity_count: usize,
}

/// Lifecycle state of every chunk the streamer knows about.
/// 所有已知区块的生命周期状态
///
/// Chunks that return to `Idle` are forgotten.
#[derive(Resource, Debug, Default)]
pub struct ChunkStateTracker {
    states: HashMap<ChunkKey, ChunkState>,
    active_chunk: Option<ChunkKey>,
    frame: u64,
}

impl ChunkStateTracker {
    pub fn phase(&self, chunk: ChunkKey) -> ChunkLifecyclePhase {
        self.states
            .get(&chunk)
            .map_or(ChunkLifecyclePhase::Idle, |state| state.phase)
    }

    pub fn state(&self, chunk: ChunkKey) -> Option<&ChunkState> {
        self.states.get(&chunk)
    }

    /// Move `chunk` to `next`, enforcing the lifecycle table.
    /// 按生命周期表切换区块状态
    pub fn transition(
        &mut self,
        chunk: ChunkKey,
        next: ChunkLifecyclePhase,
    ) -> Result<(), ChunkStateError> {
        let current = self.phase(chunk);
        if !current.can_transition_to(next) {
            warn!(
                "Rejected chunk {} transition {:?} -> {:?}",
                chunk, current, next
            );
            return Err(ChunkStateError::InvalidTransition {
                chunk,
                from: current,
                to: next,
            });
        }
        trace!("Chunk {} {:?} -> {:?}", chunk, current, next);
        if next == ChunkLifecyclePhase::Idle {
            self.states.remove(&chunk);
            if self.active_chunk == Some(chunk) {
                self.active_chunk = None;
            }
            return Ok(());
        }
        let frame = self.frame;
        let state = self.states.entry(chunk).or_insert(ChunkState {
            phase: current,
            priority: ChunkPriority::default(),
            changed_at: frame,
            entity_count: 0,
        });
        state.phase = next;
        state.changed_at = frame;
        Ok(())
    }

    pub fn set_priority(&mut self, chunk: ChunkKey, priority: ChunkPriority) {
        if let Some(state) = self.states.get_mut(&chunk) {
            state.priority = priority;
        }
    }

    pub fn set_entity_count(&mut self, chunk: ChunkKey, count: usize) {
        if let Some(state) = self.states.get_mut(&chunk) {
            state.entity_count = count;
        }
    }

    pub fn set_active_chunk(&mut self, chunk: Option<ChunkKey>) {
        self.active_chunk = chunk;
    }

    pub fn active_chunk(&self) -> Option<ChunkKey> {
        self.active_chunk
    }

    /// Loaded and usable.
    pub fn is_ready(&self, chunk: ChunkKey) -> bool {
        self.phase(chunk) == ChunkLifecyclePhase::Active
    }

    pub fn is_loading(&self, chunk: ChunkKey) -> bool {
        self.phase(chunk).is_loading()
    }

    /// Chunks in `phase`, sorted for stable iteration.
    pub fn chunks_in_phase(&self, phase: ChunkLifecyclePhase) -> Vec<ChunkKey> {
        let mut chunks: Vec<ChunkKey> = self
            .states
            .iter()
            .filter(|(_, state)| state.phase == phase)
            .map(|(&key, _)| key)
            .collect();
        chunks.sort();
        chunks
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub(crate) fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.active_chunk = None;
    }
}
