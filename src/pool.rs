use bevy::log::{debug, trace, warn};
use bevy::prelude::Resource;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Capability surface a render backend exposes for pooled resources.
/// 渲染后端为池化资源提供的能力接口
///
/// The pool only ever talks to resources through this trait, so the pooling
/// logic stays independent of any scene graph or markup renderer.
pub trait PooledResource: Send + Sync + 'static {
    /// Remove the resource from its parent container, if any.
    fn detach_from_parent(&mut self);

    /// Remove a backing markup/DOM node, if the resource has one.
    fn detach_backing_node(&mut self) {}

    fn set_visible(&mut self, visible: bool);
}

/// Handle to a resource owned by a [`ResourcePool`].
///
/// Handles carry a generation that changes whenever the slot is handed out
/// again or dropped by [`ResourcePool::clear`], so a handle kept past its
/// release can neither reach nor release the slot's next user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    slot: usize,
    generation: u32,
}

/// Result of [`ResourcePool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub handle: PoolHandle,
    /// `true` when the factory had to build a fresh resource.
    pub is_new: bool,
}

#[derive(Debug)]
struct Slot<R> {
    resource: Option<R>,
    generation: u32,
}

/// Generic acquire/release pool.
/// 通用的获取/释放资源池
///
/// The pool owns every resource it ever built; callers hold [`PoolHandle`]s and
/// reach the resource through [`get`](Self::get) / [`get_mut`](Self::get_mut).
/// Which handles are idle is tracked in a side table, never on the resource.
#[derive(Resource, Debug)]
pub struct ResourcePool<R: PooledResource> {
    slots: Vec<Slot<R>>,
    /// Idle slots, most recently released last.
    /// 空闲槽位栈
    idle: Vec<usize>,
    /// Handles currently sitting in the pool.
    /// 当前处于池中的句柄
    pooled: HashSet<PoolHandle>,
    /// Slots emptied by `clear`, reused before growing.
    vacant: Vec<usize>,
}

impl<R: PooledResource> Default for ResourcePool<R> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            idle: Vec::new(),
            pooled: HashSet::new(),
            vacant: Vec::new(),
        }
    }
}

impl<R: PooledResource> ResourcePool<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take an idle resource, or build one with `factory` if none is idle.
    /// 获取资源：优先复用空闲资源，否则调用工厂创建
    pub fn acquire(&mut self, factory: impl FnOnce() -> R) -> Acquired {
        while let Some(slot) = self.idle.pop() {
            let entry = &mut self.slots[slot];
            self.pooled.remove(&PoolHandle {
                slot,
                generation: entry.generation,
            });
            entry.generation = entry.generation.wrapping_add(1);
            let handle = PoolHandle {
                slot,
                generation: entry.generation,
            };
            if let Some(resource) = entry.resource.as_mut() {
                resource.set_visible(true);
                trace!("Reusing pooled resource in slot {}", slot);
                return Acquired {
                    handle,
                    is_new: false,
                };
            }
        }

        let mut resource = factory();
        resource.set_visible(true);
        let handle = match self.vacant.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot];
                entry.resource = Some(resource);
                PoolHandle {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    resource: Some(resource),
                    generation: 0,
                });
                PoolHandle {
                    slot: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        debug!("Created pooled resource in slot {}", handle.slot);
        Acquired {
            handle,
            is_new: true,
        }
    }

    /// Return a resource to the pool.
    /// 释放资源回池中
    ///
    /// Releasing a handle that is already pooled, or one invalidated by
    /// [`clear`](Self::clear), does nothing.
    pub fn release(&mut self, handle: PoolHandle) {
        if self.pooled.contains(&handle) {
            warn!(
                "Attempted to double-release pooled resource in slot {}",
                handle.slot
            );
            return;
        }
        let Some(resource) = self.resolve_mut(handle) else {
            warn!(
                "Attempted to release stale pool handle (slot {}, generation {})",
                handle.slot, handle.generation
            );
            return;
        };
        resource.detach_from_parent();
        resource.detach_backing_node();
        resource.set_visible(false);
        self.pooled.insert(handle);
        self.idle.push(handle.slot);
        trace!("Released resource in slot {} to pool", handle.slot);
    }

    /// Detach and drop every idle resource. Checked-out resources are untouched.
    /// 清空所有空闲资源（不影响已借出的资源）
    pub fn clear(&mut self) {
        let dropped = self.idle.len();
        for slot in self.idle.drain(..) {
            let entry = &mut self.slots[slot];
            if let Some(mut resource) = entry.resource.take() {
                resource.detach_from_parent();
                resource.detach_backing_node();
            }
            entry.generation = entry.generation.wrapping_add(1);
            self.vacant.push(slot);
        }
        self.pooled.clear();
        if dropped > 0 {
            debug!("Cleared {} idle pooled resource(s)", dropped);
        }
    }

    /// Number of idle resources in the pool.
    pub fn size(&self) -> usize {
        self.idle.len()
    }

    /// Number of resources currently checked out.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.vacant.len() - self.idle.len()
    }

    pub fn is_pooled(&self, handle: PoolHandle) -> bool {
        self.pooled.contains(&handle)
    }

    /// Checked-out resource behind `handle`.
    pub fn get(&self, handle: PoolHandle) -> Option<&R> {
        if self.pooled.contains(&handle) {
            return None;
        }
        let entry = self.slots.get(handle.slot)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.resource.as_ref()
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut R> {
        if self.pooled.contains(&handle) {
            return None;
        }
        self.resolve_mut(handle)
    }

    fn resolve_mut(&mut self, handle: PoolHandle) -> Option<&mut R> {
        let entry = self.slots.get_mut(handle.slot)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.resource.as_mut()
    }
}

/// Pools keyed by a shape/type descriptor.
/// 按形状描述符分组的资源池
#[derive(Resource, Debug)]
pub struct KeyedPool<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: PooledResource,
{
    pools: HashMap<K, ResourcePool<R>>,
}

impl<K, R> Default for KeyedPool<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: PooledResource,
{
    fn default() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }
}

impl<K, R> KeyedPool<K, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    R: PooledResource,
{
    pub fn acquire(&mut self, key: &K, factory: impl FnOnce() -> R) -> Acquired {
        self.pools.entry(key.clone()).or_default().acquire(factory)
    }

    pub fn release(&mut self, key: &K, handle: PoolHandle) {
        match self.pools.get_mut(key) {
            Some(pool) => pool.release(handle),
            None => warn!("Attempted to release into a pool that was never used"),
        }
    }

    pub fn get(&self, key: &K, handle: PoolHandle) -> Option<&R> {
        self.pools.get(key)?.get(handle)
    }

    pub fn get_mut(&mut self, key: &K, handle: PoolHandle) -> Option<&mut R> {
        self.pools.get_mut(key)?.get_mut(handle)
    }

    pub fn clear(&mut self) {
        for pool in self.pools.values_mut() {
            pool.clear();
        }
    }

    /// Idle resources for `key`.
    pub fn size(&self, key: &K) -> usize {
        self.pools.get(key).map_or(0, ResourcePool::size)
    }

    /// Idle resources across every key.
    pub fn total_size(&self) -> usize {
        self.pools.values().map(ResourcePool::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct MockLabel {
        id: u32,
        parent: Option<u32>,
        dom_attached: bool,
        visible: bool,
    }

    impl PooledResource for MockLabel {
        fn detach_from_parent(&mut self) {
            self.parent = None;
        }

        fn detach_backing_node(&mut self) {
            self.dom_attached = false;
        }

        fn set_visible(&mut self, visible: bool) {
            self.visible = visible;
        }
    }

    fn label(id: u32) -> MockLabel {
        MockLabel {
            id,
            ..Default::default()
        }
    }

    #[test]
    fn reuse_returns_the_same_detached_instance() {
        let mut pool = ResourcePool::new();
        let first = pool.acquire(|| label(1));
        assert!(first.is_new);
        {
            let res = pool.get_mut(first.handle).unwrap();
            res.parent = Some(9);
            res.dom_attached = true;
        }
        pool.release(first.handle);
        assert_eq!(pool.size(), 1);

        let second = pool.acquire(|| label(2));
        assert!(!second.is_new);
        let res = pool.get(second.handle).unwrap();
        assert_eq!(res.id, 1);
        assert!(res.visible);
        assert_eq!(res.parent, None);
        assert!(!res.dom_attached);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn double_release_is_a_no_op() {
        let mut pool = ResourcePool::new();
        let acquired = pool.acquire(|| label(1));
        pool.release(acquired.handle);
        pool.release(acquired.handle);
        assert_eq!(pool.size(), 1);
        assert!(pool.is_pooled(acquired.handle));
        assert!(pool.get(acquired.handle).is_none());
    }

    #[test]
    fn size_counts_only_idle_resources() {
        let mut pool = ResourcePool::new();
        let a = pool.acquire(|| label(1));
        let _b = pool.acquire(|| label(2));
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.in_use(), 2);
        pool.release(a.handle);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn clear_leaves_checked_out_resources_alone() {
        let mut pool = ResourcePool::new();
        let a = pool.acquire(|| label(1));
        let b = pool.acquire(|| label(2));
        pool.release(a.handle);
        pool.clear();

        assert_eq!(pool.size(), 0);
        assert_eq!(pool.get(b.handle).map(|l| l.id), Some(2));
        // handle from before the clear is dead
        pool.release(a.handle);
        assert_eq!(pool.size(), 0);

        let c = pool.acquire(|| label(3));
        assert!(c.is_new);
        assert_ne!(c.handle, a.handle);
        assert!(pool.get(a.handle).is_none());
    }

    #[test]
    fn released_handle_cannot_touch_the_next_user() {
        let mut pool = ResourcePool::new();
        let first = pool.acquire(|| label(1));
        pool.release(first.handle);
        let second = pool.acquire(|| label(2));
        assert!(!second.is_new);
        assert_ne!(first.handle, second.handle);

        // late release through the old handle
        pool.release(first.handle);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.in_use(), 1);
        assert!(pool.get(first.handle).is_none());
        let res = pool.get(second.handle).unwrap();
        assert_eq!(res.id, 1);
        assert!(res.visible);
    }

    #[test]
    fn keyed_pools_do_not_share_resources() {
        let mut pools: KeyedPool<&'static str, MockLabel> = KeyedPool::default();
        let hex = pools.acquire(&"hex", || label(1));
        pools.release(&"hex", hex.handle);

        let other = pools.acquire(&"ring", || label(2));
        assert!(other.is_new);
        assert_eq!(pools.size(&"hex"), 1);
        assert_eq!(pools.total_size(), 1);
    }
}
