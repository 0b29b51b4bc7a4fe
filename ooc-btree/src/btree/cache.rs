//! Node cache: a bounded map from block address to resident node store.
//!
//! One cache exists per node kind. Cached nodes are shared through `Arc`
//! handles; a node may only be evicted while the cache holds its sole
//! reference. Misses are filled by asynchronous reads. Requests that need a
//! node still being read park on the node and are resumed by the read
//! completion.
//!
//! # Design
//!
//! - The address map and the eviction sweep are guarded by one mutex per cache
//! - Each node carries its own small state lock for the reading/ready
//!   transition and the list of parked requests
//! - Dirty victims are written back asynchronously. A miss on a block whose
//!   writeback is still in flight holds its read on the writeback barrier; the
//!   requester parks on the node like any other miss and is resumed once the
//!   last write of that block has landed and the read has completed
//!
//! # Invariants
//!
//! - A node referenced outside the cache is never evicted
//! - Resident nodes never exceed `capacity + overcommit`
//! - Every parked request is resumed exactly once

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::btree::codec::{Key, Value};
use crate::btree::node::{NodeKind, NodeStore};
use crate::storage::{BlockId, DeviceError, StoreContext};

/// Identifier of a submitted request.
pub type RequestId = u64;

/// Called with the id of a parked request once its node is loaded.
pub type ResumeFn = Arc<dyn Fn(RequestId) + Send + Sync>;

/// A pinned cache entry of either kind.
///
/// Suspended requests keep their pins alive so the nodes they were using
/// stay resident until they resume.
pub trait Resident: Send + Sync {
    fn block(&self) -> BlockId;
}

#[derive(Debug)]
enum SlotPhase {
    Reading,
    Ready,
    Failed(String),
}

#[derive(Debug)]
struct SlotState {
    phase: SlotPhase,
    waiters: Vec<RequestId>,
}

/// A cache slot holding one node store.
#[derive(Debug)]
pub struct CachedNode<K, P> {
    block: BlockId,
    state: Mutex<SlotState>,
    data: RwLock<Option<NodeStore<K, P>>>,
    dirty: AtomicBool,
    tick: AtomicU64,
}

impl<K, P> CachedNode<K, P> {
    fn reading(block: BlockId) -> Self {
        Self {
            block,
            state: Mutex::new(SlotState {
                phase: SlotPhase::Reading,
                waiters: Vec::new(),
            }),
            data: RwLock::new(None),
            dirty: AtomicBool::new(false),
            tick: AtomicU64::new(0),
        }
    }

    fn ready(block: BlockId, node: NodeStore<K, P>) -> Self {
        Self {
            block,
            state: Mutex::new(SlotState {
                phase: SlotPhase::Ready,
                waiters: Vec::new(),
            }),
            data: RwLock::new(Some(node)),
            dirty: AtomicBool::new(true),
            tick: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Whether the node's contents are loaded.
    #[must_use]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn is_ready(&self) -> bool {
        matches!(
            self.state.lock().expect("lock poisoned").phase,
            SlotPhase::Ready
        )
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Shared access to the node.
    ///
    /// # Panics
    /// Panics if the node has not been loaded yet.
    #[allow(clippy::expect_used)] // RwLock poisoning indicates unrecoverable state
    pub fn read(&self) -> NodeRef<'_, K, P> {
        NodeRef {
            block: self.block,
            guard: self.data.read().expect("lock poisoned"),
        }
    }

    /// Exclusive access to the node. Marks it dirty.
    ///
    /// # Panics
    /// Panics if the node has not been loaded yet.
    #[allow(clippy::expect_used)] // RwLock poisoning indicates unrecoverable state
    pub fn write(&self) -> NodeMut<'_, K, P> {
        self.dirty.store(true, Ordering::Release);
        NodeMut {
            block: self.block,
            guard: self.data.write().expect("lock poisoned"),
        }
    }

    /// Park `requester` on this node if it is still being read.
    ///
    /// Returns `true` if the request was parked.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn park(&self, requester: RequestId) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        match &state.phase {
            SlotPhase::Ready => false,
            SlotPhase::Reading => {
                state.waiters.push(requester);
                true
            }
            SlotPhase::Failed(message) => panic!("node {} is unreadable: {message}", self.block),
        }
    }

    /// Install the result of a read and hand back the parked requests.
    #[allow(clippy::expect_used)] // Lock poisoning indicates unrecoverable state
    fn complete(&self, loaded: Result<NodeStore<K, P>, String>) -> Vec<RequestId> {
        let phase = match loaded {
            Ok(node) => {
                *self.data.write().expect("lock poisoned") = Some(node);
                SlotPhase::Ready
            }
            Err(message) => SlotPhase::Failed(message),
        };

        let mut state = self.state.lock().expect("lock poisoned");
        state.phase = phase;
        std::mem::take(&mut state.waiters)
    }
}

impl<K: Send + Sync, P: Send + Sync> Resident for CachedNode<K, P> {
    fn block(&self) -> BlockId {
        self.block
    }
}

/// Shared guard over a loaded node.
pub struct NodeRef<'a, K, P> {
    block: BlockId,
    guard: RwLockReadGuard<'a, Option<NodeStore<K, P>>>,
}

impl<K, P> Deref for NodeRef<'_, K, P> {
    type Target = NodeStore<K, P>;

    fn deref(&self) -> &Self::Target {
        let Some(node) = self.guard.as_ref() else {
            panic!("node {} accessed before its read completed", self.block);
        };
        node
    }
}

/// Exclusive guard over a loaded node.
pub struct NodeMut<'a, K, P> {
    block: BlockId,
    guard: RwLockWriteGuard<'a, Option<NodeStore<K, P>>>,
}

impl<K, P> Deref for NodeMut<'_, K, P> {
    type Target = NodeStore<K, P>;

    fn deref(&self) -> &Self::Target {
        let Some(node) = self.guard.as_ref() else {
            panic!("node {} accessed before its read completed", self.block);
        };
        node
    }
}

impl<K, P> DerefMut for NodeMut<'_, K, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let block = self.block;
        let Some(node) = self.guard.as_mut() else {
            panic!("node {block} accessed before its read completed");
        };
        node
    }
}

/// Result of asking the cache for a node.
pub enum Fetch<K, P> {
    /// The node is loaded.
    Ready(Arc<CachedNode<K, P>>),
    /// A read is in flight; the requester has been parked on the node.
    Pending(Arc<CachedNode<K, P>>),
}

/// Read held back until the writebacks of its block have landed. Receives
/// the failure message if one of those writes failed.
type HeldRead = Box<dyn FnOnce(Option<String>) + Send>;

/// Tracks in-flight writebacks per block.
///
/// A read of a block that is still being written is held here and issued by
/// the completion of the block's last outstanding write.
#[derive(Default)]
struct WritebackBarrier {
    state: Mutex<BarrierState>,
    drained: Condvar,
}

#[derive(Default)]
struct BarrierState {
    outstanding: HashMap<BlockId, usize>,
    held: HashMap<BlockId, Vec<HeldRead>>,
    failure: Option<DeviceError>,
}

impl WritebackBarrier {
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn enter(&self, block: BlockId) {
        *self
            .state
            .lock()
            .expect("lock poisoned")
            .outstanding
            .entry(block)
            .or_default() += 1;
    }

    /// Record a finished write and issue the reads it was holding back.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn leave(&self, block: BlockId, result: Result<(), DeviceError>) {
        let failure = result
            .as_ref()
            .err()
            .map(|e| format!("writeback of block {block} failed: {e}"));

        let released = {
            let mut state = self.state.lock().expect("lock poisoned");
            let remaining = state.outstanding.get_mut(&block).map(|count| {
                *count -= 1;
                *count
            });
            let released = if remaining == Some(0) {
                state.outstanding.remove(&block);
                state.held.remove(&block).unwrap_or_default()
            } else {
                Vec::new()
            };
            if let Err(e) = result {
                state.failure.get_or_insert(e);
            }
            if state.outstanding.is_empty() {
                self.drained.notify_all();
            }
            released
        };

        for read in released {
            read(failure.clone());
        }
    }

    /// Hold `read` until the writebacks of `block` complete.
    ///
    /// Returns the read back if nothing is being written to `block`.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn hold(&self, block: BlockId, read: HeldRead) -> Option<HeldRead> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.outstanding.contains_key(&block) {
            state.held.entry(block).or_default().push(read);
            None
        } else {
            Some(read)
        }
    }

    /// Description of the first failed writeback not yet reported by `wait`.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn failure(&self) -> Option<String> {
        self.state
            .lock()
            .expect("lock poisoned")
            .failure
            .as_ref()
            .map(ToString::to_string)
    }

    /// Block until every writeback has completed.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn wait(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        while !state.outstanding.is_empty() {
            state = self.drained.wait(state).expect("lock poisoned");
        }
        state.failure.take().map_or(Ok(()), Err)
    }
}

/// A pending load of one node, runnable from any thread.
struct ReadJob<K, P> {
    ctx: Arc<StoreContext>,
    kind: NodeKind,
    fan_out: usize,
    resume: ResumeFn,
    node: Arc<CachedNode<K, P>>,
}

impl<K: Key, P: Value> ReadJob<K, P> {
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn submit(self) {
        let block = self.node.block;
        let ctx = Arc::clone(&self.ctx);
        ctx.submit_read(
            block,
            Box::new(move |result| {
                let loaded = match result {
                    Ok(bytes) => NodeStore::decode(self.kind, self.fan_out, &bytes)
                        .map_err(|e| format!("corrupt block {block}: {e}")),
                    Err(e) => Err(format!("read of block {block} failed: {e}")),
                };
                self.finish(loaded);
            }),
        );
    }

    /// Install the outcome and resume every request parked on the node.
    fn finish(self, loaded: Result<NodeStore<K, P>, String>) {
        if let Err(message) = &loaded {
            tracing::error!(block = self.node.block, "{message}");
        }
        let waiters = self.node.complete(loaded);
        drop(self.node);
        for id in waiters {
            (self.resume)(id);
        }
    }
}

/// Live counters of one cache, readable from any thread.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
    resident: AtomicUsize,
}

impl CacheCounters {
    #[must_use]
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
            resident: self.resident.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
    pub resident: usize,
}

/// Residency limits of one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Nodes kept resident before the sweep starts evicting.
    pub capacity: usize,
    /// Extra nodes admitted when every resident node is retained.
    pub overcommit: usize,
}

#[derive(Debug)]
struct SlotMap<K, P> {
    nodes: HashMap<BlockId, Arc<CachedNode<K, P>>>,
    clock: u64,
}

impl<K, P> SlotMap<K, P> {
    fn touch(&mut self, node: &CachedNode<K, P>) {
        self.clock += 1;
        node.tick.store(self.clock, Ordering::Relaxed);
    }

    /// Least recently touched loaded node that only the cache references.
    fn eviction_candidate(&self) -> Option<BlockId> {
        self.nodes
            .values()
            .filter(|node| Arc::strong_count(node) == 1 && node.is_ready())
            .min_by_key(|node| node.tick.load(Ordering::Relaxed))
            .map(|node| node.block)
    }
}

/// Cache of node stores of one kind.
pub struct NodeCache<K, P> {
    ctx: Arc<StoreContext>,
    kind: NodeKind,
    fan_out: usize,
    limits: CacheLimits,
    slots: Mutex<SlotMap<K, P>>,
    barrier: Arc<WritebackBarrier>,
    counters: Arc<CacheCounters>,
    resume: ResumeFn,
}

impl<K, P> std::fmt::Debug for NodeCache<K, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCache")
            .field("kind", &self.kind)
            .field("fan_out", &self.fan_out)
            .field("limits", &self.limits)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl<K: Key, P: Value> NodeCache<K, P> {
    /// Create an empty cache.
    ///
    /// # Pre-conditions
    /// - `limits.capacity` > 0
    /// - `fan_out` nodes of this kind fit in one block of `ctx`
    #[must_use]
    pub fn new(
        ctx: Arc<StoreContext>,
        kind: NodeKind,
        fan_out: usize,
        limits: CacheLimits,
        counters: Arc<CacheCounters>,
        resume: ResumeFn,
    ) -> Self {
        assert!(limits.capacity > 0, "cache capacity must be positive");
        assert!(
            fan_out <= NodeStore::<K, P>::fan_out_for(ctx.block_size()),
            "fan-out {fan_out} does not fit in a {} byte block",
            ctx.block_size()
        );

        Self {
            ctx,
            kind,
            fan_out,
            limits,
            slots: Mutex::new(SlotMap {
                nodes: HashMap::new(),
                clock: 0,
            }),
            barrier: Arc::new(WritebackBarrier::default()),
            counters,
            resume,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub const fn fan_out(&self) -> usize {
        self.fan_out
    }

    #[must_use]
    pub const fn limits(&self) -> CacheLimits {
        self.limits
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Number of resident nodes.
    #[must_use]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn len(&self) -> usize {
        self.slots.lock().expect("lock poisoned").nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `block` is resident (loaded or being read).
    #[must_use]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn contains(&self, block: BlockId) -> bool {
        self.slots
            .lock()
            .expect("lock poisoned")
            .nodes
            .contains_key(&block)
    }

    /// Allocate a block and cache an empty dirty node for it.
    ///
    /// # Post-conditions
    /// - The returned handle and the cache both reference the node
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn get_new_node(&self) -> Result<Arc<CachedNode<K, P>>, DeviceError> {
        let block = self.ctx.allocate_block()?;
        let node = Arc::new(CachedNode::ready(
            block,
            NodeStore::new(self.kind, self.fan_out),
        ));

        let mut slots = self.slots.lock().expect("lock poisoned");
        self.make_room(&mut slots);
        slots.touch(&node);
        slots.nodes.insert(block, Arc::clone(&node));
        self.counters
            .resident
            .store(slots.nodes.len(), Ordering::Relaxed);

        tracing::trace!(kind = ?self.kind, block, "new node");
        Ok(node)
    }

    /// Look up `block`, reading it on a miss.
    ///
    /// If the node is not loaded yet, `requester` is parked on it and will be
    /// resumed when the read completes.
    #[must_use]
    pub fn get_node(&self, block: BlockId, requester: RequestId) -> Fetch<K, P> {
        let node = self.lookup(block);
        if node.park(requester) {
            Fetch::Pending(node)
        } else {
            Fetch::Ready(node)
        }
    }

    /// Start loading `block` without retaining it.
    pub fn prefetch(&self, block: BlockId) {
        drop(self.lookup(block));
    }

    /// Uncache a node and free its block.
    ///
    /// # Pre-conditions
    /// - `node` is the only reference held outside the cache
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn release_node(&self, node: Arc<CachedNode<K, P>>) -> Result<(), DeviceError> {
        let block = node.block;
        {
            let mut slots = self.slots.lock().expect("lock poisoned");
            let cached = slots.nodes.remove(&block);
            assert!(
                cached.is_some_and(|cached| Arc::ptr_eq(&cached, &node)),
                "released node {block} is not resident"
            );
            self.counters
                .resident
                .store(slots.nodes.len(), Ordering::Relaxed);
        }
        assert_eq!(
            Arc::strong_count(&node),
            1,
            "released node {block} is still referenced"
        );
        drop(node);

        self.ctx.free_block(block)
    }

    /// Write back every dirty resident node and wait for the writes.
    ///
    /// Returns the number of nodes written.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn flush(&self) -> Result<usize, DeviceError> {
        let dirty: Vec<_> = {
            let slots = self.slots.lock().expect("lock poisoned");
            slots
                .nodes
                .values()
                .filter(|node| node.is_dirty() && node.is_ready())
                .map(Arc::clone)
                .collect()
        };

        for node in &dirty {
            self.write_back(node);
        }
        self.barrier.wait()?;
        Ok(dirty.len())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn lookup(&self, block: BlockId) -> Arc<CachedNode<K, P>> {
        let mut slots = self.slots.lock().expect("lock poisoned");
        if let Some(node) = slots.nodes.get(&block).map(Arc::clone) {
            slots.touch(&node);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return node;
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.make_room(&mut slots);

        let node = Arc::new(CachedNode::reading(block));
        slots.touch(&node);
        slots.nodes.insert(block, Arc::clone(&node));
        self.counters
            .resident
            .store(slots.nodes.len(), Ordering::Relaxed);
        drop(slots);

        tracing::trace!(kind = ?self.kind, block, "cache miss");
        self.issue_read(Arc::clone(&node));
        node
    }

    /// Read `node` now, or once the writebacks of its block have landed.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn issue_read(&self, node: Arc<CachedNode<K, P>>) {
        let block = node.block;
        let job = ReadJob {
            ctx: Arc::clone(&self.ctx),
            kind: self.kind,
            fan_out: self.fan_out,
            resume: Arc::clone(&self.resume),
            node,
        };
        let read: HeldRead = Box::new(move |failure| match failure {
            None => job.submit(),
            Some(message) => job.finish(Err(message)),
        });

        match self.barrier.hold(block, read) {
            Some(read) => read(None),
            None => tracing::trace!(kind = ?self.kind, block, "read held behind writeback"),
        }
    }

    /// Evict until there is room for one more node.
    ///
    /// Dirty victims are written back without waiting for the writes.
    ///
    /// # Panics
    /// Panics if every resident node is retained and the overcommit slack is
    /// used up, or if an earlier writeback failed.
    fn make_room(&self, slots: &mut SlotMap<K, P>) {
        if let Some(failure) = self.barrier.failure() {
            panic!("{:?} node writeback failed: {failure}", self.kind);
        }

        while slots.nodes.len() >= self.limits.capacity {
            let Some(victim) = slots.eviction_candidate() else {
                break;
            };
            if let Some(node) = slots.nodes.remove(&victim) {
                self.evict(&node);
            }
        }
        self.counters
            .resident
            .store(slots.nodes.len(), Ordering::Relaxed);

        let resident = slots.nodes.len();
        if resident >= self.limits.capacity {
            assert!(
                resident < self.limits.capacity + self.limits.overcommit,
                "{:?} node cache exhausted: {resident} resident nodes are all retained \
                 (capacity {}, overcommit {})",
                self.kind,
                self.limits.capacity,
                self.limits.overcommit
            );
            tracing::warn!(
                kind = ?self.kind,
                resident,
                capacity = self.limits.capacity,
                "all cached nodes retained, overcommitting"
            );
        }

    }

    fn evict(&self, node: &CachedNode<K, P>) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = ?self.kind, block = node.block, dirty = node.is_dirty(), "evict");
        if node.is_dirty() {
            self.write_back(node);
        }
    }

    /// Encode `node` and submit its write, counting it on the barrier.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn write_back(&self, node: &CachedNode<K, P>) {
        let mut buf = vec![0u8; self.ctx.block_size()];
        node.read().encode(&mut buf);
        node.dirty.store(false, Ordering::Release);

        self.counters.writebacks.fetch_add(1, Ordering::Relaxed);
        let block = node.block;
        self.barrier.enter(block);
        let barrier = Arc::clone(&self.barrier);
        self.ctx.submit_write(
            block,
            buf,
            Box::new(move |result| {
                if let Err(e) = &result {
                    tracing::error!(block, "writeback failed: {e}");
                }
                barrier.leave(block, result);
            }),
        );
    }
}
