//! The engine: tree shape, node caches and the fetch/pin protocol used by
//! the operation state machines.
//!
//! The engine lives on the dispatch thread and is only touched by one state
//! machine at a time. Machines fetch nodes through it; a fetch that misses
//! returns `Suspend`, which carries every node the current step had pinned
//! plus the node being read. The dispatcher keeps those pins alive while the
//! request is suspended and hands them back through `adopt_pins` when it
//! resumes, so freeing one of those nodes also drops its pin.
//!
//! # Invariants
//!
//! - There is always a root node; the root is a leaf iff `height == 1`
//! - `size` equals the number of entries stored in leaves
//! - `version` changes whenever a mutating request is admitted

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::btree::cache::{
    CacheCounters, CacheLimits, CacheStats, CachedNode, Fetch, NodeCache, RequestId, Resident,
    ResumeFn,
};
use crate::btree::codec::{Key, Value};
use crate::btree::node::NodeKind;
use crate::storage::{BlockId, DeviceError, StoreContext};

/// Handle to a cached leaf.
pub type LeafHandle<K, V> = Arc<CachedNode<K, V>>;

/// Handle to a cached internal node.
pub type InternalHandle<K> = Arc<CachedNode<K, BlockId>>;

/// A request could not proceed because a node is still being read.
///
/// Holding the pins keeps the step's nodes resident until the request is
/// resumed by the read completion.
pub struct Suspend {
    pub(crate) block: BlockId,
    pub(crate) pins: Vec<Arc<dyn Resident>>,
}

impl std::fmt::Debug for Suspend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suspend")
            .field("block", &self.block)
            .field("pins", &self.pins.len())
            .finish()
    }
}

/// Tree-wide counters readable without going through the dispatcher.
#[derive(Debug, Default)]
pub struct SharedCounters {
    size: AtomicU64,
    height: AtomicUsize,
    pub(crate) leaves: Arc<CacheCounters>,
    pub(crate) internals: Arc<CacheCounters>,
}

impl SharedCounters {
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn leaf_cache(&self) -> CacheStats {
        self.leaves.snapshot()
    }

    #[must_use]
    pub fn internal_cache(&self) -> CacheStats {
        self.internals.snapshot()
    }
}

/// Node shapes and cache limits of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub leaf_fan_out: usize,
    pub internal_fan_out: usize,
    pub leaf_cache: CacheLimits,
    pub internal_cache: CacheLimits,
}

/// Owner of the tree shape and both node caches.
pub struct Engine<K: Key, V: Value> {
    leaves: NodeCache<K, V>,
    internals: NodeCache<K, BlockId>,
    root: BlockId,
    height: usize,
    size: u64,
    version: u64,
    counters: Arc<SharedCounters>,
    pins: Vec<Arc<dyn Resident>>,
    /// Pins handed back on resumption; held through the first step.
    carried: Vec<Arc<dyn Resident>>,
    carry_next_step: bool,
    current: RequestId,
}

impl<K: Key, V: Value> Engine<K, V> {
    /// Build an engine holding an empty tree: a single empty root leaf.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn new(
        ctx: Arc<StoreContext>,
        settings: EngineSettings,
        counters: Arc<SharedCounters>,
        resume: ResumeFn,
    ) -> Result<Self, DeviceError> {
        let leaves = NodeCache::new(
            Arc::clone(&ctx),
            NodeKind::Leaf,
            settings.leaf_fan_out,
            settings.leaf_cache,
            Arc::clone(&counters.leaves),
            Arc::clone(&resume),
        );
        let internals = NodeCache::new(
            ctx,
            NodeKind::Internal,
            settings.internal_fan_out,
            settings.internal_cache,
            Arc::clone(&counters.internals),
            resume,
        );

        let root = leaves.get_new_node()?.block();
        counters.height.store(1, Ordering::Release);
        counters.size.store(0, Ordering::Release);

        Ok(Self {
            leaves,
            internals,
            root,
            height: 1,
            size: 0,
            version: 0,
            counters,
            pins: Vec::new(),
            carried: Vec::new(),
            carry_next_step: false,
            current: 0,
        })
    }

    #[must_use]
    pub const fn root(&self) -> BlockId {
        self.root
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn leaf_fan_out(&self) -> usize {
        self.leaves.fan_out()
    }

    #[must_use]
    pub const fn internal_fan_out(&self) -> usize {
        self.internals.fan_out()
    }

    #[must_use]
    pub const fn leaf_cache(&self) -> &NodeCache<K, V> {
        &self.leaves
    }

    #[must_use]
    pub const fn internal_cache(&self) -> &NodeCache<K, BlockId> {
        &self.internals
    }

    /// Install a new root.
    ///
    /// # Pre-conditions
    /// - `height` >= 1 and `root` is a leaf iff `height == 1`
    pub fn set_root(&mut self, root: BlockId, height: usize) {
        assert!(height >= 1, "tree height must be at least 1");
        self.root = root;
        self.height = height;
        self.counters.height.store(height, Ordering::Release);
    }

    pub fn grow(&mut self, added: u64) {
        self.size += added;
        self.counters.size.store(self.size, Ordering::Release);
    }

    pub fn shrink(&mut self, removed: u64) {
        assert!(removed <= self.size, "size underflow");
        self.size -= removed;
        self.counters.size.store(self.size, Ordering::Release);
    }

    pub fn reset_size(&mut self) {
        self.size = 0;
        self.counters.size.store(0, Ordering::Release);
    }

    /// Invalidate every outstanding cursor's leaf/index pair.
    pub const fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Start running `id`. Pins from any earlier request are dropped.
    pub fn begin_request(&mut self, id: RequestId) {
        self.current = id;
        self.pins.clear();
        self.carried.clear();
        self.carry_next_step = false;
    }

    /// Take over the pins a suspended request carried.
    ///
    /// They stay held through the first step after resumption, so the node
    /// whose read woke the request cannot be evicted before the step fetches
    /// it again. Releasing one of those nodes drops its carried pin.
    ///
    /// # Pre-conditions
    /// - Called after `begin_request` for the request that carried them
    pub fn adopt_pins(&mut self, pins: Vec<Arc<dyn Resident>>) {
        self.carried = pins;
        self.carry_next_step = true;
    }

    /// Drop the pins of the finished step.
    ///
    /// Every step re-fetches the nodes it needs, so pins never have to
    /// outlive the step that took them.
    pub fn begin_step(&mut self) {
        self.pins.clear();
        if !std::mem::take(&mut self.carry_next_step) {
            self.carried.clear();
        }
    }

    /// Fetch a leaf, pinning it for the current step.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn leaf(&mut self, block: BlockId) -> Result<LeafHandle<K, V>, Suspend> {
        match self.leaves.get_node(block, self.current) {
            Fetch::Ready(node) => {
                self.pins.push(Arc::clone(&node) as Arc<dyn Resident>);
                Ok(node)
            }
            Fetch::Pending(node) => Err(self.suspend(node)),
        }
    }

    /// Fetch an internal node, pinning it for the current step.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn internal(&mut self, block: BlockId) -> Result<InternalHandle<K>, Suspend> {
        match self.internals.get_node(block, self.current) {
            Fetch::Ready(node) => {
                self.pins.push(Arc::clone(&node) as Arc<dyn Resident>);
                Ok(node)
            }
            Fetch::Pending(node) => Err(self.suspend(node)),
        }
    }

    /// Create an empty leaf in a fresh block.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn new_leaf(&mut self) -> LeafHandle<K, V> {
        let node = self
            .leaves
            .get_new_node()
            .unwrap_or_else(|e| panic!("leaf allocation failed: {e}"));
        self.pins.push(Arc::clone(&node) as Arc<dyn Resident>);
        node
    }

    /// Create an empty internal node in a fresh block.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn new_internal(&mut self) -> InternalHandle<K> {
        let node = self
            .internals
            .get_new_node()
            .unwrap_or_else(|e| panic!("internal node allocation failed: {e}"));
        self.pins.push(Arc::clone(&node) as Arc<dyn Resident>);
        node
    }

    /// Drop a leaf from the tree and free its block.
    pub fn release_leaf(&mut self, node: LeafHandle<K, V>) {
        let block = node.block();
        self.unpin(block);
        self.leaves
            .release_node(node)
            .unwrap_or_else(|e| panic!("freeing leaf {block} failed: {e}"));
    }

    /// Drop an internal node from the tree and free its block.
    pub fn release_internal(&mut self, node: InternalHandle<K>) {
        let block = node.block();
        self.unpin(block);
        self.internals
            .release_node(node)
            .unwrap_or_else(|e| panic!("freeing internal node {block} failed: {e}"));
    }

    /// Write back every dirty node of both kinds.
    ///
    /// Returns the number of nodes written.
    pub fn flush(&mut self) -> usize {
        let leaves = self
            .leaves
            .flush()
            .unwrap_or_else(|e| panic!("leaf flush failed: {e}"));
        let internals = self
            .internals
            .flush()
            .unwrap_or_else(|e| panic!("internal flush failed: {e}"));
        leaves + internals
    }

    fn unpin(&mut self, block: BlockId) {
        self.pins.retain(|pin| pin.block() != block);
        self.carried.retain(|pin| pin.block() != block);
    }

    fn suspend<P>(&mut self, node: Arc<CachedNode<K, P>>) -> Suspend
    where
        CachedNode<K, P>: Resident + 'static,
    {
        let block = node.block();
        let mut pins = std::mem::take(&mut self.pins);
        pins.append(&mut self.carried);
        pins.push(node as Arc<dyn Resident>);
        Suspend { block, pins }
    }
}
