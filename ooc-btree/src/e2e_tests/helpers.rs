//! Common helpers for end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::btree::{BTree, Cursor};
use crate::config::TreeConfig;
use crate::storage::{BlockDevice, MemoryBlockDevice};

/// Block size used by every test tree.
pub const BLOCK_SIZE: usize = 256;

/// Config with fan-out 4 and room for `leaves` leaves and `internals`
/// internal nodes.
#[must_use]
pub fn small_config(leaves: usize, internals: usize) -> TreeConfig {
    TreeConfig::default()
        .with_block_size(BLOCK_SIZE)
        .with_fan_out(4)
        .with_cache_capacity(leaves, internals)
        .with_io_threads(2)
}

/// In-memory tree with fan-out 4 and moderately sized caches.
#[must_use]
pub fn small_tree() -> BTree<u64, u64> {
    #[allow(clippy::expect_used)]
    BTree::in_memory(&small_config(64, 32)).expect("Failed to open test tree")
}

/// Tree over a memory device that sleeps `latency` on every block access.
#[must_use]
pub fn slow_tree(
    config: &TreeConfig,
    latency: Duration,
) -> (BTree<u64, u64>, Arc<MemoryBlockDevice>) {
    let device = Arc::new(MemoryBlockDevice::new(config.block_size).with_latency(latency));
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    let shared: Arc<dyn BlockDevice> = Arc::clone(&device) as Arc<dyn BlockDevice>;
    #[allow(clippy::expect_used)]
    let tree = BTree::open(config, shared).expect("Failed to open test tree");
    (tree, device)
}

/// Deterministic random source.
#[must_use]
pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Every entry in key order, walked with `begin`/`next`.
pub fn collect(tree: &BTree<u64, u64>) -> Vec<(u64, u64)> {
    let mut entries = Vec::new();
    let mut cursor = tree.begin().wait().unwrap();
    while let Cursor::At(position) = &cursor {
        entries.push((*position.key(), *position.value()));
        cursor = tree.next(cursor).wait().unwrap();
    }
    entries
}

/// Run the structural check and fail with its report.
pub fn assert_verified(tree: &BTree<u64, u64>) {
    let report = tree.verify().wait().unwrap();
    assert!(report.is_ok(), "{report}");
    assert_eq!(report.size, tree.size());
}

/// Value stored under `key`, or `None` if the lookup returned `End`.
pub fn lookup(tree: &BTree<u64, u64>, key: u64) -> Option<u64> {
    tree.find(key).wait().unwrap().value().copied()
}
