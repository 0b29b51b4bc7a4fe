//! Trees stored in a block file.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::btree::BTree;
use crate::e2e_tests::helpers::*;
use crate::storage::{BlockDevice, FileBlockDevice};

#[test]
fn test_file_backed_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.blocks");
    let device: Arc<dyn BlockDevice> =
        Arc::new(FileBlockDevice::create(&path, BLOCK_SIZE).unwrap());
    let tree: BTree<u64, u64> = BTree::open(&small_config(16, 8), device).unwrap();

    let mut keys: Vec<u64> = (0..2000).collect();
    keys.shuffle(&mut rng(19));
    for &key in &keys {
        tree.insert(key, u64::MAX - key).wait().unwrap();
    }
    for &key in keys.iter().take(500) {
        assert_eq!(tree.erase(key).wait().unwrap(), Some(u64::MAX - key));
    }

    assert_eq!(tree.size(), 1500);
    assert!(tree.cache_stats().leaves.writebacks > 0);
    for &key in keys.iter().skip(500).step_by(37) {
        assert_eq!(lookup(&tree, key), Some(u64::MAX - key));
    }
    assert_verified(&tree);

    tree.flush().wait().unwrap();
    let len = std::fs::metadata(&path).unwrap().len();
    assert!(len >= BLOCK_SIZE as u64);
    assert_eq!(len % BLOCK_SIZE as u64, 0);

    tree.close().unwrap();
}

#[test]
fn test_file_device_block_size_must_match() {
    let dir = tempfile::tempdir().unwrap();
    let device: Arc<dyn BlockDevice> =
        Arc::new(FileBlockDevice::create(&dir.path().join("tree.blocks"), 512).unwrap());

    let result = BTree::<u64, u64>::open(&small_config(16, 8), device);

    assert!(result.is_err());
}
