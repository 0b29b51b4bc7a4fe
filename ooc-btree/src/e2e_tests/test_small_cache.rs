//! Trees much larger than their node caches.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::btree::BTree;
use crate::e2e_tests::helpers::*;

const SEEDS: u64 = 6;
const STEPS: usize = 600;
const KEY_SPACE: u64 = 400;

#[test]
fn test_tree_larger_than_cache() {
    let tree: BTree<u64, u64> = BTree::in_memory(&small_config(8, 8)).unwrap();
    let mut keys: Vec<u64> = (0..3000).collect();
    keys.shuffle(&mut rng(3));

    for &key in &keys {
        tree.insert(key, key * 2).wait().unwrap();
    }

    let stats = tree.cache_stats();
    assert!(stats.leaves.evictions > 0);
    assert!(stats.leaves.writebacks > 0);
    assert!(stats.internals.evictions > 0);
    assert!(stats.leaves.resident <= 16);

    // Evicted nodes are read back with their contents intact.
    assert_eq!(
        collect(&tree),
        (0..3000).map(|k| (k, k * 2)).collect::<Vec<_>>()
    );
    assert!(tree.cache_stats().leaves.misses > stats.leaves.misses);
    assert_verified(&tree);
}

#[test]
fn test_flush_writes_each_dirty_node_once() {
    let tree: BTree<u64, u64> = BTree::in_memory(&small_config(256, 128)).unwrap();
    tree.insert_many((0..400).map(|k| (k, k)), true)
        .wait()
        .unwrap();

    let written = tree.flush().wait().unwrap();

    assert!(written > 0);
    assert_eq!(tree.flush().wait().unwrap(), 0);
    tree.insert(1000, 1).wait().unwrap();
    assert!(tree.flush().wait().unwrap() >= 1);
}

/// First model entry at or after `key`.
fn at_or_after(model: &BTreeMap<u64, u64>, key: u64) -> Option<(u64, u64)> {
    model.range(key..).next().map(|(k, v)| (*k, *v))
}

#[test]
fn test_mixed_workload_under_cache_pressure() {
    for seed in 0..SEEDS {
        let tree: BTree<u64, u64> = BTree::in_memory(&small_config(6, 6)).unwrap();
        let mut model: BTreeMap<u64, u64> = BTreeMap::new();
        let mut rng = rng(seed);

        for step in 0..STEPS {
            // Readers queued ahead of the mutation see the state before it.
            let ahead: Vec<_> = (0..3)
                .map(|_| {
                    let key = rng.random_range(0..KEY_SPACE);
                    (at_or_after(&model, key), tree.lower_bound(key))
                })
                .collect();

            let key = rng.random_range(0..KEY_SPACE);
            let check: Box<dyn FnOnce()> = match rng.random_range(0..100) {
                0..35 => {
                    let value = rng.random();
                    let done = tree.insert(key, value);
                    let previous = model.insert(key, value);
                    Box::new(move || assert_eq!(done.wait().unwrap().previous, previous))
                }
                35..60 => {
                    let done = tree.erase(key);
                    let removed = model.remove(&key);
                    Box::new(move || assert_eq!(done.wait().unwrap(), removed))
                }
                60..75 => {
                    let end = (key + rng.random_range(1..60)).min(KEY_SPACE);
                    let done = tree.erase_range(key..end);
                    let victims: Vec<u64> = model.range(key..end).map(|(k, _)| *k).collect();
                    for victim in &victims {
                        model.remove(victim);
                    }
                    Box::new(move || assert_eq!(done.wait().unwrap(), victims.len() as u64))
                }
                75..88 => {
                    let run: Vec<(u64, u64)> = (key..key + rng.random_range(1..40))
                        .map(|k| (k, rng.random()))
                        .collect();
                    let before = model.len();
                    model.extend(run.iter().copied());
                    let added = (model.len() - before) as u64;
                    let done = tree.insert_many(run, true);
                    Box::new(move || assert_eq!(done.wait().unwrap(), added))
                }
                88..97 => {
                    let batch: Vec<(u64, u64)> = (0..20)
                        .map(|_| (rng.random_range(0..KEY_SPACE), rng.random()))
                        .collect();
                    let before = model.len();
                    model.extend(batch.iter().copied());
                    let added = (model.len() - before) as u64;
                    let done = tree.insert_many(batch, false);
                    Box::new(move || assert_eq!(done.wait().unwrap(), added))
                }
                _ => {
                    let done = tree.clear();
                    let cleared = model.len() as u64;
                    model.clear();
                    Box::new(move || assert_eq!(done.wait().unwrap(), cleared))
                }
            };

            let behind: Vec<_> = (0..3)
                .map(|_| {
                    let key = rng.random_range(0..KEY_SPACE);
                    (at_or_after(&model, key), tree.lower_bound(key))
                })
                .collect();

            for (expected, cursor) in ahead.into_iter().chain(behind) {
                assert_eq!(cursor.wait().unwrap().into_entry(), expected, "seed {seed} step {step}");
            }
            check();
            assert_eq!(tree.size(), model.len() as u64, "seed {seed} step {step}");

            if step % 100 == 99 {
                assert_verified(&tree);
            }
        }

        assert_eq!(collect(&tree), model.into_iter().collect::<Vec<_>>());
        assert_verified(&tree);
    }
}
