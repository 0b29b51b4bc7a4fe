//! Many requests in flight over a slow device.

use std::time::Duration;

use rand::Rng;

use crate::btree::Completion;
use crate::e2e_tests::helpers::*;

const WRITERS: u64 = 4;
const KEYS_PER_WRITER: u64 = 400;

#[test]
fn test_parallel_writers_and_reader() {
    let (tree, device) = slow_tree(&small_config(16, 8), Duration::from_micros(200));
    let total = WRITERS * KEYS_PER_WRITER;

    std::thread::scope(|scope| {
        for writer in 0..WRITERS {
            let tree = &tree;
            scope.spawn(move || {
                for i in 0..KEYS_PER_WRITER {
                    let key = i * WRITERS + writer;
                    tree.insert(key, key + 1).wait().unwrap();
                }
            });
        }
        let tree = &tree;
        scope.spawn(move || {
            let mut rng = rng(5);
            for _ in 0..500 {
                let key = rng.random_range(0..total);
                // A concurrent insert is either fully visible or not at all.
                if let Some(value) = lookup(tree, key) {
                    assert_eq!(value, key + 1);
                }
            }
        });
    });

    assert_eq!(tree.size(), total);
    assert_eq!(
        collect(&tree),
        (0..total).map(|k| (k, k + 1)).collect::<Vec<_>>()
    );
    assert!(device.reads() > 0);
    assert_verified(&tree);
}

#[test]
fn test_pipelined_lookups_all_complete() {
    let (tree, _device) = slow_tree(&small_config(8, 8), Duration::from_micros(100));
    tree.insert_many((0..1000).map(|k| (k, k * 3)), true)
        .wait()
        .unwrap();

    let pending: Vec<(u64, Completion<_>)> = (0..1000)
        .step_by(7)
        .map(|key| (key, tree.find(key)))
        .collect();

    for (key, completion) in pending {
        let cursor = completion.wait().unwrap();
        assert_eq!(cursor.value(), Some(&(key * 3)));
    }
}

#[test]
fn test_conflicting_requests_apply_in_submission_order() {
    let (tree, _device) = slow_tree(&small_config(8, 8), Duration::from_micros(100));
    tree.insert_many((0..300).map(|k| (k, 0)), true)
        .wait()
        .unwrap();

    let first = tree.insert(150, 1);
    let second = tree.insert(150, 2);
    let read_after_second = tree.find(150);
    let erase = tree.erase(150);
    let read_after_erase = tree.find(150);

    assert_eq!(first.wait().unwrap().previous, Some(0));
    assert_eq!(second.wait().unwrap().previous, Some(1));
    assert_eq!(read_after_second.wait().unwrap().value(), Some(&2));
    assert_eq!(erase.wait().unwrap(), Some(2));
    assert!(read_after_erase.wait().unwrap().is_end());
}
