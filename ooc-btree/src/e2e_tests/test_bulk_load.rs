//! Bulk-load a large sorted sequence into a narrow tree.

use crate::e2e_tests::helpers::*;

const ENTRIES: u64 = 50_000;

#[test]
fn test_bulk_load_sorted_sequence() {
    let tree = small_tree();

    let inserted = tree
        .insert_many((1..=ENTRIES).map(|k| (k, k * 10)), true)
        .wait()
        .unwrap();

    assert_eq!(inserted, ENTRIES);
    assert_eq!(tree.size(), ENTRIES);
    // Four entries per node cannot hold 50 000 keys in fewer than 8 levels.
    assert!(tree.height() >= 8, "height {}", tree.height());

    for key in [1, 2, 4_999, 25_000, 49_999, ENTRIES] {
        assert_eq!(lookup(&tree, key), Some(key * 10));
    }
    assert_eq!(lookup(&tree, 0), None);
    assert_eq!(lookup(&tree, ENTRIES + 1), None);

    let report = tree.verify().wait().unwrap();
    assert!(report.is_ok(), "{report}");
    assert_eq!(report.size, ENTRIES);
    assert_eq!(report.height, tree.height());
    assert!(report.leaves as u64 >= ENTRIES / 4);
}

#[test]
fn test_bulk_load_continues_below_the_root() {
    let tree = small_tree();
    tree.insert_many((0..ENTRIES).map(|k| (k, k)), true)
        .wait()
        .unwrap();
    let internals = tree.cache_stats().internals;

    let report = tree.verify().wait().unwrap();
    assert!(report.is_ok(), "{report}");

    // Descending from the root for every leaf costs `height - 1` internal
    // accesses per leaf; continuing from the last insertion point costs a few.
    let accesses = internals.hits + internals.misses;
    let root_descents = report.leaves as u64 * (report.height as u64 - 1);
    assert!(
        accesses * 2 < root_descents,
        "{accesses} internal accesses for {} leaves of height {}",
        report.leaves,
        report.height
    );
}

#[test]
fn test_bulk_load_into_populated_tree_crosses_leaves() {
    let tree = small_tree();
    for key in (0..2_000).step_by(10) {
        tree.insert(key, 0).wait().unwrap();
    }

    // Each run spans several existing leaves, so filling stops at fences.
    let inserted = tree
        .insert_many((0..2_000).filter(|k| k % 10 != 0).map(|k| (k, k)), true)
        .wait()
        .unwrap();

    assert_eq!(inserted, 1_800);
    let expected: Vec<(u64, u64)> = (0..2_000)
        .map(|k| (k, if k % 10 == 0 { 0 } else { k }))
        .collect();
    assert_eq!(collect(&tree), expected);
    assert_verified(&tree);
}

#[test]
fn test_bulk_load_merges_with_existing_entries() {
    let tree = small_tree();
    for key in (0..200).step_by(2) {
        tree.insert(key, 0).wait().unwrap();
    }

    // Odd keys are new; even keys are overwritten and not counted.
    let inserted = tree
        .insert_many((0..200).map(|k| (k, k + 1)), true)
        .wait()
        .unwrap();

    assert_eq!(inserted, 100);
    assert_eq!(tree.size(), 200);
    assert_eq!(collect(&tree), (0..200).map(|k| (k, k + 1)).collect::<Vec<_>>());
    assert_verified(&tree);
}

#[test]
fn test_bulk_load_unsorted_input_last_value_wins() {
    let tree = small_tree();

    let inserted = tree
        .insert_many(vec![(5, 1), (3, 1), (5, 2), (1, 1), (3, 7)], false)
        .wait()
        .unwrap();

    assert_eq!(inserted, 3);
    assert_eq!(collect(&tree), vec![(1, 1), (3, 7), (5, 2)]);
}
