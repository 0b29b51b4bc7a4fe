//! Range erasure.

use std::ops::Bound;

use crate::e2e_tests::helpers::*;

fn loaded_tree(keys: std::ops::Range<u64>) -> crate::btree::BTree<u64, u64> {
    let tree = small_tree();
    tree.insert_many(keys.map(|k| (k, k)), true).wait().unwrap();
    tree
}

#[test]
fn test_erase_half_open_range() {
    let tree = loaded_tree(0..1000);

    let removed = tree.erase_range(100..200).wait().unwrap();

    assert_eq!(removed, 100);
    assert_eq!(tree.size(), 900);
    let at_150 = tree.lower_bound(150).wait().unwrap();
    let at_200 = tree.lower_bound(200).wait().unwrap();
    assert_eq!(at_150, at_200);
    assert_eq!(at_150.key(), Some(&200));
    assert_eq!(lookup(&tree, 99), Some(99));
    assert_verified(&tree);
}

#[test]
fn test_erase_range_bounds() {
    let tree = loaded_tree(0..300);

    assert_eq!(tree.erase_range(..=49).wait().unwrap(), 50);
    assert_eq!(
        tree.erase_range((Bound::Excluded(249), Bound::Unbounded))
            .wait()
            .unwrap(),
        50
    );
    assert_eq!(tree.erase_range(100..=100).wait().unwrap(), 1);

    let keys: Vec<u64> = collect(&tree).into_iter().map(|(k, _)| k).collect();
    let expected: Vec<u64> = (50..=249).filter(|&k| k != 100).collect();
    assert_eq!(keys, expected);
    assert_verified(&tree);
}

#[test]
fn test_erase_empty_ranges() {
    let tree = loaded_tree(0..100);

    assert_eq!(tree.erase_range(500..600).wait().unwrap(), 0);
    assert_eq!(tree.erase_range(10..10).wait().unwrap(), 0);
    assert_eq!(tree.size(), 100);
}

#[test]
fn test_erase_range_spanning_most_of_the_tree() {
    let tree = loaded_tree(0..2000);

    assert_eq!(tree.erase_range(1..1999).wait().unwrap(), 1998);

    assert_eq!(collect(&tree), vec![(0, 0), (1999, 1999)]);
    assert_verified(&tree);
}

#[test]
fn test_unbounded_range_clears() {
    let tree = loaded_tree(0..400);

    assert_eq!(tree.erase_range(..).wait().unwrap(), 400);

    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    tree.insert(3, 3).wait().unwrap();
    assert_eq!(collect(&tree), vec![(3, 3)]);
    assert_verified(&tree);
}
