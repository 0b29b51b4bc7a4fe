//! Ordered iteration with `next` and `prev`.

use crate::btree::Cursor;
use crate::e2e_tests::helpers::*;

#[test]
fn test_forward_walk_is_sorted() {
    let tree = small_tree();
    for key in [40, 10, 30, 20, 50, 0, 60] {
        tree.insert(key, key / 10).wait().unwrap();
    }

    let entries = collect(&tree);

    assert_eq!(
        entries,
        vec![(0, 0), (10, 1), (20, 2), (30, 3), (40, 4), (50, 5), (60, 6)]
    );
}

#[test]
fn test_next_and_prev_are_inverse() {
    let tree = small_tree();
    tree.insert_many((0..300).map(|k| (k * 3, k)), true)
        .wait()
        .unwrap();

    let mut cursor = tree.begin().wait().unwrap();
    while !cursor.is_end() {
        let next = tree.next(cursor.clone()).wait().unwrap();
        if let Cursor::At(_) = &next {
            let back = tree.prev(next.clone()).wait().unwrap();
            assert_eq!(back.key(), cursor.key());
        }
        cursor = next;
    }
}

#[test]
fn test_backward_walk_from_end() {
    let tree = small_tree();
    tree.insert_many((0..100).map(|k| (k, k)), true)
        .wait()
        .unwrap();

    let mut keys = Vec::new();
    let mut cursor = tree.prev(Cursor::End).wait().unwrap();
    while let Some(&key) = cursor.key() {
        keys.push(key);
        cursor = tree.prev(cursor).wait().unwrap();
    }

    assert_eq!(keys, (0..100).rev().collect::<Vec<_>>());
}

#[test]
fn test_begin_last_and_bounds() {
    let tree = small_tree();
    tree.insert_many((1..=50).map(|k| (k * 2, k)), true)
        .wait()
        .unwrap();

    assert_eq!(tree.begin().wait().unwrap().key(), Some(&2));
    assert_eq!(tree.last().wait().unwrap().key(), Some(&100));
    assert_eq!(tree.prev(tree.begin().wait().unwrap()).wait().unwrap(), Cursor::End);

    assert_eq!(tree.lower_bound(31).wait().unwrap().key(), Some(&32));
    assert_eq!(tree.lower_bound(32).wait().unwrap().key(), Some(&32));
    assert_eq!(tree.upper_bound(32).wait().unwrap().key(), Some(&34));
    assert!(tree.upper_bound(100).wait().unwrap().is_end());
    assert!(tree.lower_bound(101).wait().unwrap().is_end());

    let (first, last) = tree.equal_range(40).wait().unwrap();
    assert_eq!(first.key(), Some(&40));
    assert_eq!(last.key(), Some(&42));

    let (first, last) = tree.equal_range(41).wait().unwrap();
    assert_eq!(first, last);
    assert_eq!(first.key(), Some(&42));
}

#[test]
fn test_cursor_survives_unrelated_mutation() {
    let tree = small_tree();
    tree.insert_many((0..200).map(|k| (k, k)), true)
        .wait()
        .unwrap();

    let cursor = tree.find(10).wait().unwrap();
    // Structural changes elsewhere invalidate the leaf position, not the key.
    tree.erase(11).wait().unwrap();
    tree.insert_many((1000..1200).map(|k| (k, k)), true)
        .wait()
        .unwrap();

    let next = tree.next(cursor.clone()).wait().unwrap();
    assert_eq!(next.key(), Some(&12));
    let prev = tree.prev(cursor).wait().unwrap();
    assert_eq!(prev.key(), Some(&9));
}
