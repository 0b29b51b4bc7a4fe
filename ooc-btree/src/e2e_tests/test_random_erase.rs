//! Insert keys in random order one at a time, then erase half of them.

use rand::seq::SliceRandom;

use crate::e2e_tests::helpers::*;

#[test]
fn test_erase_every_even_key() {
    let tree = small_tree();
    let mut keys: Vec<u64> = (0..1000).collect();
    keys.shuffle(&mut rng(7));

    for &key in &keys {
        let result = tree.insert(key, key + 1).wait().unwrap();
        assert!(result.inserted);
        assert_eq!(result.cursor.key(), Some(&key));
    }
    assert_eq!(tree.size(), 1000);
    assert_verified(&tree);

    for &key in keys.iter().filter(|k| *k % 2 == 0) {
        assert_eq!(tree.erase(key).wait().unwrap(), Some(key + 1));
    }

    assert_eq!(tree.size(), 500);
    for key in 0..1000 {
        if key % 2 == 0 {
            assert_eq!(lookup(&tree, key), None, "key {key} should be gone");
        } else {
            assert_eq!(lookup(&tree, key), Some(key + 1));
        }
    }
    assert_verified(&tree);
}

#[test]
fn test_erase_everything_collapses_root() {
    let tree = small_tree();
    let mut keys: Vec<u64> = (0..500).collect();
    tree.insert_many(keys.iter().map(|&k| (k, k)), true)
        .wait()
        .unwrap();
    assert!(tree.height() > 1);

    keys.shuffle(&mut rng(11));
    for (erased, &key) in keys.iter().enumerate() {
        assert_eq!(tree.erase(key).wait().unwrap(), Some(key));
        if erased % 50 == 0 {
            assert_verified(&tree);
        }
    }

    assert!(tree.is_empty());
    assert_eq!(tree.height(), 1);
    assert!(tree.begin().wait().unwrap().is_end());
    assert_verified(&tree);
}

#[test]
fn test_erase_missing_key() {
    let tree = small_tree();
    tree.insert(1, 1).wait().unwrap();

    assert_eq!(tree.erase(2).wait().unwrap(), None);
    assert_eq!(tree.size(), 1);
}
