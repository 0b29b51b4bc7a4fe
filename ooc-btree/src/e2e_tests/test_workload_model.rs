//! Random mixed workload checked against `std::collections::BTreeMap`.

use std::collections::BTreeMap;
use std::ops::Bound;

use rand::Rng;

use crate::e2e_tests::helpers::*;

const OPERATIONS: usize = 4000;
const KEY_SPACE: u64 = 600;

#[test]
fn test_random_workload_matches_model() {
    let tree = small_tree();
    let mut model: BTreeMap<u64, u64> = BTreeMap::new();
    let mut rng = rng(42);

    for step in 0..OPERATIONS {
        let key = rng.random_range(0..KEY_SPACE);
        let value = rng.random::<u64>();
        match rng.random_range(0..100) {
            0..35 => {
                let result = tree.insert(key, value).wait().unwrap();
                let previous = model.insert(key, value);
                assert_eq!(result.previous, previous);
                assert_eq!(result.inserted, previous.is_none());
                assert_eq!(result.cursor.value(), Some(&value));
            }
            35..45 => {
                let result = tree.try_insert(key, value).wait().unwrap();
                let expected = *model.entry(key).or_insert(value);
                assert_eq!(result.cursor.value(), Some(&expected));
            }
            45..70 => {
                assert_eq!(tree.erase(key).wait().unwrap(), model.remove(&key));
            }
            70..73 => {
                let end = (key + rng.random_range(1..40)).min(KEY_SPACE);
                let removed = tree.erase_range(key..end).wait().unwrap();
                let victims: Vec<u64> = model.range(key..end).map(|(k, _)| *k).collect();
                for victim in &victims {
                    model.remove(victim);
                }
                assert_eq!(removed, victims.len() as u64);
            }
            73..76 => {
                let batch: Vec<(u64, u64)> = (0..20)
                    .map(|_| (rng.random_range(0..KEY_SPACE), rng.random()))
                    .collect();
                let before = model.len();
                for &(k, v) in &batch {
                    model.insert(k, v);
                }
                let inserted = tree.insert_many(batch, false).wait().unwrap();
                assert_eq!(inserted, (model.len() - before) as u64);
            }
            76..88 => {
                let found = tree.find(key).wait().unwrap();
                assert_eq!(found.value(), model.get(&key));
            }
            88..94 => {
                let cursor = tree.lower_bound(key).wait().unwrap();
                let expected = model.range(key..).next();
                assert_eq!(cursor.into_entry(), expected.map(|(k, v)| (*k, *v)));
            }
            _ => {
                let cursor = tree.upper_bound(key).wait().unwrap();
                let expected = model
                    .range((Bound::Excluded(key), Bound::Unbounded))
                    .next();
                assert_eq!(cursor.into_entry(), expected.map(|(k, v)| (*k, *v)));
            }
        }
        assert_eq!(tree.size(), model.len() as u64, "size after step {step}");

        if step % 500 == 0 {
            assert_verified(&tree);
        }
    }

    assert_eq!(
        collect(&tree),
        model.into_iter().collect::<Vec<_>>()
    );
    assert_verified(&tree);
}
