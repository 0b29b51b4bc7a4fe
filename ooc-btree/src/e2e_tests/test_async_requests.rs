//! Awaiting completions from async code.

use futures::future::join_all;

use crate::btree::BTree;
use crate::e2e_tests::helpers::*;

#[tokio::test]
async fn test_await_completions() {
    let tree: BTree<u64, u64> = BTree::in_memory(&small_config(16, 8)).unwrap();

    let inserts = join_all((0..200).map(|k| tree.insert(k, k * k))).await;
    assert!(inserts.into_iter().all(|result| result.unwrap().inserted));

    let found = join_all((0..200).map(|k| tree.find(k))).await;
    for (key, cursor) in (0..200u64).zip(found) {
        assert_eq!(cursor.unwrap().value(), Some(&(key * key)));
    }

    assert_eq!(tree.erase_range(50..150).await.unwrap(), 100);
    let report = tree.verify().await.unwrap();
    assert!(report.is_ok(), "{report}");
    assert_eq!(report.size, 100);
}

#[tokio::test]
async fn test_poll_completion_without_blocking() {
    let tree: BTree<u64, u64> = BTree::in_memory(&small_config(16, 8)).unwrap();
    tree.insert(7, 49).await.unwrap();

    let mut pending = tree.find(7);
    let cursor = loop {
        if let Some(cursor) = pending.try_take().unwrap() {
            break cursor;
        }
        tokio::task::yield_now().await;
    };

    assert_eq!(cursor.value(), Some(&49));
}

#[tokio::test]
async fn test_requests_after_drop_of_completion_still_run() {
    let tree: BTree<u64, u64> = BTree::in_memory(&small_config(16, 8)).unwrap();

    drop(tree.insert(1, 1));
    // Conflicting requests run in submission order, so the insert is visible.
    assert_eq!(tree.find(1).await.unwrap().value(), Some(&1));
}
