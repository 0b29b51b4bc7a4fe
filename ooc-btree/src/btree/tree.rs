//! Public tree handle.
//!
//! `BTree` owns the dispatch thread. Every operation packs its arguments
//! into a state machine, submits it, and returns a `Completion` that
//! resolves when the machine finishes. Size, height and cache statistics
//! are read from shared counters without a round trip.

use std::ops::RangeBounds;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::btree::cache::{CacheLimits, CacheStats, ResumeFn};
use crate::btree::codec::{Key, Value};
use crate::btree::cursor::Cursor;
use crate::btree::dispatch::{Dispatcher, Message};
use crate::btree::engine::{Engine, EngineSettings, SharedCounters};
use crate::btree::lock::KeyRange;
use crate::btree::machine::{
    BulkInsertMachine, ClearMachine, EraseMachine, FlushMachine, InsertMachine, InsertResult,
    Machine, Reply, SeekMachine, SeekTarget, VerifyMachine, VerifyReport,
};
use crate::btree::node::{DuplicatePolicy, MIN_FAN_OUT, NodeStore};
use crate::config::{ConfigError, TreeConfig};
use crate::storage::{BlockDevice, BlockId, DeviceError, MemoryBlockDevice, StoreContext};

/// Error returned by tree construction and by completions.
#[derive(Debug)]
pub enum EngineError {
    /// The dispatch thread is gone; the request did not run to completion.
    Stopped,
    /// The block device failed while the tree was being set up.
    Device(DeviceError),
    /// The configuration was rejected.
    Config(ConfigError),
    /// The dispatch thread could not be started.
    Spawn(std::io::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "tree engine has stopped"),
            Self::Device(e) => write!(f, "device error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Spawn(e) => write!(f, "failed to start dispatch thread: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Stopped => None,
            Self::Device(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Spawn(e) => Some(e),
        }
    }
}

impl From<DeviceError> for EngineError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Pending result of a submitted request.
///
/// Resolve it by blocking (`wait`), by polling (`try_take`) or by awaiting
/// it. A request runs to completion whether or not its completion is kept.
#[derive(Debug)]
#[must_use = "a completion does nothing unless its result is taken"]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    /// Block the current thread until the request completes.
    ///
    /// Must not be called from inside an async runtime; `.await` the
    /// completion there instead.
    pub fn wait(self) -> Result<T, EngineError> {
        self.rx.blocking_recv().map_err(|_| EngineError::Stopped)
    }

    /// Take the result if the request has completed.
    pub fn try_take(&mut self) -> Result<Option<T>, EngineError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(EngineError::Stopped),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map_err(|_| EngineError::Stopped)
    }
}

/// Cache statistics of both node kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCacheStats {
    pub leaves: CacheStats,
    pub internals: CacheStats,
}

/// An ordered map from `K` to `V` stored in blocks of a `BlockDevice`.
///
/// Keys are unique. Operations are asynchronous requests executed by a
/// dedicated dispatch thread; conflicting requests take effect in
/// submission order.
pub struct BTree<K: Key, V: Value> {
    tx: mpsc::UnboundedSender<Message<K, V>>,
    next_id: AtomicU64,
    counters: Arc<SharedCounters>,
    leaf_fan_out: usize,
    internal_fan_out: usize,
    dispatcher: Option<JoinHandle<()>>,
}

impl<K: Key, V: Value> std::fmt::Debug for BTree<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("size", &self.size())
            .field("height", &self.height())
            .field("leaf_fan_out", &self.leaf_fan_out)
            .field("internal_fan_out", &self.internal_fan_out)
            .finish_non_exhaustive()
    }
}

impl<K: Key, V: Value> BTree<K, V> {
    /// Create an empty tree on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or does not fit the
    /// device, if the root block cannot be allocated, or if the dispatch
    /// thread cannot be started.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn open(config: &TreeConfig, device: Arc<dyn BlockDevice>) -> Result<Self, EngineError> {
        config.validate()?;
        if device.block_size() != config.block_size {
            return Err(ConfigError::BlockSizeMismatch {
                configured: config.block_size,
                device: device.block_size(),
            }
            .into());
        }

        let leaf_fan_out = fan_out(
            "leaf_fan_out",
            NodeStore::<K, V>::fan_out_for(config.block_size),
            config.leaf_fan_out,
        )?;
        let internal_fan_out = fan_out(
            "internal_fan_out",
            NodeStore::<K, BlockId>::fan_out_for(config.block_size),
            config.internal_fan_out,
        )?;

        let limits = |capacity: usize| CacheLimits {
            capacity,
            overcommit: config.overcommit.unwrap_or(capacity),
        };
        let settings = EngineSettings {
            leaf_fan_out,
            internal_fan_out,
            leaf_cache: limits(config.leaf_cache_capacity),
            internal_cache: limits(config.internal_cache_capacity),
        };

        let ctx = Arc::new(StoreContext::new(device, config.io_threads)?);
        let (tx, rx) = mpsc::unbounded_channel();
        let resume_tx = tx.clone();
        let resume: ResumeFn = Arc::new(move |id| {
            // Fails only once the dispatch loop is gone.
            let _ = resume_tx.send(Message::Resume(id));
        });

        let counters = Arc::new(SharedCounters::default());
        let engine = Engine::new(ctx, settings, Arc::clone(&counters), resume)?;

        // Each running request pins a handful of nodes per step.
        let max_active = config
            .max_active_requests
            .min(config.leaf_cache_capacity.min(config.internal_cache_capacity) / 2)
            .max(1);
        let dispatcher = Dispatcher::new(engine, rx, max_active);
        let handle = std::thread::Builder::new()
            .name("ooc-btree-dispatch".to_string())
            .spawn(move || dispatcher.run())
            .map_err(EngineError::Spawn)?;

        info!(
            block_size = config.block_size,
            leaf_fan_out, internal_fan_out, max_active, "tree opened"
        );

        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
            counters,
            leaf_fan_out,
            internal_fan_out,
            dispatcher: Some(handle),
        })
    }

    /// Create an empty tree on a fresh in-memory device.
    pub fn in_memory(config: &TreeConfig) -> Result<Self, EngineError> {
        Self::open(config, Arc::new(MemoryBlockDevice::new(config.block_size)))
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.counters.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of levels; 1 while the root is a leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        self.counters.height()
    }

    #[must_use]
    pub const fn leaf_fan_out(&self) -> usize {
        self.leaf_fan_out
    }

    #[must_use]
    pub const fn internal_fan_out(&self) -> usize {
        self.internal_fan_out
    }

    #[must_use]
    pub fn cache_stats(&self) -> TreeCacheStats {
        TreeCacheStats {
            leaves: self.counters.leaf_cache(),
            internals: self.counters.internal_cache(),
        }
    }

    /// The entry with key `key`, or `End`.
    pub fn find(&self, key: K) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::Find(key))
    }

    /// The first entry with key >= `key`, or `End`.
    pub fn lower_bound(&self, key: K) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::LowerBound(key))
    }

    /// The first entry with key > `key`, or `End`.
    pub fn upper_bound(&self, key: K) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::UpperBound(key))
    }

    /// `(lower_bound(key), upper_bound(key))` from a single descent.
    pub fn equal_range(&self, key: K) -> Completion<(Cursor<K, V>, Cursor<K, V>)> {
        self.submit(|reply| Machine::Seek(SeekMachine::equal_range(key, reply)))
    }

    /// The smallest entry, or `End` for an empty tree.
    pub fn begin(&self) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::First)
    }

    /// The largest entry, or `End` for an empty tree.
    pub fn last(&self) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::Last)
    }

    /// The entry after `cursor`, or `End`.
    ///
    /// Advancing `End` is a contract violation that stops the engine.
    pub fn next(&self, cursor: Cursor<K, V>) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::Next(cursor))
    }

    /// The entry before `cursor`, or `End` before the first entry. The entry
    /// before `End` is the last one.
    pub fn prev(&self, cursor: Cursor<K, V>) -> Completion<Cursor<K, V>> {
        self.seek(SeekTarget::Prev(cursor))
    }

    /// Insert or overwrite an entry.
    pub fn insert(&self, key: K, value: V) -> Completion<InsertResult<K, V>> {
        self.submit(|reply| {
            Machine::Insert(InsertMachine::new(
                key,
                value,
                DuplicatePolicy::Replace,
                reply,
            ))
        })
    }

    /// Insert an entry unless the key is present; an existing entry is left
    /// untouched and reported with `inserted == false`.
    pub fn try_insert(&self, key: K, value: V) -> Completion<InsertResult<K, V>> {
        self.submit(|reply| {
            Machine::Insert(InsertMachine::new(key, value, DuplicatePolicy::Keep, reply))
        })
    }

    /// Insert many entries, overwriting existing keys. Resolves to the number
    /// of new entries.
    ///
    /// With `sorted_hint == false` the input is sorted first and, for
    /// repeated keys, the last value wins. With `sorted_hint == true` the
    /// input must already be strictly increasing.
    ///
    /// # Panics
    /// Panics in the calling thread if `sorted_hint` is set and the keys are
    /// not strictly increasing. Nothing is submitted in that case.
    pub fn insert_many(
        &self,
        entries: impl IntoIterator<Item = (K, V)>,
        sorted_hint: bool,
    ) -> Completion<u64> {
        let mut entries: Vec<(K, V)> = entries.into_iter().collect();
        if sorted_hint {
            assert!(
                entries.windows(2).all(|pair| pair[0].0 < pair[1].0),
                "insert_many: entries marked sorted are not strictly increasing"
            );
        } else {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries = dedup_keep_last(entries);
        }
        self.submit(|reply| Machine::BulkInsert(BulkInsertMachine::new(entries, reply)))
    }

    /// Remove `key`, resolving to its value if it was present.
    pub fn erase(&self, key: K) -> Completion<Option<V>> {
        self.submit(|reply| Machine::Erase(EraseMachine::key(key, reply)))
    }

    /// Remove the entry `cursor` points at.
    ///
    /// Erasing `End` is a contract violation that stops the engine.
    pub fn erase_at(&self, cursor: Cursor<K, V>) -> Completion<Option<V>> {
        self.submit(|reply| Machine::Erase(EraseMachine::at(cursor, reply)))
    }

    /// Remove every entry whose key lies in `range`, resolving to the number
    /// removed.
    pub fn erase_range(&self, range: impl RangeBounds<K>) -> Completion<u64> {
        let range = KeyRange::from_bounds(&range);
        if range.is_everything() {
            return self.clear();
        }
        self.submit(|reply| Machine::Erase(EraseMachine::new(range, reply)))
    }

    /// Remove every entry, resolving to the number removed.
    pub fn clear(&self) -> Completion<u64> {
        self.submit(|reply| Machine::Clear(ClearMachine::new(reply)))
    }

    /// Check the structural invariants of the whole tree.
    pub fn verify(&self) -> Completion<VerifyReport> {
        self.submit(|reply| Machine::Verify(VerifyMachine::new(reply)))
    }

    /// Write every dirty cached node to the device, resolving to the number
    /// of nodes written.
    pub fn flush(&self) -> Completion<usize> {
        self.submit(|reply| Machine::Flush(FlushMachine::new(reply)))
    }

    /// Flush, finish every submitted request and stop the dispatch thread.
    ///
    /// Blocks the calling thread.
    pub fn close(mut self) -> Result<(), EngineError> {
        self.flush().wait()?;
        self.shutdown()
    }

    fn seek(&self, target: SeekTarget<K, V>) -> Completion<Cursor<K, V>> {
        self.submit(|reply| Machine::Seek(SeekMachine::new(target, reply)))
    }

    fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Machine<K, V>) -> Completion<T> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // A stopped dispatcher hands the request back; dropping it drops the
        // reply sender and the completion resolves to `Stopped`.
        let _ = self.tx.send(Message::Submit(id, build(Reply::new(tx))));
        Completion { rx }
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        let Some(handle) = self.dispatcher.take() else {
            return Ok(());
        };
        let _ = self.tx.send(Message::Shutdown);
        handle.join().map_err(|_| EngineError::Stopped)
    }
}

impl<K: Key, V: Value> Drop for BTree<K, V> {
    fn drop(&mut self) {
        // A dispatch thread that panicked has nothing left to finish.
        let _ = self.shutdown();
    }
}

/// Fan-out of one node kind: what fits in a block, optionally capped.
///
/// `fits` already respects the block format's `MAX_FAN_OUT`.
fn fan_out(name: &str, fits: usize, cap: Option<usize>) -> Result<usize, ConfigError> {
    let fan_out = cap.map_or(fits, |cap| cap.min(fits));
    if fan_out < MIN_FAN_OUT {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!(
                "only {fan_out} entries fit in a block, at least {MIN_FAN_OUT} are needed"
            ),
        });
    }
    Ok(fan_out)
}

/// Collapse runs of equal keys in a sorted vector to their last entry.
fn dedup_keep_last<K: Ord, V>(entries: Vec<(K, V)>) -> Vec<(K, V)> {
    let mut deduped: Vec<(K, V)> = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match deduped.last_mut() {
            Some(last) if last.0 == key => *last = (key, value),
            _ => deduped.push((key, value)),
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::MAX_FAN_OUT;

    fn small_tree() -> BTree<u64, u64> {
        let config = TreeConfig::default()
            .with_block_size(256)
            .with_fan_out(4)
            .with_cache_capacity(16, 16);
        BTree::in_memory(&config).unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let tree = small_tree();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.find(1).wait().unwrap(), Cursor::End);
        assert_eq!(tree.begin().wait().unwrap(), Cursor::End);
        assert_eq!(tree.last().wait().unwrap(), Cursor::End);
        assert_eq!(tree.erase(1).wait().unwrap(), None);
        assert!(tree.verify().wait().unwrap().is_ok());
    }

    #[test]
    fn test_insert_and_find() {
        let tree = small_tree();
        let first = tree.insert(7, 70).wait().unwrap();
        assert!(first.inserted);
        assert_eq!(first.previous, None);
        assert_eq!(first.cursor.key(), Some(&7));

        let again = tree.insert(7, 71).wait().unwrap();
        assert!(!again.inserted);
        assert_eq!(again.previous, Some(70));

        let kept = tree.try_insert(7, 72).wait().unwrap();
        assert!(!kept.inserted);
        assert_eq!(kept.cursor.value(), Some(&71));

        assert_eq!(tree.find(7).wait().unwrap().value(), Some(&71));
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_splits_grow_height() {
        let tree = small_tree();
        for key in 0..100 {
            let _ = tree.insert(key, key * 10);
        }
        let report = tree.verify().wait().unwrap();
        assert!(report.is_ok(), "{report}");
        assert_eq!(report.size, 100);
        assert!(tree.height() >= 3);
        assert_eq!(tree.size(), 100);
    }

    #[test]
    fn test_insert_many_dedups_unsorted_input() {
        let tree = small_tree();
        let added = tree
            .insert_many(vec![(3, 1), (1, 1), (3, 2), (2, 1)], false)
            .wait()
            .unwrap();
        assert_eq!(added, 3);
        assert_eq!(tree.find(3).wait().unwrap().value(), Some(&2));
    }

    #[test]
    #[should_panic(expected = "not strictly increasing")]
    fn test_insert_many_rejects_repeated_sorted_keys() {
        let tree = small_tree();
        let _ = tree.insert_many(vec![(1, 1), (2, 2), (2, 3)], true);
    }

    #[test]
    fn test_false_sorted_hint_leaves_tree_running() {
        let tree = small_tree();
        tree.insert(1, 10).wait().unwrap();

        let rejected = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = tree.insert_many(vec![(3, 3), (2, 2)], true);
        }));
        assert!(rejected.is_err());

        tree.insert(2, 20).wait().unwrap();
        assert_eq!(tree.find(1).wait().unwrap().value(), Some(&10));
        assert_eq!(tree.find(2).wait().unwrap().value(), Some(&20));
        assert_eq!(tree.find(3).wait().unwrap(), Cursor::End);
        assert_eq!(tree.size(), 2);
    }

    #[test]
    fn test_bounds_and_equal_range() {
        let tree = small_tree();
        tree.insert_many((0..50).map(|k| (k * 2, k)), true)
            .wait()
            .unwrap();

        assert_eq!(tree.lower_bound(9).wait().unwrap().key(), Some(&10));
        assert_eq!(tree.lower_bound(10).wait().unwrap().key(), Some(&10));
        assert_eq!(tree.upper_bound(10).wait().unwrap().key(), Some(&12));
        assert_eq!(tree.upper_bound(98).wait().unwrap(), Cursor::End);

        let (lower, upper) = tree.equal_range(20).wait().unwrap();
        assert_eq!(lower.key(), Some(&20));
        assert_eq!(upper.key(), Some(&22));

        let (lower, upper) = tree.equal_range(21).wait().unwrap();
        assert_eq!(lower.key(), Some(&22));
        assert_eq!(upper.key(), Some(&22));
    }

    #[test]
    fn test_next_and_prev_walk() {
        let tree = small_tree();
        tree.insert_many((1..=20).map(|k| (k, k)), true)
            .wait()
            .unwrap();

        let mut cursor = tree.begin().wait().unwrap();
        let mut seen = Vec::new();
        while let Some(&key) = cursor.key() {
            seen.push(key);
            cursor = tree.next(cursor).wait().unwrap();
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());

        let last = tree.prev(Cursor::End).wait().unwrap();
        assert_eq!(last.key(), Some(&20));
        let first = tree.find(1).wait().unwrap();
        assert_eq!(tree.prev(first).wait().unwrap(), Cursor::End);
    }

    #[test]
    fn test_stale_cursor_relocates_by_key() {
        let tree = small_tree();
        tree.insert_many((0..30).map(|k| (k * 10, k)), true)
            .wait()
            .unwrap();
        let cursor = tree.find(100).wait().unwrap();

        // Shift entries around the cursor's leaf.
        let _ = tree.insert(95, 0);
        let _ = tree.erase(110);

        assert_eq!(tree.next(cursor.clone()).wait().unwrap().key(), Some(&120));
        assert_eq!(tree.prev(cursor).wait().unwrap().key(), Some(&95));
    }

    #[test]
    fn test_erase_at_cursor() {
        let tree = small_tree();
        tree.insert_many((0..10).map(|k| (k, k * 3)), true)
            .wait()
            .unwrap();
        let cursor = tree.find(4).wait().unwrap();
        assert_eq!(tree.erase_at(cursor).wait().unwrap(), Some(12));
        assert_eq!(tree.find(4).wait().unwrap(), Cursor::End);
        assert_eq!(tree.size(), 9);
    }

    #[test]
    fn test_erase_end_cursor_stops_engine() {
        let tree = small_tree();
        assert!(matches!(
            tree.erase_at(Cursor::End).wait(),
            Err(EngineError::Stopped)
        ));
        assert!(matches!(tree.find(1).wait(), Err(EngineError::Stopped)));
    }

    #[test]
    fn test_clear_resets_tree() {
        let tree = small_tree();
        tree.insert_many((0..200).map(|k| (k, k)), true)
            .wait()
            .unwrap();
        assert!(tree.height() > 1);

        assert_eq!(tree.erase_range(..).wait().unwrap(), 200);
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert!(tree.verify().wait().unwrap().is_ok());

        let _ = tree.insert(5, 5);
        assert_eq!(tree.find(5).wait().unwrap().value(), Some(&5));
    }

    #[test]
    fn test_open_rejects_mismatched_device() {
        let device: Arc<dyn BlockDevice> = Arc::new(MemoryBlockDevice::new(512));
        let error = BTree::<u64, u64>::open(&TreeConfig::default(), device).unwrap_err();
        assert!(matches!(
            error,
            EngineError::Config(ConfigError::BlockSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_open_rejects_block_too_small_for_entries() {
        let config = TreeConfig::default().with_block_size(64);
        let error = BTree::<[u8; 32], [u8; 32]>::in_memory(&config).unwrap_err();
        assert!(matches!(error, EngineError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_large_block_fan_out_is_capped() {
        let config = TreeConfig::default()
            .with_block_size(1 << 20)
            .with_cache_capacity(4, 4);
        let tree = BTree::<u32, u32>::in_memory(&config).unwrap();
        assert_eq!(tree.leaf_fan_out(), MAX_FAN_OUT);
        assert_eq!(tree.internal_fan_out(), MAX_FAN_OUT);

        let entries: Vec<(u32, u32)> = (0..70_000).map(|k| (k, k)).collect();
        assert_eq!(tree.insert_many(entries, true).wait().unwrap(), 70_000);
        assert_eq!(tree.height(), 2);
        assert_eq!(tree.find(69_999).wait().unwrap().value(), Some(&69_999));

        let report = tree.verify().wait().unwrap();
        assert!(report.is_ok(), "{report}");
        assert_eq!(report.size, 70_000);
    }

    #[test]
    fn test_close_flushes() {
        let tree = small_tree();
        let _ = tree.insert(1, 1);
        tree.close().unwrap();
    }

    #[test]
    fn test_dedup_keep_last() {
        let deduped = dedup_keep_last(vec![(1, 'a'), (1, 'b'), (2, 'c'), (3, 'd'), (3, 'e')]);
        assert_eq!(deduped, vec![(1, 'b'), (2, 'c'), (3, 'e')]);
    }
}
