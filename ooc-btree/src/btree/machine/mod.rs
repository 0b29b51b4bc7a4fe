//! Operation state machines.
//!
//! Every request is a machine pinned to one request id. `resume` advances the
//! machine until it completes or a node fetch misses. A miss returns
//! `Suspend`; the dispatcher parks the machine and calls `resume` again once
//! the read has completed.
//!
//! Each step fetches every node it needs before it mutates anything, so a step
//! interrupted by a miss can simply run again from its saved phase.

mod erase;
mod insert;
mod maintenance;
mod search;

pub use erase::EraseMachine;
pub use insert::{BulkInsertMachine, InsertMachine, InsertResult};
pub use maintenance::{ClearMachine, FlushMachine, VerifyMachine, VerifyReport};
pub use search::{SeekMachine, SeekTarget};

use tokio::sync::oneshot;

use crate::btree::codec::{Key, Value};
use crate::btree::engine::{Engine, Suspend};
use crate::btree::lock::{KeyRange, RangeLock};
use crate::storage::BlockId;

/// One-shot output channel of a request.
#[derive(Debug)]
pub struct Reply<T>(Option<oneshot::Sender<T>>);

impl<T> Reply<T> {
    #[must_use]
    pub const fn new(tx: oneshot::Sender<T>) -> Self {
        Self(Some(tx))
    }

    /// Deliver the result. Later calls are ignored.
    pub fn send(&mut self, value: T) {
        if let Some(tx) = self.0.take() {
            // The caller may have dropped its completion handle.
            let _ = tx.send(value);
        }
    }
}

/// Any request the engine can run.
pub enum Machine<K: Key, V: Value> {
    Seek(SeekMachine<K, V>),
    Insert(InsertMachine<K, V>),
    BulkInsert(BulkInsertMachine<K, V>),
    Erase(EraseMachine<K, V>),
    Clear(ClearMachine),
    Verify(VerifyMachine<K>),
    Flush(FlushMachine),
}

impl<K: Key, V: Value> Machine<K, V> {
    /// Advance until completion or the next cache miss.
    pub fn resume(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        match self {
            Self::Seek(m) => m.resume(engine),
            Self::Insert(m) => m.resume(engine),
            Self::BulkInsert(m) => m.resume(engine),
            Self::Erase(m) => m.resume(engine),
            Self::Clear(m) => m.resume(engine),
            Self::Verify(m) => m.resume(engine),
            Self::Flush(m) => {
                m.resume(engine);
                Ok(())
            }
        }
    }

    /// The lock this request must hold while it runs.
    #[must_use]
    pub fn lock(&self) -> RangeLock<K> {
        match self {
            Self::Seek(m) => m.lock(),
            Self::Verify(_) => RangeLock::shared(KeyRange::all()),
            Self::Insert(_)
            | Self::BulkInsert(_)
            | Self::Erase(_)
            | Self::Clear(_)
            | Self::Flush(_) => RangeLock::exclusive(KeyRange::all()),
        }
    }

    /// Whether running this request can move entries between positions.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Insert(_) | Self::BulkInsert(_) | Self::Erase(_) | Self::Clear(_)
        )
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Seek(_) => "seek",
            Self::Insert(_) => "insert",
            Self::BulkInsert(_) => "bulk_insert",
            Self::Erase(_) => "erase",
            Self::Clear(_) => "clear",
            Self::Verify(_) => "verify",
            Self::Flush(_) => "flush",
        }
    }
}

/// How a descent chooses the child at each internal node.
#[derive(Debug, Clone, Copy)]
pub enum Route<'a, K> {
    /// The child whose subtree would hold this key.
    Key(&'a K),
    /// The leftmost child.
    First,
    /// The rightmost child.
    Last,
}

/// Progress of a root-to-leaf descent.
///
/// `path` records, for every internal node passed, its block and the child
/// index taken. Addresses are kept rather than handles so a suspended
/// descent retains nothing but its pins.
#[derive(Debug, Clone)]
pub struct Descent<K> {
    pub block: BlockId,
    pub level: usize,
    pub path: Vec<(BlockId, usize)>,
    /// Smallest separator to the right of the path: every key in the
    /// reached leaf is below it.
    pub fence: Option<K>,
    /// Upper bound of each node on `path`, in the same order.
    pub bounds: Vec<Option<K>>,
}

impl<K: Key> Descent<K> {
    pub fn from_root<V: Value>(engine: &Engine<K, V>) -> Self {
        Self {
            block: engine.root(),
            level: engine.height(),
            path: Vec::with_capacity(engine.height()),
            fence: None,
            bounds: Vec::with_capacity(engine.height()),
        }
    }

    /// Continue from the deepest node on the path, no deeper than `deepest`,
    /// whose subtree still covers `key`, instead of from the root.
    ///
    /// Falls back to the root when the path is empty.
    ///
    /// # Pre-conditions
    /// - `path` and `bounds` describe nodes that still exist with unchanged
    ///   upper bounds down to `deepest`, and the height has not changed since
    ///   they were recorded
    /// - `key` is not below the lower bound of any node on the path
    pub fn rewind<V: Value>(&mut self, engine: &Engine<K, V>, key: &K, deepest: usize) {
        let Some(last) = self.path.len().checked_sub(1) else {
            *self = Self::from_root(engine);
            return;
        };
        let depth = (0..=deepest.min(last))
            .rev()
            .find(|&depth| self.bounds[depth].as_ref().is_none_or(|bound| key < bound))
            .unwrap_or(0);

        self.block = self.path[depth].0;
        self.level = engine.height() - depth;
        self.fence = self.bounds[depth].clone();
        self.path.truncate(depth);
        self.bounds.truncate(depth);
    }

    /// Walk down until `block` is a leaf.
    ///
    /// With `tighten`, a key smaller than every separator lowers the first
    /// separator of each node it passes, keeping separators lower bounds of
    /// their subtrees once the key is inserted.
    ///
    /// # Pre-conditions
    /// - Nothing fetched earlier in the current step is still needed: the
    ///   pins of each level are dropped once the descent moves below it
    pub fn run<V: Value>(
        &mut self,
        engine: &mut Engine<K, V>,
        route: Route<'_, K>,
        tighten: bool,
    ) -> Result<(), Suspend> {
        while self.level > 1 {
            let node = engine.internal(self.block)?;
            let bound = self.fence.clone();
            let (index, child, lowers_first) = {
                let guard = node.read();
                let index = match route {
                    Route::Key(key) => guard.child_index(key),
                    Route::First => 0,
                    Route::Last => guard.len() - 1,
                };
                if let Some((upper, _)) = guard.entries().get(index + 1) {
                    self.fence = Some(upper.clone());
                }
                let lowers_first =
                    matches!(route, Route::Key(key) if tighten && index == 0 && key < guard.key(0));
                (index, *guard.payload(index), lowers_first)
            };

            if lowers_first {
                if let Route::Key(key) = route {
                    node.write().set_key(0, key.clone());
                }
            }

            self.path.push((self.block, index));
            self.bounds.push(bound);
            self.block = child;
            self.level -= 1;
            drop(node);
            engine.begin_step();
        }
        Ok(())
    }
}
