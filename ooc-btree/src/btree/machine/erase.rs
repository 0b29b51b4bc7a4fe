//! Erasure of single keys and key ranges.
//!
//! Erasing works one leaf at a time. The matching run of entries is removed
//! from the leaf the range start routes to. When the leaf's smallest key was
//! removed, ancestors whose separator was that key take the new smallest one.
//! If the leaf then drops below minimum fill it either borrows from a sibling
//! or is merged with it, and a merge that leaves the parent underfull repairs
//! the parent the same way. A root left with a single child is replaced by
//! that child. Ranges spanning more than one leaf repeat the round, routed
//! by the last removed key.

use std::ops::Bound;
use std::sync::Arc;

use tracing::debug;

use crate::btree::cache::CachedNode;
use crate::btree::codec::{Key, Value};
use crate::btree::cursor::Cursor;
use crate::btree::engine::{Engine, InternalHandle, Suspend};
use crate::btree::lock::KeyRange;
use crate::btree::machine::{Descent, Reply, Route};
use crate::storage::BlockId;

#[derive(Debug)]
enum EraseReply<V> {
    /// Number of entries removed.
    Count(Reply<u64>),
    /// The removed value of a single-key erase.
    Value(Reply<Option<V>>),
}

#[derive(Debug)]
enum Phase<K> {
    Start,
    Seek(Descent<K>),
    /// Carry a leaf's new smallest key into the ancestors that held the
    /// removed one, walking up from `path[upto - 1]`.
    ReplaceKey {
        path: Vec<(BlockId, usize)>,
        leaf: BlockId,
        upto: usize,
        old: K,
        new: K,
    },
    /// Restore minimum fill of `leaf` after a removal.
    Repair {
        path: Vec<(BlockId, usize)>,
        leaf: BlockId,
    },
    /// Ancestors of a node that lost an entry; the last one may be underfull.
    Rebalance(Vec<(BlockId, usize)>),
    Collapse,
}

/// Removes every entry whose key lies in a range.
#[derive(Debug)]
pub struct EraseMachine<K, V> {
    range: KeyRange<K>,
    /// Built from the end cursor; a contract violation once run.
    at_end: bool,
    /// Key the next round descends by; `None` routes to the first leaf.
    route: Option<K>,
    /// Whether matching entries may remain past the last handled leaf.
    more: bool,
    removed: u64,
    taken: Option<V>,
    phase: Phase<K>,
    reply: EraseReply<V>,
}

impl<K: Key, V: Value> EraseMachine<K, V> {
    /// Erase every entry in `range`, replying with the number removed.
    #[must_use]
    pub const fn new(range: KeyRange<K>, reply: Reply<u64>) -> Self {
        Self::with_reply(range, EraseReply::Count(reply))
    }

    /// Erase `key`, replying with its value if it was present.
    #[must_use]
    pub fn key(key: K, reply: Reply<Option<V>>) -> Self {
        Self::with_reply(KeyRange::point(key), EraseReply::Value(reply))
    }

    /// Erase the entry a cursor points at.
    ///
    /// A cursor from an older tree version is re-located by its key. Running
    /// the request with the end cursor panics.
    #[must_use]
    pub fn at(cursor: Cursor<K, V>, reply: Reply<Option<V>>) -> Self {
        match cursor.into_entry() {
            Some((key, _)) => Self::key(key, reply),
            None => Self {
                at_end: true,
                ..Self::with_reply(KeyRange::all(), EraseReply::Value(reply))
            },
        }
    }

    const fn with_reply(range: KeyRange<K>, reply: EraseReply<V>) -> Self {
        Self {
            range,
            at_end: false,
            route: None,
            more: false,
            removed: 0,
            taken: None,
            phase: Phase::Start,
            reply,
        }
    }

    pub fn resume(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        loop {
            engine.begin_step();
            match &mut self.phase {
                Phase::Start => {
                    assert!(!self.at_end, "cannot erase the end cursor");
                    if engine.is_empty() {
                        break;
                    }
                    self.route = match self.range.start() {
                        Bound::Included(key) | Bound::Excluded(key) => Some(key.clone()),
                        Bound::Unbounded => None,
                    };
                    self.phase = Phase::Seek(Descent::from_root(engine));
                }

                Phase::Seek(descent) => {
                    let route = self.route.as_ref().map_or(Route::First, Route::Key);
                    descent.run(engine, route, false)?;
                    let leaf = engine.leaf(descent.block)?;

                    let (start, end, len, next) = {
                        let node = leaf.read();
                        let start = match self.range.start() {
                            Bound::Included(key) => node.lower_bound(key),
                            Bound::Excluded(key) => node.upper_bound(key),
                            Bound::Unbounded => 0,
                        };
                        let end = start
                            + node.entries()[start..]
                                .iter()
                                .take_while(|(key, _)| !self.range.is_past_end(key))
                                .count();
                        (start, end, node.len(), node.next())
                    };

                    if start == end {
                        let onward = match next {
                            Some(next) if end == len => engine
                                .leaf(next)?
                                .read()
                                .first_key()
                                .filter(|key| self.range.contains(key))
                                .cloned(),
                            _ => None,
                        };
                        let Some(key) = onward else { break };
                        self.route = Some(key);
                        self.phase = Phase::Seek(Descent::from_root(engine));
                        continue;
                    }

                    let block = descent.block;
                    let path = std::mem::take(&mut descent.path);
                    let (first_removed, new_first) = {
                        let mut node = leaf.write();
                        let first_removed = (start == 0).then(|| node.key(0).clone());
                        self.route = Some(node.key(end - 1).clone());
                        if end - start == 1 {
                            self.taken = Some(node.remove_at(start).1);
                        } else {
                            node.erase(start..end);
                        }
                        (first_removed, node.first_key().cloned())
                    };

                    let count = (end - start) as u64;
                    self.removed += count;
                    engine.shrink(count);
                    self.more = end == len && next.is_some();

                    self.phase = match (first_removed, new_first) {
                        (Some(old), Some(new)) if !path.is_empty() => Phase::ReplaceKey {
                            upto: path.len(),
                            path,
                            leaf: block,
                            old,
                            new,
                        },
                        _ => Phase::Repair { path, leaf: block },
                    };
                }

                Phase::ReplaceKey {
                    path,
                    leaf,
                    upto,
                    old,
                    new,
                } => {
                    let (block, index) = path[*upto - 1];
                    let node = engine.internal(block)?;
                    let replaced = *node.read().key(index) == *old;
                    if replaced {
                        node.write().set_key(index, new.clone());
                    }
                    if replaced && index == 0 && *upto > 1 {
                        *upto -= 1;
                    } else {
                        self.phase = Phase::Repair {
                            path: std::mem::take(path),
                            leaf: *leaf,
                        };
                    }
                }

                Phase::Repair { path, leaf } => {
                    let Some(&parent) = path.last() else {
                        self.phase = Phase::Collapse;
                        continue;
                    };
                    let node = engine.leaf(*leaf)?;
                    let (len, underfull) = {
                        let guard = node.read();
                        (guard.len(), guard.is_underfull())
                    };
                    if !underfull {
                        self.phase = Phase::Collapse;
                        continue;
                    }

                    let repair = Repair::plan(engine, Engine::leaf, &node, len, parent)?;
                    drop(node);
                    self.phase = match repair.apply() {
                        Some(freed) => {
                            engine.release_leaf(freed);
                            Phase::Rebalance(std::mem::take(path))
                        }
                        None => Phase::Collapse,
                    };
                }

                Phase::Rebalance(path) => {
                    let depth = path.len();
                    if depth < 2 {
                        self.phase = Phase::Collapse;
                        continue;
                    }
                    let (block, _) = path[depth - 1];
                    let parent = path[depth - 2];

                    let node = engine.internal(block)?;
                    let (len, underfull) = {
                        let guard = node.read();
                        (guard.len(), guard.is_underfull())
                    };
                    if !underfull {
                        self.phase = Phase::Collapse;
                        continue;
                    }

                    let repair = Repair::plan(engine, Engine::internal, &node, len, parent)?;
                    drop(node);
                    if let Some(freed) = repair.apply() {
                        engine.release_internal(freed);
                        path.pop();
                    } else {
                        self.phase = Phase::Collapse;
                    }
                }

                Phase::Collapse => {
                    if engine.height() > 1 {
                        let root = engine.internal(engine.root())?;
                        let only_child = {
                            let guard = root.read();
                            (guard.len() == 1).then(|| *guard.payload(0))
                        };
                        if let Some(child) = only_child {
                            let height = engine.height() - 1;
                            engine.release_internal(root);
                            engine.set_root(child, height);
                            debug!(root = child, height, "root collapsed");
                            continue;
                        }
                    }

                    if !self.more {
                        break;
                    }
                    self.more = false;
                    self.phase = Phase::Seek(Descent::from_root(engine));
                }
            }
        }

        match &mut self.reply {
            EraseReply::Count(reply) => reply.send(self.removed),
            EraseReply::Value(reply) => reply.send(self.taken.take()),
        }
        Ok(())
    }
}

/// Everything needed to fix an underfull node, fetched before any change.
struct Repair<K, P> {
    parent: InternalHandle<K>,
    /// Position of `node` in `parent`.
    index: usize,
    node: Arc<CachedNode<K, P>>,
    sibling: Arc<CachedNode<K, P>>,
    sibling_is_left: bool,
    /// Successor of the right node of the pair, whose back link changes on
    /// a merge.
    beyond: Option<Arc<CachedNode<K, P>>>,
}

impl<K: Key, P: Value> Repair<K, P> {
    /// Fetch the parent and sibling of `node`, which holds `remaining`
    /// entries.
    ///
    /// The left sibling is preferred; the first child uses its right one.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    fn plan<V: Value>(
        engine: &mut Engine<K, V>,
        fetch: fn(&mut Engine<K, V>, BlockId) -> Result<Arc<CachedNode<K, P>>, Suspend>,
        node: &Arc<CachedNode<K, P>>,
        remaining: usize,
        (parent_block, index): (BlockId, usize),
    ) -> Result<Self, Suspend> {
        let parent = engine.internal(parent_block)?;
        let (sibling_block, sibling_is_left) = {
            let guard = parent.read();
            assert!(
                guard.len() >= 2,
                "node {parent_block} has a single child outside the root"
            );
            if index > 0 {
                (*guard.payload(index - 1), true)
            } else {
                (*guard.payload(index + 1), false)
            }
        };
        let sibling = fetch(engine, sibling_block)?;

        let (merges, right_next) = {
            let guard = sibling.read();
            let merges = guard.len() + remaining <= guard.capacity();
            let right_next = if sibling_is_left {
                node.read().next()
            } else {
                guard.next()
            };
            (merges, right_next)
        };
        let beyond = match right_next {
            Some(block) if merges => Some(fetch(engine, block)?),
            _ => None,
        };

        Ok(Self {
            parent,
            index,
            node: Arc::clone(node),
            sibling,
            sibling_is_left,
            beyond,
        })
    }

    /// Borrow from the sibling or merge with it.
    ///
    /// After a merge the right node of the pair is empty and unlinked; it is
    /// returned for the caller to release, and the parent has lost its entry.
    fn apply(self) -> Option<Arc<CachedNode<K, P>>> {
        let Self {
            parent,
            index,
            node,
            sibling,
            sibling_is_left,
            beyond,
        } = self;
        let (left, right, right_index) = if sibling_is_left {
            (sibling, node, index)
        } else {
            (node, sibling, index + 1)
        };

        let mut parent_node = parent.write();
        let mut left_node = left.write();
        let mut right_node = right.write();

        if left_node.len() + right_node.len() > left_node.capacity() {
            if sibling_is_left {
                right_node.steal_left(&mut left_node);
            } else {
                left_node.steal_right(&mut right_node);
            }
            parent_node.set_key(right_index, right_node.key(0).clone());
            return None;
        }

        left_node.merge(&mut right_node);
        left_node.set_next(right_node.next());
        if let Some(beyond) = beyond {
            beyond.write().set_prev(Some(left.block()));
        }
        parent_node.remove_at(right_index);

        drop(right_node);
        drop(left_node);
        drop(parent_node);
        Some(right)
    }
}
