//! Single and bulk insertion.
//!
//! Both descend to the target leaf, lowering first separators on the way
//! when the new key is smaller than everything below them. A leaf that
//! overflows is split; the new right node's separator is then absorbed level
//! by level (`Promotion`), splitting internal nodes as needed, and a root
//! split grows the tree by one level. Bulk insertion keeps its descent
//! between leaves and only climbs as far as the next entry requires.

use tracing::debug;

use crate::btree::cache::CachedNode;
use crate::btree::codec::{Key, Value};
use crate::btree::cursor::Cursor;
use crate::btree::engine::{Engine, LeafHandle, Suspend};
use crate::btree::machine::search::position;
use crate::btree::machine::{Descent, Reply, Route};
use crate::btree::node::{DuplicatePolicy, Inserted, NodeStore};
use crate::storage::BlockId;

/// Outcome of a single insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertResult<K, V> {
    /// Position of the key after the insert.
    pub cursor: Cursor<K, V>,
    /// The value that was overwritten, if any.
    pub previous: Option<V>,
    /// Whether a new entry was added.
    pub inserted: bool,
}

/// A split whose right half still has to be linked into the parent level.
#[derive(Debug)]
struct Promotion<K> {
    separator: K,
    right: BlockId,
    /// Smallest key of the left half; needed if the split node was the root.
    left_min: K,
    /// Ancestors of the split node, root first.
    path: Vec<(BlockId, usize)>,
}

impl<K: Key> Promotion<K> {
    /// Absorb the promoted entry one level up.
    ///
    /// Returns `true` once no further split is pending.
    fn step<V: Value>(&mut self, engine: &mut Engine<K, V>) -> Result<bool, Suspend> {
        let Some(&(parent_block, index)) = self.path.last() else {
            let old_root = engine.root();
            let root = engine.new_internal();
            {
                let mut node = root.write();
                node.insert_at(0, self.left_min.clone(), old_root);
                node.insert_at(1, self.separator.clone(), self.right);
            }
            let height = engine.height() + 1;
            engine.set_root(root.block(), height);
            debug!(root = root.block(), height, "root split");
            return Ok(true);
        };

        let parent = engine.internal(parent_block)?;
        let successor = {
            let node = parent.read();
            match node.next() {
                Some(next) if node.len() >= node.capacity() => Some(engine.internal(next)?),
                _ => None,
            }
        };

        let mut node = parent.write();
        node.insert_at(index + 1, self.separator.clone(), self.right);
        if !node.is_overfull() {
            return Ok(true);
        }

        let right = engine.new_internal();
        let mut right_node = right.write();
        let separator = node.split(&mut right_node);
        link_after(
            &mut node,
            parent_block,
            &mut right_node,
            right.block(),
            successor.as_deref(),
        );

        self.left_min = node.key(0).clone();
        self.separator = separator;
        self.right = right.block();
        self.path.pop();
        Ok(false)
    }
}

/// Splice the freshly split `right` in after `left` on their level.
fn link_after<K: Key, P: Value>(
    left: &mut NodeStore<K, P>,
    left_block: BlockId,
    right: &mut NodeStore<K, P>,
    right_block: BlockId,
    successor: Option<&CachedNode<K, P>>,
) {
    assert_eq!(
        left.next(),
        successor.map(CachedNode::block),
        "successor of node {left_block} was not fetched before its split"
    );
    right.set_prev(Some(left_block));
    right.set_next(left.next());
    left.set_next(Some(right_block));
    if let Some(successor) = successor {
        successor.write().set_prev(Some(right_block));
    }
}

/// Split an overfull leaf, returning the promotion for its parent and the
/// new right leaf.
fn split_leaf<K: Key, V: Value>(
    engine: &mut Engine<K, V>,
    leaf: &LeafHandle<K, V>,
    successor: Option<&CachedNode<K, V>>,
    path: Vec<(BlockId, usize)>,
) -> (Promotion<K>, LeafHandle<K, V>) {
    let right = engine.new_leaf();
    let mut node = leaf.write();
    let mut right_node = right.write();
    let separator = node.split(&mut right_node);
    link_after(
        &mut node,
        leaf.block(),
        &mut right_node,
        right.block(),
        successor,
    );

    let promotion = Promotion {
        separator,
        right: right.block(),
        left_min: node.key(0).clone(),
        path,
    };
    drop(right_node);
    drop(node);
    (promotion, right)
}

/// Fetch the successor of `leaf` when adding `incoming` entries could split it.
fn successor_if_splitting<K: Key, V: Value>(
    engine: &mut Engine<K, V>,
    leaf: &LeafHandle<K, V>,
    incoming: usize,
) -> Result<Option<LeafHandle<K, V>>, Suspend> {
    let (next, may_split) = {
        let node = leaf.read();
        (node.next(), node.len() + incoming > node.capacity())
    };
    match next {
        Some(next) if may_split => Ok(Some(engine.leaf(next)?)),
        _ => Ok(None),
    }
}

#[derive(Debug)]
enum InsertPhase<K> {
    Descend(Descent<K>),
    Propagate(Promotion<K>),
}

/// Insert one entry.
#[derive(Debug)]
pub struct InsertMachine<K, V> {
    key: K,
    value: V,
    policy: DuplicatePolicy,
    phase: Option<InsertPhase<K>>,
    result: Option<InsertResult<K, V>>,
    reply: Reply<InsertResult<K, V>>,
}

impl<K: Key, V: Value> InsertMachine<K, V> {
    #[must_use]
    pub const fn new(
        key: K,
        value: V,
        policy: DuplicatePolicy,
        reply: Reply<InsertResult<K, V>>,
    ) -> Self {
        Self {
            key,
            value,
            policy,
            phase: None,
            result: None,
            reply,
        }
    }

    pub fn resume(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        let version = engine.version();
        loop {
            engine.begin_step();
            match &mut self.phase {
                None => self.phase = Some(InsertPhase::Descend(Descent::from_root(engine))),

                Some(InsertPhase::Descend(descent)) => {
                    descent.run(engine, Route::Key(&self.key), true)?;
                    let block = descent.block;
                    let leaf = engine.leaf(block)?;

                    let existing = leaf.read().find(&self.key);
                    if let (Some(index), DuplicatePolicy::Keep) = (existing, self.policy) {
                        let node = leaf.read();
                        self.result = Some(InsertResult {
                            cursor: position(&node, block, index, version),
                            previous: None,
                            inserted: false,
                        });
                        break;
                    }

                    let incoming = usize::from(existing.is_none());
                    let successor = successor_if_splitting(engine, &leaf, incoming)?;

                    let outcome = leaf.write().insert(
                        self.key.clone(),
                        self.value.clone(),
                        self.policy,
                    );
                    let index = match outcome {
                        Inserted::Replaced(index, old) => {
                            let node = leaf.read();
                            self.result = Some(InsertResult {
                                cursor: position(&node, block, index, version),
                                previous: Some(old),
                                inserted: false,
                            });
                            break;
                        }
                        Inserted::Duplicate(_) => unreachable!("kept duplicates return early"),
                        Inserted::New(index) => index,
                    };
                    engine.grow(1);

                    if !leaf.read().is_overfull() {
                        let node = leaf.read();
                        self.result = Some(InsertResult {
                            cursor: position(&node, block, index, version),
                            previous: None,
                            inserted: true,
                        });
                        break;
                    }

                    let path = std::mem::take(&mut descent.path);
                    let (promotion, right) =
                        split_leaf(engine, &leaf, successor.as_deref(), path);
                    let kept = leaf.read().len();
                    let cursor = if index < kept {
                        position(&leaf.read(), block, index, version)
                    } else {
                        position(&right.read(), right.block(), index - kept, version)
                    };
                    self.result = Some(InsertResult {
                        cursor,
                        previous: None,
                        inserted: true,
                    });
                    self.phase = Some(InsertPhase::Propagate(promotion));
                }

                Some(InsertPhase::Propagate(promotion)) => {
                    if promotion.step(engine)? {
                        break;
                    }
                }
            }
        }

        if let Some(result) = self.result.take() {
            self.reply.send(result);
        }
        Ok(())
    }
}

#[derive(Debug)]
enum BulkPhase<K> {
    Start,
    Descend(Descent<K>),
    /// The descent that reached the split leaf is kept for its bounds.
    Propagate(Promotion<K>, Descent<K>),
}

/// Insert a sorted run of entries, filling each leaf before moving on.
///
/// Existing keys are overwritten. The reply is the number of new entries.
///
/// After a leaf is filled the next entry is routed from the deepest ancestor
/// whose range still covers it: the node that absorbed the last split, or
/// the lowest common ancestor with the next leaf. Only a root split sends
/// the descent back to the root.
#[derive(Debug)]
pub struct BulkInsertMachine<K, V> {
    entries: Vec<(K, V)>,
    next: usize,
    added: u64,
    phase: BulkPhase<K>,
    reply: Reply<u64>,
}

impl<K: Key, V: Value> BulkInsertMachine<K, V> {
    /// # Pre-conditions
    /// - `entries` is strictly increasing by key
    #[must_use]
    pub const fn new(entries: Vec<(K, V)>, reply: Reply<u64>) -> Self {
        Self {
            entries,
            next: 0,
            added: 0,
            phase: BulkPhase::Start,
            reply,
        }
    }

    pub fn resume(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        loop {
            engine.begin_step();
            match &mut self.phase {
                BulkPhase::Start => {
                    debug_assert!(
                        self.entries.windows(2).all(|pair| pair[0].0 < pair[1].0),
                        "bulk insert input is not strictly sorted"
                    );
                    if self.entries.is_empty() {
                        break;
                    }
                    self.phase = BulkPhase::Descend(Descent::from_root(engine));
                }

                BulkPhase::Descend(descent) => {
                    descent.run(engine, Route::Key(&self.entries[self.next].0), true)?;
                    let leaf = engine.leaf(descent.block)?;
                    let remaining = self.entries.len() - self.next;
                    let successor = successor_if_splitting(engine, &leaf, remaining)?;

                    let mut added = 0;
                    {
                        let mut node = leaf.write();
                        while self.next < self.entries.len() && !node.is_overfull() {
                            let (key, value) = &self.entries[self.next];
                            if descent.fence.as_ref().is_some_and(|fence| key >= fence) {
                                break;
                            }
                            let outcome =
                                node.insert(key.clone(), value.clone(), DuplicatePolicy::Replace);
                            if matches!(outcome, Inserted::New(_)) {
                                added += 1;
                            }
                            self.next += 1;
                        }
                    }
                    self.added += added;
                    engine.grow(added);

                    if leaf.read().is_overfull() {
                        let path = std::mem::take(&mut descent.path);
                        let (promotion, _) =
                            split_leaf(engine, &leaf, successor.as_deref(), path);
                        self.phase = BulkPhase::Propagate(promotion, descent.clone());
                    } else if let Some((key, _)) = self.entries.get(self.next) {
                        // Stopped at the fence: the next leaf shares an ancestor.
                        let deepest = descent.path.len().saturating_sub(1);
                        descent.rewind(engine, key, deepest);
                    } else {
                        break;
                    }
                }

                BulkPhase::Propagate(promotion, descent) => {
                    if !promotion.step(engine)? {
                        continue;
                    }
                    let Some((key, _)) = self.entries.get(self.next) else {
                        break;
                    };
                    // Above the absorbing node nothing moved; a root split
                    // leaves the path empty.
                    let mut next = descent.clone();
                    next.path = std::mem::take(&mut promotion.path);
                    let deepest = next.path.len().saturating_sub(1);
                    next.rewind(engine, key, deepest);
                    self.phase = BulkPhase::Descend(next);
                }
            }
        }

        self.reply.send(self.added);
        Ok(())
    }
}
