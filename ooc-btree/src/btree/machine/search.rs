//! Read-only positioning: point lookup, bounds, equal range, first/last and
//! cursor stepping.

use crate::btree::codec::{Key, Value};
use crate::btree::cursor::{Cursor, Position};
use crate::btree::engine::{Engine, Suspend};
use crate::btree::lock::{KeyRange, RangeLock};
use crate::btree::machine::{Descent, Reply, Route};
use crate::btree::node::LeafNode;
use crate::storage::BlockId;

/// What a seek is looking for.
#[derive(Debug, Clone)]
pub enum SeekTarget<K, V> {
    /// The entry with exactly this key.
    Find(K),
    /// The first entry with key >= this key.
    LowerBound(K),
    /// The first entry with key > this key.
    UpperBound(K),
    /// Lower and upper bound of this key.
    EqualRange(K),
    /// The smallest entry.
    First,
    /// The largest entry.
    Last,
    /// The entry after a cursor.
    Next(Cursor<K, V>),
    /// The entry before a cursor; before `End` is the largest entry.
    Prev(Cursor<K, V>),
}

#[derive(Debug)]
enum SeekReply<K, V> {
    Cursor(Reply<Cursor<K, V>>),
    Range(Reply<(Cursor<K, V>, Cursor<K, V>)>),
}

#[derive(Debug)]
enum Phase<K> {
    Start,
    Descend(Descent<K>),
    /// Yield entry `index` of `block`, or the first entry of its successor.
    Scan { block: BlockId, index: usize },
    /// Yield the entry just before `before` (or the last entry) of `block`,
    /// or the last entry of its predecessor.
    ScanBack {
        block: BlockId,
        before: Option<usize>,
    },
    /// Resolve both bounds of an equal range from `block`.
    Pair { block: BlockId },
}

/// State machine for every read-only positioning request.
#[derive(Debug)]
pub struct SeekMachine<K, V> {
    target: SeekTarget<K, V>,
    phase: Phase<K>,
    reply: SeekReply<K, V>,
}

impl<K: Key, V: Value> SeekMachine<K, V> {
    /// A seek yielding one cursor.
    ///
    /// # Panics
    /// Panics if `target` is `EqualRange`; use `equal_range` instead.
    #[must_use]
    pub fn new(target: SeekTarget<K, V>, reply: Reply<Cursor<K, V>>) -> Self {
        assert!(
            !matches!(target, SeekTarget::EqualRange(_)),
            "equal range seeks yield two cursors"
        );
        Self {
            target,
            phase: Phase::Start,
            reply: SeekReply::Cursor(reply),
        }
    }

    /// A seek yielding the lower and upper bound of `key`.
    #[must_use]
    pub const fn equal_range(key: K, reply: Reply<(Cursor<K, V>, Cursor<K, V>)>) -> Self {
        Self {
            target: SeekTarget::EqualRange(key),
            phase: Phase::Start,
            reply: SeekReply::Range(reply),
        }
    }

    #[must_use]
    pub fn lock(&self) -> RangeLock<K> {
        let range = match &self.target {
            SeekTarget::Find(key) => KeyRange::point(key.clone()),
            SeekTarget::LowerBound(key)
            | SeekTarget::UpperBound(key)
            | SeekTarget::EqualRange(key)
            | SeekTarget::Next(Cursor::At(Position { key, .. })) => KeyRange::tail(key.clone()),
            SeekTarget::Prev(Cursor::At(Position { key, .. })) => KeyRange::head(key.clone()),
            SeekTarget::First
            | SeekTarget::Last
            | SeekTarget::Next(Cursor::End)
            | SeekTarget::Prev(Cursor::End) => KeyRange::all(),
        };
        RangeLock::shared(range)
    }

    pub fn resume(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        loop {
            engine.begin_step();
            if self.step(engine)? {
                return Ok(());
            }
        }
    }

    /// Run one phase. Returns `true` once the reply has been sent.
    fn step(&mut self, engine: &mut Engine<K, V>) -> Result<bool, Suspend> {
        let version = engine.version();
        match &mut self.phase {
            Phase::Start => {
                assert!(
                    !matches!(self.target, SeekTarget::Next(Cursor::End)),
                    "cannot advance the end cursor"
                );
                if engine.is_empty() {
                    self.finish(Cursor::End, Cursor::End);
                    return Ok(true);
                }

                self.phase = match &self.target {
                    SeekTarget::Next(Cursor::At(pos)) if pos.version == version => Phase::Scan {
                        block: pos.leaf,
                        index: pos.index + 1,
                    },
                    SeekTarget::Prev(Cursor::At(pos)) if pos.version == version => {
                        Phase::ScanBack {
                            block: pos.leaf,
                            before: Some(pos.index),
                        }
                    }
                    _ => Phase::Descend(Descent::from_root(engine)),
                };
                Ok(false)
            }

            Phase::Descend(descent) => {
                let route = match &self.target {
                    SeekTarget::Find(key)
                    | SeekTarget::LowerBound(key)
                    | SeekTarget::UpperBound(key)
                    | SeekTarget::EqualRange(key)
                    | SeekTarget::Next(Cursor::At(Position { key, .. }))
                    | SeekTarget::Prev(Cursor::At(Position { key, .. })) => Route::Key(key),
                    SeekTarget::First => Route::First,
                    SeekTarget::Last | SeekTarget::Next(Cursor::End) | SeekTarget::Prev(Cursor::End) => {
                        Route::Last
                    }
                };
                descent.run(engine, route, false)?;

                let block = descent.block;
                let leaf = engine.leaf(block)?;
                let node = leaf.read();
                let next_phase = match &self.target {
                    SeekTarget::Find(key) => {
                        let found = node
                            .find(key)
                            .map_or(Cursor::End, |i| position(&node, block, i, version));
                        drop(node);
                        self.finish(found, Cursor::End);
                        return Ok(true);
                    }
                    SeekTarget::LowerBound(key) => Phase::Scan {
                        block,
                        index: node.lower_bound(key),
                    },
                    SeekTarget::UpperBound(key)
                    | SeekTarget::Next(Cursor::At(Position { key, .. })) => Phase::Scan {
                        block,
                        index: node.upper_bound(key),
                    },
                    SeekTarget::EqualRange(_) => Phase::Pair { block },
                    SeekTarget::First => Phase::Scan { block, index: 0 },
                    SeekTarget::Last | SeekTarget::Next(Cursor::End) | SeekTarget::Prev(Cursor::End) => {
                        Phase::ScanBack {
                            block,
                            before: None,
                        }
                    }
                    SeekTarget::Prev(Cursor::At(Position { key, .. })) => Phase::ScanBack {
                        block,
                        before: Some(node.lower_bound(key)),
                    },
                };
                drop(node);
                self.phase = next_phase;
                Ok(false)
            }

            Phase::Scan { block, index } => {
                let (block, index) = (*block, *index);
                let leaf = engine.leaf(block)?;
                let node = leaf.read();
                if index < node.len() {
                    let found = position(&node, block, index, version);
                    drop(node);
                    self.finish(found, Cursor::End);
                    return Ok(true);
                }
                match node.next() {
                    Some(next) => {
                        drop(node);
                        self.phase = Phase::Scan {
                            block: next,
                            index: 0,
                        };
                        Ok(false)
                    }
                    None => {
                        drop(node);
                        self.finish(Cursor::End, Cursor::End);
                        Ok(true)
                    }
                }
            }

            Phase::ScanBack { block, before } => {
                let (block, before) = (*block, *before);
                let leaf = engine.leaf(block)?;
                let node = leaf.read();
                let end = before.unwrap_or(node.len()).min(node.len());
                if end > 0 {
                    let found = position(&node, block, end - 1, version);
                    drop(node);
                    self.finish(found, Cursor::End);
                    return Ok(true);
                }
                match node.prev() {
                    Some(prev) => {
                        drop(node);
                        self.phase = Phase::ScanBack {
                            block: prev,
                            before: None,
                        };
                        Ok(false)
                    }
                    None => {
                        drop(node);
                        self.finish(Cursor::End, Cursor::End);
                        Ok(true)
                    }
                }
            }

            Phase::Pair { block } => {
                let block = *block;
                let SeekTarget::EqualRange(key) = &self.target else {
                    unreachable!("pair phase only follows an equal range descent");
                };
                let leaf = engine.leaf(block)?;
                let node = leaf.read();
                let lower = node.lower_bound(key);
                let upper = node.upper_bound(key);

                let spill = match node.next() {
                    Some(next) if upper >= node.len() => {
                        let successor = engine.leaf(next)?;
                        let successor_node = successor.read();
                        position(&successor_node, next, 0, version)
                    }
                    _ => Cursor::End,
                };

                let bound = |index: usize| {
                    if index < node.len() {
                        position(&node, block, index, version)
                    } else {
                        spill.clone()
                    }
                };
                let range = (bound(lower), bound(upper));
                drop(node);
                self.finish(range.0, range.1);
                Ok(true)
            }
        }
    }

    fn finish(&mut self, first: Cursor<K, V>, second: Cursor<K, V>) {
        match &mut self.reply {
            SeekReply::Cursor(reply) => reply.send(first),
            SeekReply::Range(reply) => reply.send((first, second)),
        }
    }
}

pub(super) fn position<K: Key, V: Value>(
    node: &LeafNode<K, V>,
    block: BlockId,
    index: usize,
    version: u64,
) -> Cursor<K, V> {
    Cursor::At(Position {
        leaf: block,
        index,
        key: node.key(index).clone(),
        value: node.payload(index).clone(),
        version,
    })
}
