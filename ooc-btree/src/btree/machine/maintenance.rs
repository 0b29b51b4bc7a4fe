//! Whole-tree requests: clear, structural verification and flush.

use std::fmt;

use tracing::{debug, warn};

use crate::btree::codec::{Key, Value};
use crate::btree::engine::{Engine, Suspend};
use crate::btree::machine::Reply;
use crate::storage::BlockId;

#[derive(Debug, Clone, Copy)]
enum ClearPhase {
    Start,
    /// Free `block` on `level`. `below` is the first node of the next level
    /// down, once known.
    Walk {
        block: BlockId,
        level: usize,
        below: Option<BlockId>,
    },
}

/// Frees every node level by level and installs an empty root leaf.
///
/// Replies with the number of entries the tree held.
#[derive(Debug)]
pub struct ClearMachine {
    phase: ClearPhase,
    cleared: u64,
    reply: Reply<u64>,
}

impl ClearMachine {
    #[must_use]
    pub const fn new(reply: Reply<u64>) -> Self {
        Self {
            phase: ClearPhase::Start,
            cleared: 0,
            reply,
        }
    }

    pub fn resume<K: Key, V: Value>(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        loop {
            engine.begin_step();
            match self.phase {
                ClearPhase::Start => {
                    self.cleared = engine.size();
                    self.phase = ClearPhase::Walk {
                        block: engine.root(),
                        level: engine.height(),
                        below: None,
                    };
                }

                ClearPhase::Walk {
                    block,
                    level,
                    below,
                } => {
                    let (next, below) = if level > 1 {
                        let node = engine.internal(block)?;
                        let (next, first_child) = {
                            let guard = node.read();
                            (guard.next(), *guard.payload(0))
                        };
                        engine.release_internal(node);
                        (next, below.or(Some(first_child)))
                    } else {
                        let node = engine.leaf(block)?;
                        let next = node.read().next();
                        engine.release_leaf(node);
                        (next, below)
                    };

                    self.phase = match (next, below) {
                        (Some(next), _) => ClearPhase::Walk {
                            block: next,
                            level,
                            below,
                        },
                        (None, Some(first)) => ClearPhase::Walk {
                            block: first,
                            level: level - 1,
                            below: None,
                        },
                        (None, None) => break,
                    };
                }
            }
        }

        let root = engine.new_leaf();
        engine.set_root(root.block(), 1);
        engine.reset_size();
        debug!(cleared = self.cleared, root = root.block(), "tree cleared");
        self.reply.send(self.cleared);
        Ok(())
    }
}

/// Writes back every dirty node. Replies with the number of nodes written.
#[derive(Debug)]
pub struct FlushMachine {
    reply: Reply<usize>,
}

impl FlushMachine {
    #[must_use]
    pub const fn new(reply: Reply<usize>) -> Self {
        Self { reply }
    }

    pub fn resume<K: Key, V: Value>(&mut self, engine: &mut Engine<K, V>) {
        let written = engine.flush();
        debug!(written, "flushed dirty nodes");
        self.reply.send(written);
    }
}

/// Result of a structural check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub height: usize,
    /// Entries counted in leaves.
    pub size: u64,
    pub leaves: usize,
    pub internals: usize,
    /// One line per broken invariant; empty for a sound tree.
    pub violations: Vec<String>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "height {}, {} entries in {} leaves and {} internal nodes",
            self.height, self.size, self.leaves, self.internals
        )?;
        for violation in &self.violations {
            write!(f, "\n  {violation}")?;
        }
        Ok(())
    }
}

/// A node still to be visited, with the key bounds its parent implies.
#[derive(Debug, Clone)]
struct Frame<K> {
    block: BlockId,
    level: usize,
    lower: Option<K>,
    upper: Option<K>,
}

/// Walks the whole tree depth first and checks its invariants:
///
/// - fill: non-root nodes hold between ⌈N/2⌉ and N entries; an internal root
///   has at least two children
/// - order: keys strictly increase inside every node
/// - bounds: every key lies between the separator routing to its node and
///   the next separator
/// - links: each level forms a doubly linked list in key order
/// - size: the leaf entry count matches the tracked size
#[derive(Debug)]
pub struct VerifyMachine<K> {
    stack: Option<Vec<Frame<K>>>,
    /// Per level (index = level - 1), the last node visited and its next link.
    last_seen: Vec<Option<(BlockId, Option<BlockId>)>>,
    report: VerifyReport,
    reply: Reply<VerifyReport>,
}

impl<K: Key> VerifyMachine<K> {
    #[must_use]
    pub fn new(reply: Reply<VerifyReport>) -> Self {
        Self {
            stack: None,
            last_seen: Vec::new(),
            report: VerifyReport::default(),
            reply,
        }
    }

    pub fn resume<V: Value>(&mut self, engine: &mut Engine<K, V>) -> Result<(), Suspend> {
        let stack = self.stack.get_or_insert_with(|| {
            vec![Frame {
                block: engine.root(),
                level: engine.height(),
                lower: None,
                upper: None,
            }]
        });
        if self.last_seen.is_empty() {
            self.last_seen = vec![None; engine.height()];
            self.report.height = engine.height();
        }

        while let Some(frame) = stack.last().cloned() {
            engine.begin_step();
            let is_root = frame.block == engine.root();
            let (keys, prev, next, capacity) = if frame.level > 1 {
                let node = engine.internal(frame.block)?;
                stack.pop();
                let guard = node.read();
                for (i, (separator, child)) in guard.entries().iter().enumerate().rev() {
                    stack.push(Frame {
                        block: *child,
                        level: frame.level - 1,
                        lower: Some(separator.clone()),
                        upper: guard
                            .entries()
                            .get(i + 1)
                            .map(|(k, _)| k.clone())
                            .or_else(|| frame.upper.clone()),
                    });
                }
                self.report.internals += 1;
                if is_root && guard.len() < 2 {
                    self.report.violations.push(format!(
                        "internal root {} has {} children",
                        frame.block,
                        guard.len()
                    ));
                }
                let keys: Vec<K> = guard.entries().iter().map(|(k, _)| k.clone()).collect();
                (keys, guard.prev(), guard.next(), guard.capacity())
            } else {
                let node = engine.leaf(frame.block)?;
                stack.pop();
                let guard = node.read();
                self.report.leaves += 1;
                self.report.size += guard.len() as u64;
                let keys = guard.entries().iter().map(|(k, _)| k.clone()).collect();
                (keys, guard.prev(), guard.next(), guard.capacity())
            };

            Self::check_node(&mut self.report, &frame, &keys, is_root, capacity);
            Self::check_links(&mut self.report, &mut self.last_seen, &frame, prev, next);
        }

        for (index, last) in self.last_seen.iter().enumerate() {
            if let Some((block, Some(next))) = last {
                self.report.violations.push(format!(
                    "last node {block} on level {} links forward to {next}",
                    index + 1
                ));
            }
        }
        if self.report.size != engine.size() {
            self.report.violations.push(format!(
                "leaves hold {} entries but the tree size is {}",
                self.report.size,
                engine.size()
            ));
        }
        if !self.report.is_ok() {
            warn!(violations = self.report.violations.len(), "tree verification failed");
        }

        self.reply.send(std::mem::take(&mut self.report));
        Ok(())
    }

    fn check_node(
        report: &mut VerifyReport,
        frame: &Frame<K>,
        keys: &[K],
        is_root: bool,
        capacity: usize,
    ) {
        let block = frame.block;
        if keys.len() > capacity {
            report
                .violations
                .push(format!("node {block} holds {} > {capacity} entries", keys.len()));
        }
        if !is_root && keys.len() < capacity.div_ceil(2) {
            report.violations.push(format!(
                "node {block} holds {} < {} entries",
                keys.len(),
                capacity.div_ceil(2)
            ));
        }
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            report
                .violations
                .push(format!("keys of node {block} are not strictly increasing"));
        }
        if let (Some(lower), Some(first)) = (&frame.lower, keys.first()) {
            if first < lower {
                report.violations.push(format!(
                    "node {block} holds {first:?} below its separator {lower:?}"
                ));
            }
        }
        if let (Some(upper), Some(last)) = (&frame.upper, keys.last()) {
            if last >= upper {
                report.violations.push(format!(
                    "node {block} holds {last:?} at or above the next separator {upper:?}"
                ));
            }
        }
    }

    fn check_links(
        report: &mut VerifyReport,
        last_seen: &mut [Option<(BlockId, Option<BlockId>)>],
        frame: &Frame<K>,
        prev: Option<BlockId>,
        next: Option<BlockId>,
    ) {
        let block = frame.block;
        let Some(slot) = last_seen.get_mut(frame.level - 1) else {
            report
                .violations
                .push(format!("node {block} sits on unexpected level {}", frame.level));
            return;
        };
        let expected_prev = slot.map(|(left, _)| left);
        if prev != expected_prev {
            report.violations.push(format!(
                "node {block} links back to {prev:?}, expected {expected_prev:?}"
            ));
        }
        if let Some((left, left_next)) = *slot {
            if left_next != Some(block) {
                report.violations.push(format!(
                    "node {left} links forward to {left_next:?}, expected {block}"
                ));
            }
        }
        *slot = Some((block, next));
    }
}
