//! Node stores and their block format.
//!
//! A node store is a fixed-capacity sorted array of entries that occupies one
//! storage block. Leaves hold `(key, value)` entries; internal nodes hold
//! `(separator key, child block)` entries where the separator is a lower bound
//! for every key in that child's subtree. Every node knows the block addresses
//! of its predecessor and successor on the same level.
//!
//! Block layout:
//! - `kind`: 1 byte (0x10 = internal, 0x11 = leaf)
//! - `flags`: 1 byte (reserved)
//! - `count`: 2 bytes
//! - `checksum`: 4 bytes (CRC32 of the block with this field zeroed)
//! - `prev`: 8 bytes (`u64::MAX` if none)
//! - `next`: 8 bytes (`u64::MAX` if none)
//! - entries: `count` fixed-width `(key, payload)` pairs
//!
//! Total header: 24 bytes

#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;
use std::ops::Range;

use crate::btree::codec::BlockCodec;
use crate::storage::BlockId;

/// Size of the node header in bytes.
pub const NODE_HEADER_SIZE: usize = 24;

/// Smallest usable fan-out. Below this a split cannot leave two half-full nodes.
pub const MIN_FAN_OUT: usize = 3;

/// Largest fan-out the two-byte entry count can describe.
#[allow(clippy::cast_lossless)]
pub const MAX_FAN_OUT: usize = u16::MAX as usize;

/// Encoded value of an absent sibling link.
const NO_LINK: u64 = u64::MAX;

/// Node kind discriminant stored in the first byte of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Internal = 0x10,
    Leaf = 0x11,
}

impl TryFrom<u8> for NodeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(Self::Internal),
            0x11 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// Outcome of inserting into a node.
#[derive(Debug, PartialEq, Eq)]
pub enum Inserted<P> {
    /// A new entry was added at this position.
    New(usize),
    /// An existing entry was overwritten; holds the previous payload.
    Replaced(usize, P),
    /// The key already existed and was left untouched.
    Duplicate(usize),
}

impl<P> Inserted<P> {
    /// Position of the key after the insert.
    pub const fn position(&self) -> usize {
        match self {
            Self::New(i) | Self::Replaced(i, _) | Self::Duplicate(i) => *i,
        }
    }
}

/// What to do when inserting a key that is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Overwrite the stored payload.
    Replace,
    /// Keep the stored payload and report a duplicate.
    Keep,
}

/// A sorted, fixed-capacity node occupying one block.
///
/// # Invariants
/// - `entries` is strictly sorted by key
/// - `entries.len() <= capacity` whenever the node is encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStore<K, P> {
    kind: NodeKind,
    capacity: usize,
    entries: Vec<(K, P)>,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

/// A leaf node: keys and values.
pub type LeafNode<K, V> = NodeStore<K, V>;

/// An internal node: separator keys and child block addresses.
pub type InternalNode<K> = NodeStore<K, BlockId>;

impl<K, P> NodeStore<K, P>
where
    K: BlockCodec + Ord + Clone,
    P: BlockCodec,
{
    /// Create an empty node.
    ///
    /// # Panics
    /// Panics if `capacity` is below `MIN_FAN_OUT` or above `MAX_FAN_OUT`.
    #[must_use]
    pub fn new(kind: NodeKind, capacity: usize) -> Self {
        assert!(
            capacity >= MIN_FAN_OUT,
            "node capacity {capacity} below minimum fan-out {MIN_FAN_OUT}"
        );
        assert!(
            capacity <= MAX_FAN_OUT,
            "node capacity {capacity} above maximum fan-out {MAX_FAN_OUT}"
        );
        Self {
            kind,
            capacity,
            entries: Vec::with_capacity(capacity + 1),
            prev: None,
            next: None,
        }
    }

    /// Largest number of entries that fit in a block of `block_size` bytes,
    /// capped at `MAX_FAN_OUT`.
    #[must_use]
    pub const fn fan_out_for(block_size: usize) -> usize {
        let fits = block_size.saturating_sub(NODE_HEADER_SIZE) / (K::ENCODED_LEN + P::ENCODED_LEN);
        if fits > MAX_FAN_OUT { MAX_FAN_OUT } else { fits }
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Minimum number of entries a non-root node holds: ⌈N/2⌉.
    #[must_use]
    pub const fn min_fill(&self) -> usize {
        self.capacity.div_ceil(2)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// More entries than fit in a block; must be split before encoding.
    #[must_use]
    pub fn is_overfull(&self) -> bool {
        self.entries.len() > self.capacity
    }

    /// Fewer entries than a non-root node may hold.
    #[must_use]
    pub fn is_underfull(&self) -> bool {
        self.entries.len() < self.min_fill()
    }

    /// Whether this node could give one entry away and stay at minimum fill.
    #[must_use]
    pub fn can_lend(&self) -> bool {
        self.entries.len() > self.min_fill()
    }

    #[must_use]
    pub fn entries(&self) -> &[(K, P)] {
        &self.entries
    }

    #[must_use]
    pub fn key(&self, index: usize) -> &K {
        &self.entries[index].0
    }

    #[must_use]
    pub fn payload(&self, index: usize) -> &P {
        &self.entries[index].1
    }

    pub fn payload_mut(&mut self, index: usize) -> &mut P {
        &mut self.entries[index].1
    }

    #[must_use]
    pub fn first_key(&self) -> Option<&K> {
        self.entries.first().map(|(k, _)| k)
    }

    #[must_use]
    pub fn last_key(&self) -> Option<&K> {
        self.entries.last().map(|(k, _)| k)
    }

    #[must_use]
    pub const fn prev(&self) -> Option<BlockId> {
        self.prev
    }

    #[must_use]
    pub const fn next(&self) -> Option<BlockId> {
        self.next
    }

    pub const fn set_prev(&mut self, prev: Option<BlockId>) {
        self.prev = prev;
    }

    pub const fn set_next(&mut self, next: Option<BlockId>) {
        self.next = next;
    }

    /// Replace the key at `index`, keeping its payload.
    pub fn set_key(&mut self, index: usize, key: K) {
        self.entries[index].0 = key;
    }

    /// Position of the first entry with key >= `key`.
    #[must_use]
    pub fn lower_bound(&self, key: &K) -> usize {
        self.entries.partition_point(|(k, _)| k < key)
    }

    /// Position of the first entry with key > `key`.
    #[must_use]
    pub fn upper_bound(&self, key: &K) -> usize {
        self.entries.partition_point(|(k, _)| k <= key)
    }

    /// Position of `key`, if present.
    #[must_use]
    pub fn find(&self, key: &K) -> Option<usize> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
    }

    /// Routing position for `key` in an internal node.
    ///
    /// The last entry whose separator is <= `key`, or 0 when `key` is smaller
    /// than every separator.
    #[must_use]
    pub fn child_index(&self, key: &K) -> usize {
        self.upper_bound(key).saturating_sub(1)
    }

    /// Insert an entry in key order.
    ///
    /// The node may hold `capacity + 1` entries afterwards; the caller splits it.
    pub fn insert(&mut self, key: K, payload: P, policy: DuplicatePolicy) -> Inserted<P> {
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => match policy {
                DuplicatePolicy::Replace => {
                    let old = std::mem::replace(&mut self.entries[i].1, payload);
                    Inserted::Replaced(i, old)
                }
                DuplicatePolicy::Keep => Inserted::Duplicate(i),
            },
            Err(i) => {
                self.entries.insert(i, (key, payload));
                Inserted::New(i)
            }
        }
    }

    /// Insert an entry at an explicit position.
    ///
    /// # Panics
    /// Panics if the insert would break key order.
    pub fn insert_at(&mut self, index: usize, key: K, payload: P) {
        assert!(
            index == 0 || self.entries[index - 1].0 < key,
            "insert_at breaks order on the left"
        );
        assert!(
            index == self.entries.len() || key < self.entries[index].0,
            "insert_at breaks order on the right"
        );
        self.entries.insert(index, (key, payload));
    }

    /// Remove and return the entry at `index`.
    pub fn remove_at(&mut self, index: usize) -> (K, P) {
        self.entries.remove(index)
    }

    /// Remove all entries in `range`, returning how many were removed.
    pub fn erase(&mut self, range: Range<usize>) -> usize {
        self.entries.drain(range).count()
    }

    /// Move the upper half of this node into the empty node `right`.
    ///
    /// Returns the first key of `right`, which becomes its separator.
    /// Sibling links are the caller's responsibility.
    ///
    /// # Panics
    /// Panics if `right` is not empty or this node has fewer than two entries.
    pub fn split(&mut self, right: &mut Self) -> K {
        assert!(right.is_empty(), "split target must be empty");
        assert!(self.entries.len() >= 2, "cannot split a node with < 2 entries");

        let keep = self.entries.len().div_ceil(2);
        right.entries = self.entries.split_off(keep);
        right.entries[0].0.clone()
    }

    /// Append every entry of `right` to this node.
    ///
    /// # Panics
    /// Panics if the combined size exceeds capacity or `right` does not follow
    /// this node in key order.
    pub fn merge(&mut self, right: &mut Self) {
        assert!(
            self.entries.len() + right.entries.len() <= self.capacity,
            "merge would overflow node ({} + {} > {})",
            self.entries.len(),
            right.entries.len(),
            self.capacity
        );
        if let (Some(last), Some(first)) = (self.last_key(), right.first_key()) {
            assert!(
                last.cmp(first) == Ordering::Less,
                "merge requires right sibling keys to follow"
            );
        }
        self.entries.append(&mut right.entries);
    }

    /// Move entries from the tail of `left` onto the front of this node until
    /// the two are balanced.
    ///
    /// Returns the number of entries moved; the caller patches the separator
    /// of this node in the parent.
    pub fn steal_left(&mut self, left: &mut Self) -> usize {
        let count = left.entries.len().saturating_sub(self.entries.len()).div_ceil(2);
        if count == 0 {
            return 0;
        }
        let moved = left.entries.split_off(left.entries.len() - count);
        self.entries.splice(0..0, moved);
        count
    }

    /// Move entries from the front of `right` onto the tail of this node until
    /// the two are balanced.
    ///
    /// Returns the number of entries moved; the caller patches the separator
    /// of `right` in the parent.
    pub fn steal_right(&mut self, right: &mut Self) -> usize {
        let count = right.entries.len().saturating_sub(self.entries.len()).div_ceil(2);
        if count == 0 {
            return 0;
        }
        let rest = right.entries.split_off(count);
        let moved = std::mem::replace(&mut right.entries, rest);
        self.entries.extend(moved);
        count
    }

    /// Serialize into a block buffer.
    ///
    /// # Panics
    /// Panics if the node is overfull or `buf` is too small for the capacity.
    pub fn encode(&self, buf: &mut [u8]) {
        assert!(!self.is_overfull(), "cannot encode an overfull node");
        let entry_size = K::ENCODED_LEN + P::ENCODED_LEN;
        assert!(
            NODE_HEADER_SIZE + self.capacity * entry_size <= buf.len(),
            "block too small for node capacity"
        );

        buf.fill(0);
        buf[0] = self.kind as u8;
        // Not overfull and `capacity <= MAX_FAN_OUT`, so the count fits.
        buf[2..4].copy_from_slice(&(self.entries.len() as u16).to_le_bytes());
        buf[8..16].copy_from_slice(&self.prev.unwrap_or(NO_LINK).to_le_bytes());
        buf[16..24].copy_from_slice(&self.next.unwrap_or(NO_LINK).to_le_bytes());

        let mut offset = NODE_HEADER_SIZE;
        for (key, payload) in &self.entries {
            key.encode(&mut buf[offset..]);
            offset += K::ENCODED_LEN;
            payload.encode(&mut buf[offset..]);
            offset += P::ENCODED_LEN;
        }

        let checksum = block_checksum(buf);
        buf[4..8].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Deserialize a node of the expected kind from a block buffer.
    pub fn decode(kind: NodeKind, capacity: usize, buf: &[u8]) -> Result<Self, NodeError> {
        if buf.len() < NODE_HEADER_SIZE {
            return Err(NodeError::TruncatedBlock(buf.len()));
        }

        let found = NodeKind::try_from(buf[0]).map_err(NodeError::InvalidKind)?;
        if found != kind {
            return Err(NodeError::WrongKind {
                expected: kind,
                found,
            });
        }

        let stored = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let computed = block_checksum(buf);
        if stored != computed {
            return Err(NodeError::ChecksumMismatch { stored, computed });
        }

        let count = usize::from(u16::from_le_bytes([buf[2], buf[3]]));
        let entry_size = K::ENCODED_LEN + P::ENCODED_LEN;
        if count > capacity || NODE_HEADER_SIZE + count * entry_size > buf.len() {
            return Err(NodeError::TooManyEntries { count, capacity });
        }

        let prev = read_link(&buf[8..16]);
        let next = read_link(&buf[16..24]);

        let mut node = Self::new(kind, capacity);
        node.prev = prev;
        node.next = next;

        let mut offset = NODE_HEADER_SIZE;
        for _ in 0..count {
            let key = K::decode(&buf[offset..]);
            offset += K::ENCODED_LEN;
            let payload = P::decode(&buf[offset..]);
            offset += P::ENCODED_LEN;
            node.entries.push((key, payload));
        }

        if node.entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(NodeError::Unsorted);
        }

        Ok(node)
    }
}

fn read_link(bytes: &[u8]) -> Option<BlockId> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    match u64::from_le_bytes(raw) {
        NO_LINK => None,
        block => Some(block),
    }
}

/// CRC32 of a block with the checksum field treated as zero.
fn block_checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[0..4]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[8..]);
    hasher.finalize()
}

/// Errors that can occur when decoding a node block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Block shorter than the node header.
    TruncatedBlock(usize),
    /// Unknown kind byte.
    InvalidKind(u8),
    /// Block holds a node of the other kind.
    WrongKind { expected: NodeKind, found: NodeKind },
    /// Stored checksum does not match the contents.
    ChecksumMismatch { stored: u32, computed: u32 },
    /// Entry count exceeds the node capacity.
    TooManyEntries { count: usize, capacity: usize },
    /// Entries are not strictly sorted.
    Unsorted,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TruncatedBlock(len) => write!(f, "block of {len} bytes is truncated"),
            Self::InvalidKind(byte) => write!(f, "invalid node kind byte {byte:#04x}"),
            Self::WrongKind { expected, found } => {
                write!(f, "expected {expected:?} node, found {found:?}")
            }
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum mismatch (stored {stored:#010x}, computed {computed:#010x})"
            ),
            Self::TooManyEntries { count, capacity } => {
                write!(f, "{count} entries exceed node capacity {capacity}")
            }
            Self::Unsorted => write!(f, "node entries are not sorted"),
        }
    }
}

impl std::error::Error for NodeError {}
