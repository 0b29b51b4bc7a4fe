//! Cursors: positions in the tree returned by lookups and iteration.

use crate::storage::BlockId;

/// A position inside a leaf, with a copy of the entry found there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position<K, V> {
    pub(crate) leaf: BlockId,
    pub(crate) index: usize,
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) version: u64,
}

impl<K, V> Position<K, V> {
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Leaf block holding the entry when the cursor was produced.
    #[must_use]
    pub const fn leaf(&self) -> BlockId {
        self.leaf
    }

    /// Structure version the position was taken at.
    ///
    /// Once the tree is modified the leaf/index pair is stale and the cursor
    /// is re-located by key.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

/// Either an entry position or the past-the-end marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor<K, V> {
    End,
    At(Position<K, V>),
}

impl<K, V> Cursor<K, V> {
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    #[must_use]
    pub const fn key(&self) -> Option<&K> {
        match self {
            Self::End => None,
            Self::At(position) => Some(&position.key),
        }
    }

    #[must_use]
    pub const fn value(&self) -> Option<&V> {
        match self {
            Self::End => None,
            Self::At(position) => Some(&position.value),
        }
    }

    /// The `(key, value)` pair, consuming the cursor.
    #[must_use]
    pub fn into_entry(self) -> Option<(K, V)> {
        match self {
            Self::End => None,
            Self::At(position) => Some((position.key, position.value)),
        }
    }
}
