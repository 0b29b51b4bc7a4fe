//! Key-range locks used to order conflicting requests.
//!
//! Every request is admitted with one lock: a key interval plus a mode.
//! Shared locks only conflict with overlapping exclusive locks; exclusive
//! locks conflict with anything they overlap.

use std::ops::{Bound, RangeBounds};

use crate::btree::cache::RequestId;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A key interval whose ends may be inclusive, exclusive or unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange<K> {
    start: Bound<K>,
    end: Bound<K>,
}

impl<K: Ord + Clone> KeyRange<K> {
    /// The whole key space.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// A single key.
    #[must_use]
    pub fn point(key: K) -> Self {
        Self {
            start: Bound::Included(key.clone()),
            end: Bound::Included(key),
        }
    }

    /// Every key >= `key`.
    #[must_use]
    pub const fn tail(key: K) -> Self {
        Self {
            start: Bound::Included(key),
            end: Bound::Unbounded,
        }
    }

    /// Every key <= `key`.
    #[must_use]
    pub const fn head(key: K) -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Included(key),
        }
    }

    /// Copy the bounds of any standard range.
    #[must_use]
    pub fn from_bounds(range: &impl RangeBounds<K>) -> Self {
        Self {
            start: range.start_bound().cloned(),
            end: range.end_bound().cloned(),
        }
    }

    #[must_use]
    pub const fn start(&self) -> &Bound<K> {
        &self.start
    }

    #[must_use]
    pub const fn end(&self) -> &Bound<K> {
        &self.end
    }

    /// Whether both ends are unbounded.
    #[must_use]
    pub const fn is_everything(&self) -> bool {
        matches!(
            (&self.start, &self.end),
            (Bound::Unbounded, Bound::Unbounded)
        )
    }

    /// Whether `key` lies inside the interval.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let above_start = match &self.start {
            Bound::Included(s) => key >= s,
            Bound::Excluded(s) => key > s,
            Bound::Unbounded => true,
        };
        let below_end = match &self.end {
            Bound::Included(e) => key <= e,
            Bound::Excluded(e) => key < e,
            Bound::Unbounded => true,
        };
        above_start && below_end
    }

    /// Whether `key` lies past the end of the interval.
    #[must_use]
    pub fn is_past_end(&self, key: &K) -> bool {
        match &self.end {
            Bound::Included(e) => key > e,
            Bound::Excluded(e) => key >= e,
            Bound::Unbounded => false,
        }
    }

    /// Whether the two intervals share at least one possible key.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        !ends_before(&self.end, &other.start) && !ends_before(&other.end, &self.start)
    }
}

/// Whether an interval ending at `end` lies entirely before one starting at `start`.
fn ends_before<K: Ord>(end: &Bound<K>, start: &Bound<K>) -> bool {
    match (end, start) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(e), Bound::Included(s)) => e < s,
        (Bound::Included(e) | Bound::Excluded(e), Bound::Excluded(s))
        | (Bound::Excluded(e), Bound::Included(s)) => e <= s,
    }
}

/// A lock request: interval plus mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeLock<K> {
    pub range: KeyRange<K>,
    pub mode: LockMode,
}

impl<K: Ord + Clone> RangeLock<K> {
    #[must_use]
    pub const fn shared(range: KeyRange<K>) -> Self {
        Self {
            range,
            mode: LockMode::Shared,
        }
    }

    #[must_use]
    pub const fn exclusive(range: KeyRange<K>) -> Self {
        Self {
            range,
            mode: LockMode::Exclusive,
        }
    }

    /// Whether the two locks cannot be held at the same time.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        let both_shared = self.mode == LockMode::Shared && other.mode == LockMode::Shared;
        !both_shared && self.range.overlaps(&other.range)
    }
}

/// Locks currently held by admitted requests.
#[derive(Debug)]
pub struct LockTable<K> {
    held: Vec<(RequestId, RangeLock<K>)>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self { held: Vec::new() }
    }
}

impl<K: Ord + Clone> LockTable<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `lock` conflicts with any held lock.
    #[must_use]
    pub fn conflicts(&self, lock: &RangeLock<K>) -> bool {
        self.held.iter().any(|(_, held)| held.conflicts_with(lock))
    }

    /// Record `lock` as held by `id`.
    ///
    /// # Pre-conditions
    /// - `lock` does not conflict with any held lock
    pub fn acquire(&mut self, id: RequestId, lock: RangeLock<K>) {
        debug_assert!(!self.conflicts(&lock), "acquiring a conflicting lock");
        self.held.push((id, lock));
    }

    /// Drop the lock held by `id`. Returns whether one was held.
    pub fn release(&mut self, id: RequestId) -> bool {
        let before = self.held.len();
        self.held.retain(|(holder, _)| *holder != id);
        self.held.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
