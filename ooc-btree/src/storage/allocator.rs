//! Block allocator using a bitmap to track free/used blocks.
//!
//! Each bit represents one block: 0 = free, 1 = used. The bitmap lives only in
//! memory; block contents are valid for a single run, so nothing about the
//! allocation state is persisted.

// Block IDs are u64 but bitmap indices are usize. On 64-bit systems these are the same size.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::BlockId;

/// Number of bits per byte.
const BITS_PER_BYTE: usize = 8;

/// A block allocation bitmap.
///
/// # Invariants
/// - `free_count` equals the number of clear bits below `total_blocks`
/// - `next_search_hint <= total_blocks`
#[derive(Debug)]
pub struct BlockAllocator {
    /// The bitmap data.
    bitmap: Vec<u8>,
    /// Total number of blocks being tracked.
    total_blocks: u64,
    /// Number of free blocks.
    free_count: u64,
    /// Hint for next free block search.
    next_search_hint: u64,
}

impl BlockAllocator {
    /// Create an allocator tracking `total_blocks` free blocks.
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        let bitmap_bytes = (total_blocks as usize).div_ceil(BITS_PER_BYTE);
        Self {
            bitmap: vec![0u8; bitmap_bytes],
            total_blocks,
            free_count: total_blocks,
            next_search_hint: 0,
        }
    }

    /// Allocate a single free block.
    ///
    /// Returns `None` if no free blocks are available.
    pub fn allocate(&mut self) -> Option<BlockId> {
        self.allocate_contiguous(1)
    }

    /// Allocate `count` contiguous blocks.
    ///
    /// Searches from the hint first, then wraps around to the beginning.
    /// Returns `None` if no contiguous run of the requested size is available.
    pub fn allocate_contiguous(&mut self, count: u64) -> Option<BlockId> {
        if count == 0 || count > self.free_count {
            return None;
        }

        let start = self
            .find_run(self.next_search_hint, self.total_blocks, count)
            .or_else(|| self.find_run(0, self.total_blocks, count))?;

        for block in start..start + count {
            set_bit(&mut self.bitmap, block as usize);
        }
        self.free_count -= count;
        self.next_search_hint = start + count;
        Some(start)
    }

    /// Find the first run of `count` free blocks in `[from, to)`.
    fn find_run(&self, from: u64, to: u64, count: u64) -> Option<BlockId> {
        let mut run_start = from;
        let mut run_length = 0u64;

        for block in from..to {
            if get_bit(&self.bitmap, block as usize) {
                run_start = block + 1;
                run_length = 0;
            } else {
                run_length += 1;
                if run_length >= count {
                    return Some(run_start);
                }
            }
        }

        None
    }

    /// Free a previously allocated block.
    ///
    /// Freeing an unallocated or out-of-range block is a no-op.
    pub fn free(&mut self, block: BlockId) {
        if block >= self.total_blocks {
            return;
        }

        if get_bit(&self.bitmap, block as usize) {
            clear_bit(&mut self.bitmap, block as usize);
            self.free_count += 1;

            if block < self.next_search_hint {
                self.next_search_hint = block;
            }
        }
    }

    /// Check if a block is allocated.
    #[must_use]
    pub fn is_allocated(&self, block: BlockId) -> bool {
        if block >= self.total_blocks {
            return false;
        }
        get_bit(&self.bitmap, block as usize)
    }

    /// Get the number of free blocks.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Get the number of allocated blocks.
    #[must_use]
    pub const fn used_count(&self) -> u64 {
        self.total_blocks - self.free_count
    }

    /// Get the total number of blocks being tracked.
    #[must_use]
    pub const fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Expand the allocator to track more blocks.
    ///
    /// The new blocks are marked as free.
    pub fn expand(&mut self, new_total_blocks: u64) {
        if new_total_blocks <= self.total_blocks {
            return;
        }

        let new_bitmap_bytes = (new_total_blocks as usize).div_ceil(BITS_PER_BYTE);
        self.bitmap.resize(new_bitmap_bytes, 0);

        self.free_count += new_total_blocks - self.total_blocks;
        self.total_blocks = new_total_blocks;
    }

    /// Allocate `count` contiguous blocks, growing the bitmap when needed.
    ///
    /// Growth at least doubles the tracked range so repeated single-block
    /// allocations stay amortized constant.
    pub fn allocate_growing(&mut self, count: u64) -> BlockId {
        if let Some(start) = self.allocate_contiguous(count) {
            return start;
        }
        let grown = (self.total_blocks * 2).max(self.total_blocks + count).max(64);
        self.expand(grown);
        // The tail added by `expand` is free and at least `count` long.
        self.allocate_contiguous(count)
            .unwrap_or_else(|| unreachable!("expanded allocator has a free tail of {count} blocks"))
    }
}

/// Get a bit from the bitmap.
fn get_bit(bitmap: &[u8], index: usize) -> bool {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index >= bitmap.len() {
        return false;
    }

    (bitmap[byte_index] & (1 << bit_index)) != 0
}

/// Set a bit in the bitmap (mark as used).
fn set_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] |= 1 << bit_index;
    }
}

/// Clear a bit in the bitmap (mark as free).
fn clear_bit(bitmap: &mut [u8], index: usize) {
    let byte_index = index / BITS_PER_BYTE;
    let bit_index = index % BITS_PER_BYTE;

    if byte_index < bitmap.len() {
        bitmap[byte_index] &= !(1 << bit_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_allocator_is_empty() {
        let alloc = BlockAllocator::new(100);
        assert_eq!(alloc.free_count(), 100);
        assert_eq!(alloc.used_count(), 0);
        assert!(!alloc.is_allocated(0));
    }

    #[test]
    fn test_allocate_and_free() {
        let mut alloc = BlockAllocator::new(100);

        let b1 = alloc.allocate().expect("allocate 1");
        let b2 = alloc.allocate().expect("allocate 2");
        let b3 = alloc.allocate().expect("allocate 3");
        assert!(alloc.is_allocated(b1));
        assert!(alloc.is_allocated(b2));
        assert!(alloc.is_allocated(b3));

        let free_before = alloc.free_count();
        alloc.free(b2);
        assert!(!alloc.is_allocated(b2));
        assert_eq!(alloc.free_count(), free_before + 1);

        // Next allocation reuses the hole
        let b4 = alloc.allocate().expect("allocate 4");
        assert_eq!(b4, b2);
    }

    #[test]
    fn test_allocate_contiguous_skips_holes() {
        let mut alloc = BlockAllocator::new(100);

        let _ = alloc.allocate();
        let hole = alloc.allocate().expect("alloc");
        let _ = alloc.allocate();
        alloc.free(hole);

        let start = alloc.allocate_contiguous(5).expect("allocate contiguous");
        for i in 0..5 {
            assert!(alloc.is_allocated(start + i));
        }
        assert!(start > hole);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut alloc = BlockAllocator::new(10);
        while alloc.allocate().is_some() {}

        assert_eq!(alloc.free_count(), 0);
        assert!(alloc.allocate().is_none());
    }

    #[test]
    fn test_allocate_growing_expands() {
        let mut alloc = BlockAllocator::new(2);
        let a = alloc.allocate_growing(1);
        let b = alloc.allocate_growing(1);
        let c = alloc.allocate_growing(1);

        assert_eq!((a, b, c), (0, 1, 2));
        assert!(alloc.total_blocks() >= 3);
        assert_eq!(alloc.used_count(), 3);
    }

    #[test]
    fn test_double_free_is_noop() {
        let mut alloc = BlockAllocator::new(8);
        let b = alloc.allocate().expect("alloc");
        alloc.free(b);
        alloc.free(b);
        assert_eq!(alloc.free_count(), 8);
    }

    #[test]
    fn test_bit_operations() {
        let mut bitmap = vec![0u8; 10];

        set_bit(&mut bitmap, 0);
        set_bit(&mut bitmap, 7);
        set_bit(&mut bitmap, 79);
        assert!(get_bit(&bitmap, 0));
        assert!(get_bit(&bitmap, 7));
        assert!(get_bit(&bitmap, 79));
        assert!(!get_bit(&bitmap, 8));

        clear_bit(&mut bitmap, 7);
        assert!(!get_bit(&bitmap, 7));
        assert!(get_bit(&bitmap, 0));
    }
}
