//! In-memory block device.
//!
//! Stores blocks in a hash map guarded by a mutex. An optional artificial
//! latency is applied to every read and write so tests can observe requests
//! suspending on outstanding I/O.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::storage::allocator::BlockAllocator;
use crate::storage::io::{BlockDevice, BlockId, DeviceError, check_len};

/// Initial number of blocks tracked by the allocator.
const INITIAL_BLOCKS: u64 = 64;

/// Mutable device state.
#[derive(Debug)]
struct MemoryState {
    blocks: HashMap<BlockId, Box<[u8]>>,
    allocator: BlockAllocator,
}

/// A block device that keeps every block in memory.
///
/// # Invariants
/// - Only allocated blocks can be read or written
/// - An allocated block that was never written reads as zeros
#[derive(Debug)]
pub struct MemoryBlockDevice {
    block_size: usize,
    latency: Option<Duration>,
    state: Mutex<MemoryState>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBlockDevice {
    /// Create a device with the given block size and no latency.
    ///
    /// # Panics
    /// Panics if `block_size` is 0.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self {
            block_size,
            latency: None,
            state: Mutex::new(MemoryState {
                blocks: HashMap::new(),
                allocator: BlockAllocator::new(INITIAL_BLOCKS),
            }),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Apply `latency` to every read and write.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of completed block reads.
    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed block writes.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of blocks currently allocated.
    #[must_use]
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn allocated_blocks(&self) -> u64 {
        self.state
            .lock()
            .expect("lock poisoned")
            .allocator
            .used_count()
    }

    fn delay(&self) {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn allocate_blocks(&self, count: u64) -> Result<BlockId, DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        Ok(state.allocator.allocate_growing(count))
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn free_blocks(&self, first: BlockId, count: u64) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        for block in first..first + count {
            state.allocator.free(block);
            state.blocks.remove(&block);
        }
        Ok(())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn read_block(&self, block: BlockId, buf: &mut [u8]) -> Result<(), DeviceError> {
        check_len(self.block_size, buf.len())?;
        self.delay();

        let state = self.state.lock().expect("lock poisoned");
        if !state.allocator.is_allocated(block) {
            return Err(DeviceError::BlockOutOfBounds {
                block,
                total_blocks: state.allocator.total_blocks(),
            });
        }
        match state.blocks.get(&block) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        drop(state);

        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn write_block(&self, block: BlockId, data: &[u8]) -> Result<(), DeviceError> {
        check_len(self.block_size, data.len())?;
        self.delay();

        let mut state = self.state.lock().expect("lock poisoned");
        if !state.allocator.is_allocated(block) {
            return Err(DeviceError::BlockOutOfBounds {
                block,
                total_blocks: state.allocator.total_blocks(),
            });
        }
        state.blocks.insert(block, data.into());
        drop(state);

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
