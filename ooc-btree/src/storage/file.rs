//! File-backed block device.
//!
//! Block `n` lives at byte offset `n * block_size` of a single file. The file
//! is grown with `set_len` whenever the allocator expands. Contents are only
//! meaningful within one run; the file is truncated on creation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::storage::allocator::BlockAllocator;
use crate::storage::io::{BlockDevice, BlockId, DeviceError, check_len};

/// Number of blocks the file is sized for on creation.
const INITIAL_BLOCKS: u64 = 64;

#[derive(Debug)]
struct FileState {
    file: File,
    allocator: BlockAllocator,
}

/// A block device backed by a single file.
#[derive(Debug)]
pub struct FileBlockDevice {
    path: PathBuf,
    block_size: usize,
    state: Mutex<FileState>,
}

impl FileBlockDevice {
    /// Create (or truncate) the backing file at `path`.
    pub fn create(path: &Path, block_size: usize) -> Result<Self, DeviceError> {
        if block_size == 0 {
            return Err(DeviceError::InvalidBlockSize(block_size));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(INITIAL_BLOCKS * block_size as u64)?;

        Ok(Self {
            path: path.to_path_buf(),
            block_size,
            state: Mutex::new(FileState {
                file,
                allocator: BlockAllocator::new(INITIAL_BLOCKS),
            }),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all written blocks to disk.
    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    pub fn sync(&self) -> Result<(), DeviceError> {
        let state = self.state.lock().expect("lock poisoned");
        state.file.sync_all()?;
        Ok(())
    }

    const fn offset(&self, block: BlockId) -> u64 {
        block * self.block_size as u64
    }

    fn check_allocated(state: &FileState, block: BlockId) -> Result<(), DeviceError> {
        if state.allocator.is_allocated(block) {
            Ok(())
        } else {
            Err(DeviceError::BlockOutOfBounds {
                block,
                total_blocks: state.allocator.total_blocks(),
            })
        }
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn allocate_blocks(&self, count: u64) -> Result<BlockId, DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let before = state.allocator.total_blocks();
        let first = state.allocator.allocate_growing(count);

        let total = state.allocator.total_blocks();
        if total != before {
            state.file.set_len(total * self.block_size as u64)?;
        }
        Ok(first)
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn free_blocks(&self, first: BlockId, count: u64) -> Result<(), DeviceError> {
        let mut state = self.state.lock().expect("lock poisoned");
        for block in first..first + count {
            state.allocator.free(block);
        }
        Ok(())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn read_block(&self, block: BlockId, buf: &mut [u8]) -> Result<(), DeviceError> {
        check_len(self.block_size, buf.len())?;

        let mut state = self.state.lock().expect("lock poisoned");
        Self::check_allocated(&state, block)?;
        state.file.seek(SeekFrom::Start(self.offset(block)))?;
        state.file.read_exact(buf)?;
        Ok(())
    }

    #[allow(clippy::expect_used)] // Mutex poisoning indicates unrecoverable state
    fn write_block(&self, block: BlockId, data: &[u8]) -> Result<(), DeviceError> {
        check_len(self.block_size, data.len())?;

        let mut state = self.state.lock().expect("lock poisoned");
        Self::check_allocated(&state, block)?;
        state.file.seek(SeekFrom::Start(self.offset(block)))?;
        state.file.write_all(data)?;
        Ok(())
    }
}
