//! Block storage abstraction consumed by the tree engine.
//!
//! The engine never touches files directly. It allocates, frees, reads and
//! writes fixed-size blocks through the `BlockDevice` trait, which allows the
//! system to run against real file I/O or an in-memory device in tests.
//!
//! # Design
//!
//! The trait is the minimal surface the engine needs:
//! - Block allocation and deallocation
//! - Whole-block reads and writes
//! - The fixed block size, which drives node fan-out
//!
//! All methods take `&self` so a device can be shared with the I/O service's
//! worker threads; implementations synchronize internally.

/// A block address (0-indexed block number).
pub type BlockId = u64;

/// Errors that can occur during block device operations.
#[derive(Debug)]
pub enum DeviceError {
    /// I/O error.
    Io(std::io::Error),
    /// Block was never allocated or is out of bounds.
    BlockOutOfBounds { block: BlockId, total_blocks: u64 },
    /// Buffer length does not match the device block size.
    BadBufferLength { expected: usize, actual: usize },
    /// Block size is not usable by the device.
    InvalidBlockSize(usize),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockOutOfBounds {
                block,
                total_blocks,
            } => write!(
                f,
                "block {block} out of bounds (total blocks: {total_blocks})"
            ),
            Self::BadBufferLength { expected, actual } => write!(
                f,
                "buffer length {actual} does not match block size {expected}"
            ),
            Self::InvalidBlockSize(size) => write!(f, "invalid block size: {size}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over block-granularity storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_block` returns the last content written to that block
/// - `allocate_blocks` returns the first of `count` contiguous blocks
/// - `free_blocks` makes the blocks available to later allocations
/// - every buffer passed in is exactly `block_size()` bytes
pub trait BlockDevice: Send + Sync {
    /// Size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Allocate `count` contiguous blocks.
    ///
    /// Returns the address of the first allocated block.
    fn allocate_blocks(&self, count: u64) -> Result<BlockId, DeviceError>;

    /// Return `count` blocks starting at `first` to the free pool.
    fn free_blocks(&self, first: BlockId, count: u64) -> Result<(), DeviceError>;

    /// Read a whole block into `buf`.
    fn read_block(&self, block: BlockId, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Write a whole block from `data`.
    fn write_block(&self, block: BlockId, data: &[u8]) -> Result<(), DeviceError>;
}

/// Check that a caller-supplied buffer matches the device block size.
pub const fn check_len(expected: usize, actual: usize) -> Result<(), DeviceError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DeviceError::BadBufferLength { expected, actual })
    }
}
