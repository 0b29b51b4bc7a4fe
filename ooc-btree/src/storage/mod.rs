//! Block storage collaborators for the tree engine.
//!
//! The engine consumes block storage through the `BlockDevice` trait and
//! issues asynchronous requests through a `StoreContext`. Two devices are
//! provided:
//!
//! - `MemoryBlockDevice`: blocks held in memory, with optional latency
//! - `FileBlockDevice`: blocks stored in a single file
//!
//! Both allocate blocks with a bitmap `BlockAllocator`.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use ooc_btree::storage::{BlockDevice, MemoryBlockDevice, StoreContext};
//!
//! let device: Arc<dyn BlockDevice> = Arc::new(MemoryBlockDevice::new(4096));
//! let ctx = StoreContext::new(device, 2).expect("context");
//!
//! let block = ctx.allocate_block().expect("allocate");
//! ctx.submit_write(block, vec![0u8; 4096], Box::new(|result| assert!(result.is_ok())));
//! ```

mod allocator;
mod context;
mod file;
mod io;
mod memory;

pub use allocator::BlockAllocator;
pub use context::{ReadCallback, StoreContext, WriteCallback};
pub use file::FileBlockDevice;
pub use io::{BlockDevice, BlockId, DeviceError};
pub use memory::MemoryBlockDevice;
