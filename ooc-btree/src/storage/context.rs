//! Shared storage context: the block device plus its asynchronous I/O service.
//!
//! One context is built per device and handed to every node cache that uses
//! it. Reads and writes are executed on a dedicated tokio runtime's blocking
//! pool; each request reports back through a completion callback that runs on
//! the I/O thread.
//!
//! # Invariants
//!
//! - Every submitted request invokes its callback exactly once, unless the
//!   context is dropped while the request is still queued
//! - `in_flight()` counts requests whose callback has not returned yet

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::{Builder, Runtime};

use crate::storage::io::{BlockDevice, BlockId, DeviceError};

/// Completion callback for a block read.
pub type ReadCallback = Box<dyn FnOnce(Result<Vec<u8>, DeviceError>) + Send + 'static>;

/// Completion callback for a block write.
pub type WriteCallback = Box<dyn FnOnce(Result<(), DeviceError>) + Send + 'static>;

/// Device handle and I/O service shared by the caches of one tree.
pub struct StoreContext {
    device: Arc<dyn BlockDevice>,
    /// Always `Some` until drop.
    runtime: Option<Runtime>,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("block_size", &self.device.block_size())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl StoreContext {
    /// Build a context around `device` with `io_threads` blocking I/O workers.
    ///
    /// # Pre-conditions
    /// - `io_threads` > 0
    pub fn new(device: Arc<dyn BlockDevice>, io_threads: usize) -> Result<Self, DeviceError> {
        assert!(io_threads > 0, "I/O thread count must be positive");

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(io_threads)
            .thread_name("ooc-btree-io")
            .build()?;

        Ok(Self {
            device,
            runtime: Some(runtime),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Block size of the underlying device.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.device.block_size()
    }

    /// The underlying device.
    #[must_use]
    pub const fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// Number of submitted requests that have not completed yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Allocate one block synchronously.
    pub fn allocate_block(&self) -> Result<BlockId, DeviceError> {
        self.device.allocate_blocks(1)
    }

    /// Free one block synchronously.
    pub fn free_block(&self, block: BlockId) -> Result<(), DeviceError> {
        self.device.free_blocks(block, 1)
    }

    /// Submit an asynchronous read of `block`.
    ///
    /// `on_complete` receives the block contents.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn submit_read(&self, block: BlockId, on_complete: ReadCallback) {
        let device = Arc::clone(&self.device);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);

        self.spawn(move || {
            let mut buf = vec![0u8; device.block_size()];
            let result = device.read_block(block, &mut buf).map(|()| buf);
            on_complete(result);
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Submit an asynchronous write of `data` to `block`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is required for shared ownership
    pub fn submit_write(&self, block: BlockId, data: Vec<u8>, on_complete: WriteCallback) {
        let device = Arc::clone(&self.device);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);

        self.spawn(move || {
            let result = device.write_block(block, &data);
            on_complete(result);
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let Some(runtime) = &self.runtime else {
            unreachable!("runtime is only taken on drop");
        };
        // The join handle is not needed: completion is reported by the callback.
        drop(runtime.spawn_blocking(job));
    }
}

impl Drop for StoreContext {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which is not allowed inside async contexts.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
