// Life of a request:
// 1. A `BTree` method packs its arguments into a state machine
// 2. The machine is queued for the dispatch thread with a key-range lock
// 3. Once the lock is free the machine runs:
//     - Nodes are fetched through the leaf or internal node cache
//     - A cache miss issues an async block read and suspends the machine;
//       if the block is still being written back, the read waits for that
//     - The read completion re-queues it; it resumes from its saved phase
// 4. The finished machine sends its result through the request's completion
//
// System components:
//  - Block storage (device, allocator, async I/O context)
//  - Node cache per node kind
//  - Operation state machines
//  - Dispatch loop with range locks

pub mod btree;
pub mod config;
pub mod storage;

#[cfg(test)]
mod e2e_tests;

pub use btree::{BTree, Completion, Cursor, EngineError};
pub use config::TreeConfig;
