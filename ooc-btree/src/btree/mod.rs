//! Out-of-core B+-tree.
//!
//! Nodes live in fixed-size blocks of a `BlockDevice` and are brought into
//! memory on demand by two bounded node caches, one per node kind. Leaves
//! hold the entries; internal nodes hold `(separator, child)` pairs where
//! each separator is a lower bound of its child's keys. Every level is a
//! doubly linked list through sibling links.
//!
//! Operations run as resumable state machines on a single dispatch thread:
//! a cache miss suspends the request until the block read completes, while
//! other requests whose key-range locks do not conflict keep running.
//!
//! # Usage
//!
//! ```
//! use ooc_btree::btree::BTree;
//! use ooc_btree::config::TreeConfig;
//!
//! let tree: BTree<u64, u64> = BTree::in_memory(&TreeConfig::default()).expect("open");
//! tree.insert(1, 10).wait().expect("insert");
//! let cursor = tree.find(1).wait().expect("find");
//! assert_eq!(cursor.value(), Some(&10));
//! ```

pub mod cache;
pub mod codec;
pub mod cursor;
mod dispatch;
pub mod engine;
pub mod lock;
mod machine;
pub mod node;
mod tree;

pub use cache::CacheStats;
pub use codec::{BlockCodec, Key, Value};
pub use cursor::{Cursor, Position};
pub use machine::{InsertResult, VerifyReport};
pub use node::{MAX_FAN_OUT, MIN_FAN_OUT, NODE_HEADER_SIZE};
pub use tree::{BTree, Completion, EngineError, TreeCacheStats};
