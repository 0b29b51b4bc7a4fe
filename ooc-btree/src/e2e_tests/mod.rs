//! End-to-end tests through the public `BTree` API.
//!
//! Each test file covers one scenario. Trees use small fan-outs so that a
//! few thousand entries already produce several levels, and small caches so
//! that most requests suspend on block reads.

#![cfg(test)]

mod helpers;

mod test_async_requests;
mod test_bulk_load;
mod test_concurrent_clients;
mod test_erase_range;
mod test_file_device;
mod test_iteration;
mod test_random_erase;
mod test_small_cache;
mod test_workload_model;
