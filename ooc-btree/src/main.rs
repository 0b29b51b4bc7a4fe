//! Load driver: runs a random workload against a file-backed tree and
//! reports throughput, cache behaviour and the structural check.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use ooc_btree::btree::{BTree, Cursor};
use ooc_btree::config::TreeConfig;
use ooc_btree::storage::{BlockDevice, FileBlockDevice};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entries loaded in the first phase.
const ENTRIES: u64 = 200_000;
/// Requests kept in flight at once during the random phases.
const BATCH: usize = 256;
/// Batches of random lookups.
const LOOKUP_ROUNDS: usize = 400;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ooc_btree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match TreeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.data_directory) {
        tracing::error!("Failed to create data directory: {e}");
        std::process::exit(1);
    }
    let path = config.data_directory.join("ooc-btree.blocks");
    let device: Arc<dyn BlockDevice> = match FileBlockDevice::create(&path, config.block_size) {
        Ok(device) => Arc::new(device),
        Err(e) => {
            tracing::error!("Failed to create block file {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    let tree: BTree<u64, u64> = match BTree::open(&config, device) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("Failed to open tree: {e}");
            std::process::exit(1);
        }
    };

    let mut rng = rand::rng();

    // Phase 1: bulk load every even key.
    let started = Instant::now();
    let loaded = tree
        .insert_many((0..ENTRIES).map(|k| (k * 2, k)), true)
        .await
        .unwrap_or_else(|e| fail("bulk load", &e));
    tracing::info!(
        loaded,
        height = tree.height(),
        elapsed_ms = started.elapsed().as_millis(),
        "bulk load done"
    );

    // Phase 2: random point lookups, half of them misses.
    let started = Instant::now();
    let mut hits = 0usize;
    for _ in 0..LOOKUP_ROUNDS {
        let lookups = (0..BATCH).map(|_| tree.find(rng.random_range(0..ENTRIES * 2)));
        hits += join_all(lookups)
            .await
            .into_iter()
            .filter(|found| matches!(found, Ok(Cursor::At(_))))
            .count();
    }
    tracing::info!(
        hits,
        elapsed_ms = started.elapsed().as_millis(),
        stats = ?tree.cache_stats(),
        "random lookups done"
    );

    // Phase 3: erase a shuffled half of the keys in concurrent batches.
    let started = Instant::now();
    let mut victims: Vec<u64> = (0..ENTRIES).map(|k| k * 2).collect();
    victims.shuffle(&mut rng);
    victims.truncate(victims.len() / 2);
    for chunk in victims.chunks(BATCH) {
        let erased = join_all(chunk.iter().map(|&k| tree.erase(k))).await;
        if let Some(Err(e)) = erased.into_iter().find(Result::is_err) {
            fail("erase", &e);
        }
    }
    tracing::info!(
        size = tree.size(),
        height = tree.height(),
        elapsed_ms = started.elapsed().as_millis(),
        "random erases done"
    );

    // Phase 4: range scan from the middle.
    let mut cursor = tree
        .lower_bound(ENTRIES)
        .await
        .unwrap_or_else(|e| fail("seek", &e));
    let mut scanned = 0usize;
    while !cursor.is_end() && scanned < 1000 {
        scanned += 1;
        cursor = tree
            .next(cursor)
            .await
            .unwrap_or_else(|e| fail("scan", &e));
    }
    tracing::info!(scanned, "range scan done");

    let report = tree.verify().await.unwrap_or_else(|e| fail("verify", &e));
    if report.is_ok() {
        tracing::info!(%report, "tree verified");
    } else {
        tracing::error!(%report, "tree verification failed");
        std::process::exit(1);
    }

    let written = tree.flush().await.unwrap_or_else(|e| fail("flush", &e));
    tracing::info!(written, stats = ?tree.cache_stats(), "flushed");
}

fn fail(phase: &str, error: &dyn std::error::Error) -> ! {
    tracing::error!("{phase} failed: {error}");
    std::process::exit(1);
}
