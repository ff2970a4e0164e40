//! The block mover: the copy loop for one volume pair.
//!
//! The mover drains block pools on the source volume and moves blocks
//! onto the destination until the pair is close enough to its target,
//! the source runs dry, the destination runs out of room, the error
//! budget is spent, or the run flag clears. Throughput is shaped with a
//! post-move delay that keeps the moving average at or below the
//! bandwidth ceiling.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::BalancerConfig;
use crate::volume::{Block, BlockIterator, BlockStore};
use crate::work::{VolumePair, WorkItem};

const MEGABYTE: u64 = 1024 * 1024;
/// Slice length for the throttle sleep so a cleared run flag is
/// observed promptly.
const SLEEP_SLICE_MS: u64 = 100;
const ERR_COUNT_EXCEEDED: &str = "Error count exceeded.";

pub struct BlockMover {
    store: Arc<dyn BlockStore>,
    bandwidth_mb: u64,
    tolerance_percent: u64,
    max_disk_errors: u64,
    should_run: AtomicBool,
    /// Rotating pool cursor, persistent across `copy_blocks` calls for
    /// the lifetime of this mover.
    pool_index: AtomicUsize,
}

impl BlockMover {
    pub fn new(store: Arc<dyn BlockStore>, config: &BalancerConfig) -> Self {
        Self {
            store,
            bandwidth_mb: config.max_disk_throughput_mb,
            tolerance_percent: config.block_tolerance_percent,
            max_disk_errors: config.max_disk_errors,
            should_run: AtomicBool::new(false),
            pool_index: AtomicUsize::new(0),
        }
    }

    /// Allow the copy loop to run. Called before each plan starts.
    pub fn set_runnable(&self) {
        self.should_run.store(true, Ordering::Release);
    }

    /// Ask the copy loop to stop at its next observation point.
    pub fn set_exit_flag(&self) {
        self.should_run.store(false, Ordering::Release);
    }

    pub fn should_run(&self) -> bool {
        self.should_run.load(Ordering::Acquire)
    }

    /// Move blocks for one pair. Called once per work-map entry,
    /// sequentially, in plan order.
    pub fn copy_blocks(&self, pair: &VolumePair, item: &Mutex<WorkItem>) {
        let source = pair.source();
        let destination = pair.destination();

        if source.is_transient() || destination.is_transient() {
            info!("skipping transient storage pair {pair:?}");
            return;
        }

        item.lock().start_time_ms = Utc::now().timestamp_millis();
        let started = Instant::now();

        let pools = source.block_pool_ids();
        if pools.is_empty() {
            info!("no block pools on {}; nothing to move", pair.source_path());
            return;
        }

        let mut iters: Vec<Box<dyn BlockIterator>> = Vec::with_capacity(pools.len());
        for pool in &pools {
            match source.block_iterator(pool, "disk-balancer") {
                Ok(iter) => iters.push(iter),
                Err(err) => {
                    warn!(
                        "failed to open block iterator for pool {pool} on {}: {err}",
                        pair.source_path()
                    );
                    item.lock().error_count += 1;
                }
            }
        }
        if iters.is_empty() {
            warn!("no readable block pools on {}", pair.source_path());
            return;
        }

        while self.should_run() {
            {
                let mut guard = item.lock();
                if guard.error_count > self.effective_max_errors(&guard) {
                    guard.err_msg = Some(ERR_COUNT_EXCEEDED.to_string());
                    error!("error count exceeded for {pair:?}; abandoning pair");
                    break;
                }
                if self.is_close_enough(&guard) {
                    debug!(
                        "copied {} of {} bytes for {pair:?}; close enough",
                        guard.bytes_copied, guard.bytes_to_copy
                    );
                    break;
                }
            }

            let Some(block) = self.next_block(&mut iters, item) else {
                info!("no more eligible blocks on {}", pair.source_path());
                break;
            };

            // Cancellation latency bound: one block.
            if !self.should_run() {
                break;
            }

            let bytes_to_copy = item.lock().bytes_to_copy;
            if destination.available() <= bytes_to_copy {
                info!(
                    "destination {} is running out of space ({} available, {} targeted); abandoning pair",
                    pair.destination_path(),
                    destination.available(),
                    bytes_to_copy
                );
                break;
            }

            let begin = Instant::now();
            match self.store.move_block(&block, destination) {
                Ok(()) => {
                    let time_used_ms = begin.elapsed().as_millis() as u64;
                    let delay = {
                        let guard = item.lock();
                        compute_delay(block.num_bytes, time_used_ms, self.effective_bandwidth(&guard))
                    };
                    self.throttle(delay);

                    let mut guard = item.lock();
                    guard.bytes_copied += block.num_bytes;
                    guard.blocks_copied += 1;
                    guard.seconds_elapsed = started.elapsed().as_secs();
                }
                Err(err) => {
                    warn!(
                        "failed to move block {} from pool {} for {pair:?}: {err}",
                        block.block_id, block.pool_id
                    );
                    item.lock().error_count += 1;
                }
            }
        }

        // Iterators close on drop.
        drop(iters);
    }

    /// Round-robin across pools; each pool is tried at most once per
    /// call. The cursor carries over between calls so no pool is
    /// favored across pairs.
    fn next_block(
        &self,
        iters: &mut [Box<dyn BlockIterator>],
        item: &Mutex<WorkItem>,
    ) -> Option<Block> {
        let pool_count = iters.len();
        for _ in 0..pool_count {
            let idx = self.pool_index.fetch_add(1, Ordering::Relaxed) % pool_count;
            if let Some(block) = self.next_block_from(iters[idx].as_mut(), item) {
                return Some(block);
            }
        }
        None
    }

    /// First finalized block that fits within the remaining target plus
    /// tolerance slack (first-fit, not best-fit). Per-block I/O errors
    /// are accounted and iteration continues.
    fn next_block_from(
        &self,
        iter: &mut dyn BlockIterator,
        item: &Mutex<WorkItem>,
    ) -> Option<Block> {
        loop {
            {
                let mut guard = item.lock();
                if guard.error_count >= self.effective_max_errors(&guard) {
                    guard.err_msg = Some(ERR_COUNT_EXCEEDED.to_string());
                    return None;
                }
            }
            match iter.next_block() {
                Ok(Some(block)) => {
                    if !self.store.is_valid_block(&block) {
                        debug!("skipping non-finalized block {}", block.block_id);
                        continue;
                    }
                    let guard = item.lock();
                    if block_fits(block.num_bytes, &guard, self.effective_tolerance(&guard)) {
                        return Some(block);
                    }
                }
                Ok(None) => return None,
                Err(err) => {
                    warn!("block iteration error: {err}");
                    item.lock().error_count += 1;
                }
            }
        }
    }

    fn is_close_enough(&self, item: &WorkItem) -> bool {
        close_enough(item, self.effective_tolerance(item))
    }

    fn effective_bandwidth(&self, item: &WorkItem) -> u64 {
        if item.bandwidth > 0 {
            item.bandwidth
        } else {
            self.bandwidth_mb
        }
    }

    fn effective_tolerance(&self, item: &WorkItem) -> u64 {
        if item.tolerance_percent > 0 {
            item.tolerance_percent
        } else {
            self.tolerance_percent
        }
    }

    fn effective_max_errors(&self, item: &WorkItem) -> u64 {
        item.max_disk_errors.unwrap_or(self.max_disk_errors)
    }

    /// Sliced sleep that ends early when the run flag drops, so
    /// cancellation is not held up by a long delay.
    fn throttle(&self, delay_ms: u64) {
        let mut remaining = delay_ms;
        while remaining > 0 && self.should_run() {
            let slice = remaining.min(SLEEP_SLICE_MS);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
    }
}

/// True once the inflated copied count covers the target. Avoids
/// chasing a final small block that may not exist.
fn close_enough(item: &WorkItem, tolerance_percent: u64) -> bool {
    let threshold = item.bytes_copied + item.bytes_copied * tolerance_percent / 100;
    item.bytes_to_copy < threshold
}

fn block_fits(num_bytes: u64, item: &WorkItem, tolerance_percent: u64) -> bool {
    let remaining = item.bytes_to_copy.saturating_sub(item.bytes_copied);
    num_bytes <= remaining + remaining * tolerance_percent / 100
}

/// Post-move delay in milliseconds. Whole-second integer arithmetic:
/// sub-second readings never throttle, which is tolerated because
/// shaping averages over many blocks.
fn compute_delay(bytes_copied: u64, time_used_ms: u64, bandwidth_mb: u64) -> u64 {
    if time_used_ms == 0 {
        return 0;
    }
    let seconds = time_used_ms / 1000;
    if seconds == 0 {
        return 0;
    }
    let mb = bytes_copied / MEGABYTE;
    let last_throughput = mb / seconds;
    let target_seconds = mb / bandwidth_mb.max(1);
    target_seconds.saturating_sub(last_throughput) * 1000
}
