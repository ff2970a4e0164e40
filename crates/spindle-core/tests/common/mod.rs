//! In-memory volumes and block store for exercising the worker without
//! real disks.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use spindle_core::plan::{plan_id_of, BalancePlan, MoveStep};
use spindle_core::volume::{Block, BlockIterator, BlockStore, BlockVolume};
use spindle_core::work::{PlanState, WorkStatus};
use spindle_core::{BalancerConfig, DiskBalancer};

pub const MB: u64 = 1024 * 1024;

pub struct MemVolume {
    storage_id: String,
    base_path: String,
    transient: bool,
    capacity: u64,
    used: AtomicU64,
    pools: Mutex<BTreeMap<String, Vec<Block>>>,
}

impl MemVolume {
    pub fn new(storage_id: &str, base_path: &str, capacity: u64) -> Arc<Self> {
        Arc::new(Self {
            storage_id: storage_id.to_string(),
            base_path: base_path.to_string(),
            transient: false,
            capacity,
            used: AtomicU64::new(0),
            pools: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn transient(storage_id: &str, base_path: &str, capacity: u64) -> Arc<Self> {
        Arc::new(Self {
            storage_id: storage_id.to_string(),
            base_path: base_path.to_string(),
            transient: true,
            capacity,
            used: AtomicU64::new(0),
            pools: Mutex::new(BTreeMap::new()),
        })
    }

    /// Seed `count` blocks of `num_bytes` each, ids starting at `first_id`.
    pub fn add_blocks(&self, pool_id: &str, first_id: u64, count: u64, num_bytes: u64) {
        let mut pools = self.pools.lock();
        let blocks = pools.entry(pool_id.to_string()).or_default();
        for i in 0..count {
            blocks.push(Block {
                pool_id: pool_id.to_string(),
                block_id: first_id + i,
                num_bytes,
            });
        }
        self.used.fetch_add(count * num_bytes, Ordering::Relaxed);
    }

    pub fn add_empty_pool(&self, pool_id: &str) {
        self.pools.lock().entry(pool_id.to_string()).or_default();
    }

    pub fn block_count(&self, pool_id: &str) -> usize {
        self.pools
            .lock()
            .get(pool_id)
            .map_or(0, |blocks| blocks.len())
    }

    pub fn holds_block(&self, block_id: u64) -> bool {
        self.pools
            .lock()
            .values()
            .any(|blocks| blocks.iter().any(|b| b.block_id == block_id))
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }
}

impl BlockVolume for MemVolume {
    fn storage_id(&self) -> String {
        self.storage_id.clone()
    }

    fn base_path(&self) -> String {
        self.base_path.clone()
    }

    fn block_pool_ids(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }

    fn block_iterator(&self, pool_id: &str, _tag: &str) -> io::Result<Box<dyn BlockIterator>> {
        let blocks = self
            .pools
            .lock()
            .get(pool_id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown pool"))?;
        Ok(Box::new(MemIterator {
            blocks: blocks.into_iter(),
        }))
    }

    fn is_transient(&self) -> bool {
        self.transient
    }

    fn available(&self) -> u64 {
        self.capacity.saturating_sub(self.used.load(Ordering::Relaxed))
    }
}

struct MemIterator {
    blocks: std::vec::IntoIter<Block>,
}

impl BlockIterator for MemIterator {
    fn next_block(&mut self) -> io::Result<Option<Block>> {
        Ok(self.blocks.next())
    }
}

pub struct MemStore {
    volumes: Vec<Arc<MemVolume>>,
    move_delay: Mutex<Option<Duration>>,
    fail_moves: AtomicBool,
    invalid_blocks: Mutex<HashSet<u64>>,
    moves: AtomicU64,
}

impl MemStore {
    pub fn new(volumes: Vec<Arc<MemVolume>>) -> Arc<Self> {
        Arc::new(Self {
            volumes,
            move_delay: Mutex::new(None),
            fail_moves: AtomicBool::new(false),
            invalid_blocks: Mutex::new(HashSet::new()),
            moves: AtomicU64::new(0),
        })
    }

    /// Slow every move down, e.g. to keep a plan running while the test
    /// cancels it.
    pub fn set_move_delay(&self, delay: Duration) {
        *self.move_delay.lock() = Some(delay);
    }

    pub fn fail_all_moves(&self) {
        self.fail_moves.store(true, Ordering::Release);
    }

    pub fn mark_invalid(&self, block_id: u64) {
        self.invalid_blocks.lock().insert(block_id);
    }

    pub fn move_count(&self) -> u64 {
        self.moves.load(Ordering::Relaxed)
    }

    fn volume_by_path(&self, path: &str) -> Option<&Arc<MemVolume>> {
        self.volumes.iter().find(|v| v.base_path == path)
    }
}

impl BlockStore for MemStore {
    fn volumes(&self) -> io::Result<Vec<Arc<dyn BlockVolume>>> {
        Ok(self
            .volumes
            .iter()
            .map(|v| Arc::clone(v) as Arc<dyn BlockVolume>)
            .collect())
    }

    fn is_valid_block(&self, block: &Block) -> bool {
        !self.invalid_blocks.lock().contains(&block.block_id)
    }

    fn move_block(&self, block: &Block, destination: &Arc<dyn BlockVolume>) -> io::Result<()> {
        if let Some(delay) = *self.move_delay.lock() {
            thread::sleep(delay);
        }
        if self.fail_moves.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected move failure"));
        }

        let source = self
            .volumes
            .iter()
            .find(|v| v.holds_block(block.block_id))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "block not on any volume"))?;
        {
            let mut pools = source.pools.lock();
            if let Some(blocks) = pools.get_mut(&block.pool_id) {
                blocks.retain(|b| b.block_id != block.block_id);
            }
        }
        source.used.fetch_sub(block.num_bytes, Ordering::Relaxed);

        let dest = self
            .volume_by_path(&destination.base_path())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown destination"))?;
        dest.pools
            .lock()
            .entry(block.pool_id.clone())
            .or_default()
            .push(block.clone());
        dest.used.fetch_add(block.num_bytes, Ordering::Relaxed);

        self.moves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub fn step(source: &str, destination: &str, bytes: u64) -> MoveStep {
    MoveStep {
        source_volume: source.to_string(),
        destination_volume: destination.to_string(),
        bytes_to_move: bytes,
        bandwidth: 0,
        tolerance_percent: 0,
        max_disk_errors: None,
    }
}

/// Serialize a fresh plan and return `(plan_text, plan_id)`.
pub fn plan_with_steps(node_id: &str, steps: Vec<MoveStep>) -> (String, String) {
    let plan = BalancePlan {
        version: 1,
        node_id: node_id.to_string(),
        timestamp_ms: Utc::now().timestamp_millis(),
        steps,
    };
    let text = plan.to_json().unwrap();
    let id = plan_id_of(&text);
    (text, id)
}

pub fn simple_plan(node_id: &str, source: &str, destination: &str, bytes: u64) -> (String, String) {
    plan_with_steps(node_id, vec![step(source, destination, bytes)])
}

pub fn enabled_config() -> BalancerConfig {
    BalancerConfig {
        enabled: true,
        ..BalancerConfig::default()
    }
}

/// Poll status until the mover settles (anything but under-progress).
pub fn wait_until_settled(balancer: &DiskBalancer) -> WorkStatus {
    for _ in 0..2_000 {
        let status = balancer.query_work_status().unwrap();
        if status.state != PlanState::UnderProgress {
            return status;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("mover task did not settle in time");
}
