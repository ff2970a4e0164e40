//! Storage abstraction consumed by the worker.
//!
//! The data node owns the real volumes; the balancer programs against
//! these traits and never assumes a concrete backend.

use std::io;
use std::sync::Arc;

/// One unit of storage, identified by pool and block id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub pool_id: String,
    pub block_id: u64,
    pub num_bytes: u64,
}

/// Iterator over the blocks of one pool on one volume.
///
/// `Ok(None)` means the pool is exhausted. Errors are accounted against
/// the work item's error budget by the caller; iteration may continue
/// after an error.
pub trait BlockIterator: Send {
    fn next_block(&mut self) -> io::Result<Option<Block>>;
}

/// A storage device attached to this node.
pub trait BlockVolume: Send + Sync {
    /// Stable storage id the planner addresses this volume by.
    fn storage_id(&self) -> String;

    /// Mount/base path. Doubles as the volume's identity in work-map
    /// keys, so it must be stable for the duration of one plan.
    fn base_path(&self) -> String;

    /// Block pools hosted on this volume.
    fn block_pool_ids(&self) -> Vec<String>;

    /// Open a fresh iterator over one pool. `tag` names the consumer
    /// for diagnostics.
    fn block_iterator(&self, pool_id: &str, tag: &str) -> io::Result<Box<dyn BlockIterator>>;

    /// Whether this volume is an in-memory tier. Transient tiers are
    /// never balanced.
    fn is_transient(&self) -> bool;

    /// Bytes currently free on this volume.
    fn available(&self) -> u64;
}

/// The node's dataset: volume enumeration plus the block-move primitive.
pub trait BlockStore: Send + Sync {
    fn volumes(&self) -> io::Result<Vec<Arc<dyn BlockVolume>>>;

    /// False for blocks still being written; those are never moved.
    fn is_valid_block(&self, block: &Block) -> bool;

    /// Copy `block` onto `destination`, blocking for the duration.
    fn move_block(&self, block: &Block, destination: &Arc<dyn BlockVolume>) -> io::Result<()>;
}
