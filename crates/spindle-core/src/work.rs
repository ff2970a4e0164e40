//! Work accounting: pair keys, per-pair accumulators, status snapshots.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::plan::MoveStep;
use crate::volume::BlockVolume;

/// Work-map key: one (source, destination) volume pair.
///
/// Identity is the volumes' base paths, never pointer identity, so two
/// distinct references to the same device collide in the work map.
#[derive(Clone)]
pub struct VolumePair {
    source: Arc<dyn BlockVolume>,
    destination: Arc<dyn BlockVolume>,
    source_path: String,
    destination_path: String,
}

impl VolumePair {
    pub fn new(source: Arc<dyn BlockVolume>, destination: Arc<dyn BlockVolume>) -> Self {
        let source_path = source.base_path();
        let destination_path = destination.base_path();
        Self {
            source,
            destination,
            source_path,
            destination_path,
        }
    }

    pub fn source(&self) -> &Arc<dyn BlockVolume> {
        &self.source
    }

    pub fn destination(&self) -> &Arc<dyn BlockVolume> {
        &self.destination
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn destination_path(&self) -> &str {
        &self.destination_path
    }
}

impl PartialEq for VolumePair {
    fn eq(&self, other: &Self) -> bool {
        self.source_path == other.source_path && self.destination_path == other.destination_path
    }
}

impl Eq for VolumePair {}

impl Hash for VolumePair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_path.hash(state);
        self.destination_path.hash(state);
    }
}

impl fmt::Debug for VolumePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_path, self.destination_path)
    }
}

/// Mutable per-pair accumulator. Counters are mutated only by the mover
/// task; status queries snapshot a clone under the per-pair lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub bytes_to_copy: u64,
    pub bytes_copied: u64,
    pub blocks_copied: u64,
    pub error_count: u64,
    /// MB/s ceiling; 0 inherits the node default.
    pub bandwidth: u64,
    /// Percent slack; 0 inherits the node default.
    pub tolerance_percent: u64,
    /// Error budget; absent inherits the node default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_disk_errors: Option<u64>,
    /// Wall clock when the mover started this pair, ms since the epoch.
    pub start_time_ms: i64,
    pub seconds_elapsed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

impl WorkItem {
    /// Fresh accumulator for one plan step.
    pub fn for_step(step: &MoveStep) -> Self {
        Self {
            bytes_to_copy: step.bytes_to_move,
            bandwidth: step.bandwidth,
            tolerance_percent: step.tolerance_percent,
            max_disk_errors: step.max_disk_errors,
            ..Self::default()
        }
    }
}

pub type SharedWorkItem = Arc<Mutex<WorkItem>>;

/// Plan-ordered mapping from volume pair to work item.
///
/// Plans hold a handful of steps, so lookup is a linear scan; what
/// matters is that iteration preserves plan order.
#[derive(Clone, Default)]
pub struct WorkMap {
    entries: Vec<(VolumePair, SharedWorkItem)>,
}

impl WorkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pair: &VolumePair) -> Option<&SharedWorkItem> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == pair)
            .map(|(_, item)| item)
    }

    pub fn push(&mut self, pair: VolumePair, item: WorkItem) {
        self.entries.push((pair, Arc::new(Mutex::new(item))));
    }

    pub fn entries(&self) -> &[(VolumePair, SharedWorkItem)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Worker lifecycle state as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanState {
    #[serde(rename = "NO_PLAN")]
    NoPlan,
    #[serde(rename = "PLAN_UNDER_PROGRESS")]
    UnderProgress,
    #[serde(rename = "PLAN_DONE")]
    Done,
    #[serde(rename = "PLAN_CANCELLED")]
    Cancelled,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanState::NoPlan => "NO_PLAN",
            PlanState::UnderProgress => "PLAN_UNDER_PROGRESS",
            PlanState::Done => "PLAN_DONE",
            PlanState::Cancelled => "PLAN_CANCELLED",
        };
        f.write_str(name)
    }
}

/// One work-map entry as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkEntryReport {
    pub source_path: String,
    pub destination_path: String,
    pub work_item: WorkItem,
}

/// Snapshot returned by `query_work_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    pub state: PlanState,
    pub plan_id: String,
    pub entries: Vec<WorkEntryReport>,
}

impl WorkStatus {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
