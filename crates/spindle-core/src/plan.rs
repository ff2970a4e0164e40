//! Plan documents and their JSON wire format.
//!
//! A plan is produced by an external planner, serialized as JSON, and
//! identified by the SHA-512 of that exact text. The worker re-hashes
//! the submitted text, so any canonicalization is the planner's
//! business, not ours.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

/// Length of a plan ID: a SHA-512 digest in hex.
pub const PLAN_ID_LEN: usize = 128;

/// One source -> destination move in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStep {
    /// Storage id of the volume to drain.
    pub source_volume: String,
    /// Storage id of the volume to fill.
    pub destination_volume: String,
    pub bytes_to_move: u64,
    /// MB/s ceiling for this step; 0 inherits the node default.
    #[serde(default)]
    pub bandwidth: u64,
    /// Percent slack for this step; 0 inherits the node default.
    #[serde(default)]
    pub tolerance_percent: u64,
    /// Error budget for this step; absent inherits the node default.
    /// An explicit 0 is honored and abandons the pair on first error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_disk_errors: Option<u64>,
}

/// A versioned, timestamped, node-targeted instruction set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancePlan {
    pub version: u64,
    /// UUID of the node this plan was computed for.
    pub node_id: String,
    /// Planner wall clock, milliseconds since the epoch.
    pub timestamp_ms: i64,
    #[serde(default)]
    pub steps: Vec<MoveStep>,
}

impl BalancePlan {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Total bytes this plan asks to shift, across all steps.
    pub fn total_bytes(&self) -> u64 {
        self.steps
            .iter()
            .fold(0u64, |acc, step| acc.saturating_add(step.bytes_to_move))
    }
}

/// SHA-512 of the UTF-8 plan text, as lowercase hex.
pub fn plan_id_of(plan_text: &str) -> String {
    hex::encode(Sha512::digest(plan_text.as_bytes()))
}
