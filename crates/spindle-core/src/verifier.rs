//! Plan admission checks.
//!
//! Order: version, hash + parse, timestamp (unless forced), node
//! identity. First failure wins and nothing about the worker changes.

use chrono::Utc;
use log::warn;

use crate::errors::{BalancerError, Result};
use crate::plan::{plan_id_of, BalancePlan, PLAN_ID_LEN};

pub const MIN_PLAN_VERSION: u64 = 1;
pub const MAX_PLAN_VERSION: u64 = 1;
/// Plans older than this are rejected unless submission is forced.
pub const VALID_PLAN_HOURS: i64 = 24;

pub struct PlanVerifier {
    node_id: String,
}

impl PlanVerifier {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Run every admission check and return the parsed plan.
    pub fn verify(
        &self,
        plan_id: &str,
        version: u64,
        plan_text: &str,
        force: bool,
    ) -> Result<BalancePlan> {
        verify_version(version)?;
        let plan = verify_hash(plan_id, plan_text)?;
        if !force {
            verify_timestamp(&plan)?;
        }
        self.verify_node_id(&plan)?;
        Ok(plan)
    }

    fn verify_node_id(&self, plan: &BalancePlan) -> Result<()> {
        if plan.node_id.is_empty() || plan.node_id != self.node_id {
            warn!(
                "rejecting plan for node {}, this node is {}",
                plan.node_id, self.node_id
            );
            return Err(BalancerError::NodeIdMismatch {
                expected: self.node_id.clone(),
                actual: plan.node_id.clone(),
            });
        }
        Ok(())
    }
}

fn verify_version(version: u64) -> Result<()> {
    if !(MIN_PLAN_VERSION..=MAX_PLAN_VERSION).contains(&version) {
        warn!("rejecting plan with unsupported version {version}");
        return Err(BalancerError::InvalidPlanVersion { version });
    }
    Ok(())
}

fn verify_hash(plan_id: &str, plan_text: &str) -> Result<BalancePlan> {
    if plan_text.is_empty() {
        return Err(BalancerError::InvalidPlan("plan text is empty".into()));
    }
    let computed = plan_id_of(plan_text);
    if plan_id.len() != PLAN_ID_LEN || !plan_id.eq_ignore_ascii_case(&computed) {
        warn!("rejecting plan: id does not match the submitted text");
        return Err(BalancerError::InvalidPlanHash(plan_id.to_string()));
    }
    BalancePlan::from_json(plan_text).map_err(|err| BalancerError::MalformedPlan(err.to_string()))
}

fn verify_timestamp(plan: &BalancePlan) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    let deadline = plan
        .timestamp_ms
        .saturating_add(VALID_PLAN_HOURS * 3_600_000);
    if deadline < now {
        warn!(
            "rejecting plan from {}: older than {VALID_PLAN_HOURS} hours",
            plan.timestamp_ms
        );
        return Err(BalancerError::OldPlanSubmitted {
            timestamp_ms: plan.timestamp_ms,
        });
    }
    Ok(())
}
