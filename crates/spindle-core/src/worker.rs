//! Plan lifecycle: single-plan exclusivity, status, cancellation.
//!
//! One mutex serializes every public operation. The mover runs on a
//! dedicated thread owned by the worker; at most one exists at a time,
//! and it is joined with bounded grace windows on cancel and shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::config::BalancerConfig;
use crate::errors::{BalancerError, Result};
use crate::mover::BlockMover;
use crate::plan::BalancePlan;
use crate::verifier::PlanVerifier;
use crate::volume::{BlockStore, BlockVolume};
use crate::work::{PlanState, VolumePair, WorkEntryReport, WorkItem, WorkMap, WorkStatus};

/// Grace window for each stage of executor shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// One joinable background task.
///
/// Completion is observed through the channel: the task thread holds
/// the sender for its whole life, so a disconnect means it finished.
struct MoverExecutor {
    handle: Option<thread::JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl MoverExecutor {
    fn spawn<F>(task: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("disk-balancer-mover".to_string())
            .spawn(move || {
                let _done = done_tx;
                task();
            })
            .map_err(|err| BalancerError::Internal(format!("failed to spawn mover: {err}")))?;
        Ok(Self {
            handle: Some(handle),
            done_rx,
        })
    }

    fn is_done(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Bounded-wait join: one grace window, a second one for good
    /// measure, then give up with an error log. The run flag is the
    /// only thing that can actually stop the loop.
    fn shutdown(mut self) {
        if let Err(RecvTimeoutError::Timeout) = self.done_rx.recv_timeout(SHUTDOWN_GRACE) {
            warn!("mover task did not stop within {SHUTDOWN_GRACE:?}; waiting once more");
            if let Err(RecvTimeoutError::Timeout) = self.done_rx.recv_timeout(SHUTDOWN_GRACE) {
                error!("mover task still running after a second grace window; abandoning it");
                self.handle.take();
                return;
            }
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct LifecycleState {
    enabled: bool,
    plan_id: String,
    result: PlanState,
    work: WorkMap,
    executor: Option<MoverExecutor>,
}

/// The per-node disk-balancing worker.
pub struct DiskBalancer {
    store: Arc<dyn BlockStore>,
    verifier: PlanVerifier,
    mover: Arc<BlockMover>,
    bandwidth_mb: u64,
    state: Mutex<LifecycleState>,
}

impl DiskBalancer {
    pub fn new(node_id: impl Into<String>, store: Arc<dyn BlockStore>, config: &BalancerConfig) -> Self {
        let config = config.clone().validated();
        let mover = Arc::new(BlockMover::new(Arc::clone(&store), &config));
        Self {
            store,
            verifier: PlanVerifier::new(node_id),
            mover,
            bandwidth_mb: config.max_disk_throughput_mb,
            state: Mutex::new(LifecycleState {
                enabled: config.enabled,
                plan_id: String::new(),
                result: PlanState::NoPlan,
                work: WorkMap::new(),
                executor: None,
            }),
        }
    }

    /// Verify and admit a plan, then start moving blocks for it in the
    /// background. Admission failures leave the previous state (and the
    /// previous work map) observable.
    pub fn submit_plan(
        &self,
        plan_id: &str,
        version: u64,
        plan_text: &str,
        force: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        check_enabled(&state)?;
        if state.executor.as_ref().is_some_and(|e| !e.is_done()) {
            info!("rejecting plan {plan_id}: a plan is already in progress");
            return Err(BalancerError::PlanAlreadyInProgress);
        }

        let plan = self.verifier.verify(plan_id, version, plan_text, force)?;
        let work = self.build_work_map(&plan)?;
        let executor = self.launch_mover(&work)?;

        info!(
            "accepted plan {plan_id} for node {} with {} work item(s)",
            self.verifier.node_id(),
            work.len()
        );
        state.work = work;
        state.plan_id = plan_id.to_string();
        state.result = PlanState::UnderProgress;
        state.executor = Some(executor);
        Ok(())
    }

    /// Current state, plan id, and a snapshot of every work entry.
    /// Observes the mover finishing: the under-progress state becomes
    /// done here, at most once.
    pub fn query_work_status(&self) -> Result<WorkStatus> {
        let mut state = self.state.lock();
        check_enabled(&state)?;

        if state.result == PlanState::UnderProgress
            && state.executor.as_ref().map_or(true, |e| e.is_done())
        {
            state.result = PlanState::Done;
        }

        let entries = state
            .work
            .entries()
            .iter()
            .map(|(pair, item)| WorkEntryReport {
                source_path: pair.source_path().to_string(),
                destination_path: pair.destination_path().to_string(),
                work_item: item.lock().clone(),
            })
            .collect();

        Ok(WorkStatus {
            state: state.result,
            plan_id: state.plan_id.clone(),
            entries,
        })
    }

    /// Stop the current plan. The mover is asked to exit and the
    /// executor is joined with bounded grace windows before the state
    /// flips to cancelled.
    pub fn cancel_plan(&self, plan_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        check_enabled(&state)?;

        if state.plan_id.is_empty() || state.plan_id != plan_id {
            warn!("cancel requested for unknown plan {plan_id}");
            return Err(BalancerError::NoSuchPlan(plan_id.to_string()));
        }

        if state.executor.as_ref().is_some_and(|e| !e.is_done()) {
            self.mover.set_exit_flag();
            if let Some(executor) = state.executor.take() {
                executor.shutdown();
            }
            state.result = PlanState::Cancelled;
            info!("cancelled plan {plan_id}");
        }
        Ok(())
    }

    /// Every attached volume, keyed by storage id.
    pub fn volume_names(&self) -> Result<BTreeMap<String, String>> {
        let state = self.state.lock();
        check_enabled(&state)?;
        let volumes = self
            .store
            .volumes()
            .map_err(|err| BalancerError::Internal(format!("volume enumeration failed: {err}")))?;
        Ok(volumes
            .iter()
            .map(|v| (v.storage_id(), v.base_path()))
            .collect())
    }

    /// JSON object mapping storage id to base path.
    pub fn volume_names_json(&self) -> Result<String> {
        let names = self.volume_names()?;
        serde_json::to_string(&names)
            .map_err(|err| BalancerError::Internal(format!("volume name serialization failed: {err}")))
    }

    /// Node-default bandwidth ceiling in MB/s.
    pub fn bandwidth_mb(&self) -> Result<u64> {
        let state = self.state.lock();
        check_enabled(&state)?;
        Ok(self.bandwidth_mb)
    }

    /// Disable the balancer and tear down any running mover task.
    /// Idempotent; node teardown must never fail.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.enabled = false;

        if state.executor.as_ref().is_some_and(|e| !e.is_done()) {
            state.result = PlanState::Cancelled;
            self.mover.set_exit_flag();
        }
        if let Some(executor) = state.executor.take() {
            executor.shutdown();
        }
    }

    /// Translate plan steps into a fresh work map: resolve volumes by
    /// storage id, reject self-moves, coalesce repeated pairs by
    /// summing their byte targets (overrides are last-wins).
    fn build_work_map(&self, plan: &BalancePlan) -> Result<WorkMap> {
        let volumes = self
            .store
            .volumes()
            .map_err(|err| BalancerError::Internal(format!("volume enumeration failed: {err}")))?;
        let by_id: HashMap<String, Arc<dyn BlockVolume>> = volumes
            .into_iter()
            .map(|v| (v.storage_id(), v))
            .collect();

        let mut work = WorkMap::new();
        for step in &plan.steps {
            let source = by_id
                .get(&step.source_volume)
                .ok_or_else(|| BalancerError::InvalidVolume(step.source_volume.clone()))?;
            let destination = by_id
                .get(&step.destination_volume)
                .ok_or_else(|| BalancerError::InvalidVolume(step.destination_volume.clone()))?;

            let pair = VolumePair::new(Arc::clone(source), Arc::clone(destination));
            if pair.source_path() == pair.destination_path() {
                return Err(BalancerError::InvalidMove(format!(
                    "{} -> {}",
                    step.source_volume, step.destination_volume
                )));
            }

            if let Some(item) = work.get(&pair) {
                let mut guard = item.lock();
                guard.bytes_to_copy += step.bytes_to_move;
                guard.bandwidth = step.bandwidth;
                guard.tolerance_percent = step.tolerance_percent;
                guard.max_disk_errors = step.max_disk_errors;
            } else {
                work.push(pair, WorkItem::for_step(step));
            }
        }
        Ok(work)
    }

    fn launch_mover(&self, work: &WorkMap) -> Result<MoverExecutor> {
        let mover = Arc::clone(&self.mover);
        let entries = work.entries().to_vec();
        mover.set_runnable();
        MoverExecutor::spawn(move || {
            for (pair, item) in &entries {
                if !mover.should_run() {
                    break;
                }
                mover.copy_blocks(pair, item);
            }
        })
    }
}

fn check_enabled(state: &LifecycleState) -> Result<()> {
    if !state.enabled {
        return Err(BalancerError::NotEnabled);
    }
    Ok(())
}
