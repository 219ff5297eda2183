//! Main scheduler logic

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use volsched_cluster::ClusterApi;
use volsched_core::{BackupTarget, NodeId, VolschedError, VolschedResult, VolumeId};

use crate::cancel::cancellable;
use crate::capacity::NodeCapacityTracker;
use crate::launcher::JobLauncher;
use crate::poller::{ActiveJobs, CompletionPoller, JobOutcome};
use crate::policy::{RetryDecision, RetryPolicy, SchedulePolicy};
use crate::report::{
    AbandonedVolume, BackupReport, CompletedVolume, FailedVolume, InterruptedVolume,
};
use crate::topology::TopologyResolver;

/// A volume waiting to be admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVolume {
    pub volume_id: VolumeId,
    /// Failed resolution or launch attempts so far
    pub attempts: u32,
    /// Not to be retried before this instant
    pub not_before: Option<Instant>,
    pub last_error: Option<String>,
}

impl PendingVolume {
    fn new(volume_id: VolumeId) -> Self {
        Self {
            volume_id,
            attempts: 0,
            not_before: None,
            last_error: None,
        }
    }
}

/// What happened during one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub pass: u64,
    pub completed: usize,
    pub failed: usize,
    pub admitted: usize,
    /// Skipped because their retry delay has not passed
    pub deferred: usize,
    pub unresolved: usize,
    /// Requeued because their node was at its limit
    pub saturated: usize,
    pub launch_failures: usize,
    pub abandoned: usize,
}

/// Mutable state of one run, owned by the scheduling loop
#[derive(Debug)]
pub struct RunState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    pending: VecDeque<PendingVolume>,
    active: ActiveJobs,
    capacity: NodeCapacityTracker,
    resolver: TopologyResolver,
    completed: Vec<CompletedVolume>,
    failed: Vec<FailedVolume>,
    abandoned: Vec<AbandonedVolume>,
    topology_degraded: bool,
    limit_known: bool,
    passes: u64,
}

impl RunState {
    /// Queue the volumes in order; repeated ids keep their first position
    pub fn new(volumes: impl IntoIterator<Item = VolumeId>) -> Self {
        let mut seen = HashSet::new();
        let mut pending = VecDeque::new();
        for volume_id in volumes {
            if seen.insert(volume_id) {
                pending.push_back(PendingVolume::new(volume_id));
            } else {
                warn!(volume_id = volume_id, "Duplicate volume in input ignored");
            }
        }

        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            pending,
            active: ActiveJobs::new(),
            capacity: NodeCapacityTracker::new(1),
            resolver: TopologyResolver::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            abandoned: Vec::new(),
            topology_degraded: false,
            limit_known: false,
            passes: 0,
        }
    }

    /// Volume ids still pending, in queue order
    pub fn pending_volumes(&self) -> Vec<VolumeId> {
        self.pending.iter().map(|p| p.volume_id).collect()
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    pub fn capacity(&self) -> &NodeCapacityTracker {
        &self.capacity
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Nothing pending and nothing in flight
    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    fn record(&mut self, outcome: JobOutcome) {
        let elapsed_secs = outcome.elapsed.as_secs_f64();
        if outcome.is_success() {
            self.completed.push(CompletedVolume {
                volume_id: outcome.job.volume_id,
                node_id: outcome.job.node_id,
                elapsed_secs,
            });
        } else {
            self.failed.push(FailedVolume {
                volume_id: outcome.job.volume_id,
                node_id: outcome.job.node_id,
                detail: outcome.detail.unwrap_or_default(),
                elapsed_secs,
            });
        }
    }

    /// Requeue a volume after a failed attempt, or abandon it. Returns true when abandoned.
    fn retry_or_abandon(
        &mut self,
        retry: &RetryPolicy,
        mut entry: PendingVolume,
        reason: String,
        requeue: &mut VecDeque<PendingVolume>,
        now: Instant,
    ) -> bool {
        entry.attempts += 1;
        match retry.decide(entry.attempts) {
            RetryDecision::RetryAfter(delay) => {
                entry.not_before = (!delay.is_zero()).then(|| now + delay);
                entry.last_error = Some(reason);
                requeue.push_back(entry);
                false
            }
            RetryDecision::GiveUp => {
                warn!(
                    volume_id = entry.volume_id,
                    attempts = entry.attempts,
                    reason = %reason,
                    "Giving up on volume"
                );
                self.abandoned.push(AbandonedVolume {
                    volume_id: entry.volume_id,
                    attempts: entry.attempts,
                    reason,
                });
                true
            }
        }
    }

    /// Put the unprocessed rest of the queue back behind what was already requeued
    fn restore_pending(&mut self, mut requeue: VecDeque<PendingVolume>, current: PendingVolume) {
        requeue.push_back(current);
        requeue.extend(self.pending.drain(..));
        self.pending = requeue;
    }
}

/// Node-aware admission scheduler for bulk backup jobs
///
/// Only one scheduler may drive a given cluster at a time: node load is
/// tracked locally and jobs started by anyone else are not seen.
pub struct BackupScheduler {
    cluster: Arc<dyn ClusterApi>,
    launcher: JobLauncher,
    poller: CompletionPoller,
    policy: SchedulePolicy,
}

impl BackupScheduler {
    /// Create a new scheduler
    pub fn new(cluster: Arc<dyn ClusterApi>, target: BackupTarget, policy: SchedulePolicy) -> Self {
        info!(
            destination = %target.destination,
            poll_interval_secs = policy.poll_interval.as_secs_f64(),
            concurrent_poll = policy.concurrent_poll,
            "Scheduler initialized"
        );

        Self {
            cluster,
            launcher: JobLauncher::new(target),
            poller: CompletionPoller::new(policy.concurrent_poll),
            policy,
        }
    }

    /// Back up every volume, returning once all have finished or the token is cancelled
    pub async fn run(
        &self,
        volumes: impl IntoIterator<Item = VolumeId>,
        cancel: &CancellationToken,
    ) -> BackupReport {
        let mut state = RunState::new(volumes);
        info!(
            run_id = %state.run_id,
            volumes = state.pending.len(),
            "Starting backup run"
        );

        if let Err(e) = self.prepare(&mut state, cancel).await {
            debug!(error = %e, "Run stopped during startup");
            return self.finish(state, true);
        }

        while !state.is_done() {
            match self.run_pass(&mut state, cancel).await {
                Ok(summary) => debug!(
                    pass = summary.pass,
                    completed = summary.completed,
                    failed = summary.failed,
                    admitted = summary.admitted,
                    deferred = summary.deferred,
                    unresolved = summary.unresolved,
                    saturated = summary.saturated,
                    launch_failures = summary.launch_failures,
                    active = state.active.len(),
                    pending = state.pending.len(),
                    "Pass finished"
                ),
                Err(e) => {
                    debug!(error = %e, "Run stopped");
                    return self.finish(state, true);
                }
            }

            if state.is_done() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish(state, true),
                _ = tokio::time::sleep(self.policy.next_wait()) => {}
            }
        }

        self.finish(state, false)
    }

    /// Fetch the cluster limits and the initial topology mapping
    pub async fn prepare(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> VolschedResult<()> {
        let cluster_max = match cancellable(cancel, self.cluster.get_limits()).await {
            Ok(limits) => limits.bulk_volume_jobs_per_node_max,
            Err(VolschedError::Cancelled) => return Err(VolschedError::Cancelled),
            Err(e) => {
                warn!(
                    error = %e,
                    default_max = self.policy.limits.default_max,
                    "Failed to get cluster limits, using default maximum"
                );
                0
            }
        };

        state.capacity = NodeCapacityTracker::from_cluster_max(&self.policy.limits, cluster_max);
        state.limit_known = true;
        info!(
            cluster_max = cluster_max,
            reserve = self.policy.limits.reserve,
            limit = state.capacity.limit(),
            "Per-node backup job limit"
        );

        let mapping = state.resolver.build_mapping(&*self.cluster, cancel).await?;
        state.topology_degraded = mapping.degraded;
        Ok(())
    }

    /// One iteration: retire finished jobs, then admit what fits
    ///
    /// Only cancellation is returned as an error; the state stays consistent
    /// and unprocessed volumes remain pending.
    pub async fn run_pass(
        &self,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> VolschedResult<PassSummary> {
        state.passes += 1;
        state.resolver.begin_pass();
        let mut summary = PassSummary {
            pass: state.passes,
            ..PassSummary::default()
        };

        let round = self
            .poller
            .poll_all(&*self.cluster, &mut state.active, &mut state.capacity, cancel)
            .await;
        for outcome in round.outcomes {
            if outcome.is_success() {
                summary.completed += 1;
            } else {
                summary.failed += 1;
            }
            state.record(outcome);
        }
        if round.cancelled {
            return Err(VolschedError::Cancelled);
        }

        let now = Instant::now();
        let retry = self.policy.retry;
        let mut requeue = VecDeque::with_capacity(state.pending.len());

        while let Some(entry) = state.pending.pop_front() {
            let volume_id = entry.volume_id;

            if entry.not_before.is_some_and(|t| t > now) {
                summary.deferred += 1;
                requeue.push_back(entry);
                continue;
            }

            let node_id: NodeId = match state
                .resolver
                .resolve_node(&*self.cluster, volume_id, cancel)
                .await
            {
                Ok(Some(node_id)) => node_id,
                Ok(None) => {
                    summary.unresolved += 1;
                    let reason = VolschedError::Unresolved(volume_id).to_string();
                    if state.retry_or_abandon(&retry, entry, reason, &mut requeue, now) {
                        summary.abandoned += 1;
                    }
                    continue;
                }
                Err(e) => {
                    state.restore_pending(requeue, entry);
                    return Err(e);
                }
            };

            if !state.capacity.can_admit(node_id) {
                debug!(
                    volume_id = volume_id,
                    node_id = node_id,
                    active = state.capacity.active_count(node_id),
                    limit = state.capacity.limit(),
                    "Node at limit, requeueing volume"
                );
                summary.saturated += 1;
                requeue.push_back(entry);
                continue;
            }

            match self
                .launcher
                .start_job(&*self.cluster, volume_id, node_id, cancel)
                .await
            {
                Ok(job) => {
                    state.capacity.on_admit(node_id);
                    info!(
                        volume_id = volume_id,
                        node_id = node_id,
                        handle = job.handle,
                        load = %format!(
                            "{}/{}",
                            state.capacity.active_count(node_id),
                            state.capacity.limit()
                        ),
                        "Starting backup"
                    );
                    state.active.insert(volume_id, job);
                    summary.admitted += 1;
                }
                Err(VolschedError::Cancelled) => {
                    state.restore_pending(requeue, entry);
                    return Err(VolschedError::Cancelled);
                }
                Err(e) => {
                    if matches!(e, VolschedError::JobStart { .. }) {
                        warn!(
                            volume_id = volume_id,
                            node_id = node_id,
                            error = %e,
                            "Failed to start backup, requeueing"
                        );
                    } else {
                        error!(
                            volume_id = volume_id,
                            node_id = node_id,
                            error = %e,
                            "Unexpected error starting backup, requeueing"
                        );
                    }
                    summary.launch_failures += 1;
                    if state.retry_or_abandon(&retry, entry, e.to_string(), &mut requeue, now) {
                        summary.abandoned += 1;
                    }
                }
            }
        }

        state.pending = requeue;
        Ok(summary)
    }

    /// Close the run and build its report
    pub fn finish(&self, state: RunState, cancelled: bool) -> BackupReport {
        let interrupted: Vec<InterruptedVolume> = state
            .active
            .values()
            .map(|job| InterruptedVolume {
                volume_id: job.volume_id,
                node_id: job.node_id,
                handle: job.handle,
                started_at: job.started_wall,
            })
            .collect();
        let pending = state.pending.iter().map(|p| p.volume_id).collect();

        let report = BackupReport {
            run_id: state.run_id,
            started_at: state.started_at,
            finished_at: Utc::now(),
            effective_limit: state.limit_known.then(|| state.capacity.limit()),
            passes: state.passes,
            topology_degraded: state.topology_degraded,
            completed: state.completed,
            failed: state.failed,
            abandoned: state.abandoned,
            interrupted,
            pending,
            cancelled,
        };

        if cancelled {
            warn!(
                run_id = %report.run_id,
                interrupted = report.interrupted.len(),
                pending = report.pending.len(),
                "Backup run cancelled, started jobs keep running on the cluster"
            );
        }
        info!(
            run_id = %report.run_id,
            passes = report.passes,
            completed = report.completed.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Backup run finished"
        );

        report
    }
}
