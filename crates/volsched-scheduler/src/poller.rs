//! Completion polling for in-flight backup jobs

use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use volsched_cluster::AsyncJobApi;
use volsched_core::{
    AsyncHandle, AsyncJobStatus, RemoteJobState, VolschedError, VolschedResult, VolumeId,
};

use crate::cancel::cancellable;
use crate::capacity::NodeCapacityTracker;
use crate::launcher::{Job, JobStatus};

/// In-flight jobs keyed by volume
pub type ActiveJobs = BTreeMap<VolumeId, Job>;

/// A job that reached a terminal state
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: Job,
    pub elapsed: Duration,
    /// Error detail reported by the cluster, verbatim
    pub detail: Option<String>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.job.status == JobStatus::Complete
    }
}

/// Result of one polling round
#[derive(Debug, Default)]
pub struct PollRound {
    /// Jobs that reached a terminal state, already removed from the active set
    pub outcomes: Vec<JobOutcome>,
    /// The round stopped early on cancellation; unpolled jobs are untouched
    pub cancelled: bool,
}

/// Queries job statuses and retires finished jobs
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionPoller {
    concurrent: bool,
}

impl CompletionPoller {
    pub fn new(concurrent: bool) -> Self {
        Self { concurrent }
    }

    /// Poll every active job once
    ///
    /// Finished jobs are removed from `active` and their node slot released.
    /// Status query failures leave the job untouched for the next pass.
    /// Answers received before a cancellation are still applied.
    pub async fn poll_all<A>(
        &self,
        api: &A,
        active: &mut ActiveJobs,
        capacity: &mut NodeCapacityTracker,
        cancel: &CancellationToken,
    ) -> PollRound
    where
        A: AsyncJobApi + ?Sized,
    {
        let mut round = PollRound::default();
        if active.is_empty() {
            return round;
        }

        let queries: Vec<(VolumeId, AsyncHandle)> =
            active.values().map(|j| (j.volume_id, j.handle)).collect();

        if self.concurrent {
            let statuses = join_all(
                queries
                    .iter()
                    .map(|(_, handle)| cancellable(cancel, api.get_job_status(*handle))),
            )
            .await;
            for ((volume_id, _), status) in queries.iter().zip(statuses) {
                Self::settle(active, capacity, *volume_id, status, &mut round);
            }
        } else {
            for (volume_id, handle) in &queries {
                if round.cancelled {
                    break;
                }
                let status = cancellable(cancel, api.get_job_status(*handle)).await;
                Self::settle(active, capacity, *volume_id, status, &mut round);
            }
        }

        round
    }

    fn settle(
        active: &mut ActiveJobs,
        capacity: &mut NodeCapacityTracker,
        volume_id: VolumeId,
        status: VolschedResult<AsyncJobStatus>,
        round: &mut PollRound,
    ) {
        match status {
            Ok(status) => {
                if let Some(outcome) = Self::apply(active, capacity, volume_id, status) {
                    round.outcomes.push(outcome);
                }
            }
            Err(VolschedError::Cancelled) => round.cancelled = true,
            Err(e) if e.is_transient() => {
                warn!(
                    volume_id = volume_id,
                    error = %e,
                    "Failed to query job status, will retry"
                );
            }
            Err(e) => {
                error!(
                    volume_id = volume_id,
                    error = %e,
                    "Unexpected error querying job status, will retry"
                );
            }
        }
    }

    fn apply(
        active: &mut ActiveJobs,
        capacity: &mut NodeCapacityTracker,
        volume_id: VolumeId,
        status: AsyncJobStatus,
    ) -> Option<JobOutcome> {
        match status.state {
            RemoteJobState::Running => {
                debug!(volume_id = volume_id, "Backup still running");
                None
            }
            RemoteJobState::Complete | RemoteJobState::Error => {
                let mut job = active.remove(&volume_id)?;
                capacity.on_complete(job.node_id);
                let elapsed = job.elapsed();

                if status.state == RemoteJobState::Complete {
                    job.status = JobStatus::Complete;
                    info!(
                        volume_id = volume_id,
                        node_id = job.node_id,
                        elapsed_secs = elapsed.as_secs_f64(),
                        "Backup completed"
                    );
                    Some(JobOutcome {
                        job,
                        elapsed,
                        detail: None,
                    })
                } else {
                    job.status = JobStatus::Failed;
                    let detail = status.detail.unwrap_or_else(|| "unknown error".to_string());
                    warn!(
                        volume_id = volume_id,
                        node_id = job.node_id,
                        error = %detail,
                        "Backup failed"
                    );
                    Some(JobOutcome {
                        job,
                        elapsed,
                        detail: Some(detail),
                    })
                }
            }
        }
    }
}
