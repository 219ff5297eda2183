//! Backup job start

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use volsched_cluster::AsyncJobApi;
use volsched_core::{AsyncHandle, BackupTarget, NodeId, VolschedError, VolschedResult, VolumeId};

use crate::cancel::cancellable;

/// Job status as tracked by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Complete,
    Failed,
}

/// A backup job started on the cluster
#[derive(Debug, Clone)]
pub struct Job {
    pub volume_id: VolumeId,
    pub node_id: NodeId,
    pub handle: AsyncHandle,
    /// Monotonic start time, used for elapsed durations
    pub started_at: Instant,
    /// Wall-clock start time, used for reporting
    pub started_wall: DateTime<Utc>,
    pub status: JobStatus,
}

impl Job {
    /// Time since the job was started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Starts bulk-read backup jobs against a fixed target
#[derive(Debug, Clone)]
pub struct JobLauncher {
    target: BackupTarget,
}

impl JobLauncher {
    pub fn new(target: BackupTarget) -> Self {
        Self { target }
    }

    /// Start a backup of the volume, which lives on `node_id`
    ///
    /// Remote failures come back as [`VolschedError::JobStart`]; the caller
    /// requeues the volume. Other errors pass through unchanged.
    ///
    /// When cancellation wins the race against an in-flight request, the
    /// cluster may still have started the job. Its handle is never seen, so
    /// the volume is reported pending although a read may be running.
    pub async fn start_job<A>(
        &self,
        api: &A,
        volume_id: VolumeId,
        node_id: NodeId,
        cancel: &CancellationToken,
    ) -> VolschedResult<Job>
    where
        A: AsyncJobApi + ?Sized,
    {
        let handle = cancellable(cancel, api.start_job(volume_id, &self.target))
            .await
            .map_err(|e| {
                if e.is_transient() {
                    VolschedError::JobStart {
                        volume_id,
                        reason: e.to_string(),
                    }
                } else {
                    e
                }
            })?;

        debug!(
            volume_id = volume_id,
            node_id = node_id,
            handle = handle,
            "Bulk volume read started"
        );

        Ok(Job {
            volume_id,
            node_id,
            handle,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            status: JobStatus::Running,
        })
    }
}
