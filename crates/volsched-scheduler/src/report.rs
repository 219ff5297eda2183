//! Run report

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use volsched_core::{AsyncHandle, NodeId, VolumeId};

/// Volume whose backup finished successfully
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedVolume {
    pub volume_id: VolumeId,
    pub node_id: NodeId,
    pub elapsed_secs: f64,
}

/// Volume whose backup job reported an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedVolume {
    pub volume_id: VolumeId,
    pub node_id: NodeId,
    /// Error detail from the cluster, verbatim
    pub detail: String,
    pub elapsed_secs: f64,
}

/// Volume given up on after exhausting its retry attempts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbandonedVolume {
    pub volume_id: VolumeId,
    pub attempts: u32,
    pub reason: String,
}

/// Job still in flight when the run was cancelled; its remote state is unknown
///
/// Only jobs whose start was acknowledged appear here. A start request that
/// lost the race against cancellation may have launched a job anyway; that
/// volume is listed as pending with no handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterruptedVolume {
    pub volume_id: VolumeId,
    pub node_id: NodeId,
    pub handle: AsyncHandle,
    pub started_at: DateTime<Utc>,
}

/// Outcome of one scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-node job ceiling the run used; `None` if cancelled before it was known
    pub effective_limit: Option<u32>,
    pub passes: u64,
    /// The topology report was unavailable at startup
    pub topology_degraded: bool,
    pub completed: Vec<CompletedVolume>,
    pub failed: Vec<FailedVolume>,
    pub abandoned: Vec<AbandonedVolume>,
    pub interrupted: Vec<InterruptedVolume>,
    /// Volumes with no acknowledged job when the run was cancelled, in queue
    /// order. A volume whose start request was cut short may still be
    /// running on the cluster.
    pub pending: Vec<VolumeId>,
    pub cancelled: bool,
}

impl BackupReport {
    /// Every volume completed
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.failed.is_empty()
            && self.abandoned.is_empty()
            && self.interrupted.is_empty()
            && self.pending.is_empty()
    }

    /// Number of volumes the report accounts for
    pub fn total(&self) -> usize {
        self.completed.len()
            + self.failed.len()
            + self.abandoned.len()
            + self.interrupted.len()
            + self.pending.len()
    }
}
