//! Cluster collaborator trait definitions

use async_trait::async_trait;
use volsched_core::{
    AsyncHandle, AsyncJobStatus, BackupTarget, ClusterLimits, TopologyReport, VolschedResult,
    VolumeId, VolumeStats,
};

/// Source of cluster-wide limits
#[async_trait]
pub trait ClusterLimitsApi: Send + Sync {
    /// Fetch the cluster limits
    async fn get_limits(&self) -> VolschedResult<ClusterLimits>;
}

/// Source of the bulk topology report
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// Fetch the service/slice placement snapshot
    async fn get_topology_report(&self) -> VolschedResult<TopologyReport>;
}

/// Per-volume placement lookup
#[async_trait]
pub trait VolumeStatsFetcher: Send + Sync {
    /// Fetch the statistics of one volume
    async fn get_volume_stats(&self, volume_id: VolumeId) -> VolschedResult<VolumeStats>;
}

/// Asynchronous backup job control
#[async_trait]
pub trait AsyncJobApi: Send + Sync {
    /// Start a bulk read of the volume into the target
    async fn start_job(&self, volume_id: VolumeId, target: &BackupTarget)
        -> VolschedResult<AsyncHandle>;

    /// Query the state of a started job
    async fn get_job_status(&self, handle: AsyncHandle) -> VolschedResult<AsyncJobStatus>;
}

/// Everything the scheduler needs from a cluster
pub trait ClusterApi: ClusterLimitsApi + ReportFetcher + VolumeStatsFetcher + AsyncJobApi {}

impl<T> ClusterApi for T where T: ClusterLimitsApi + ReportFetcher + VolumeStatsFetcher + AsyncJobApi
{}
