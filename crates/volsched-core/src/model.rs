//! Volume, node, topology and async-job type definitions

use serde::{Deserialize, Serialize};

/// Cluster-assigned volume identifier
pub type VolumeId = i64;
/// Cluster node identifier
pub type NodeId = i64;
/// Identifier of a storage service (the process owning a volume's primary replica)
pub type ServiceId = i64;
/// Opaque token identifying a long-running remote job
pub type AsyncHandle = i64;

/// Limits reported by the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLimits {
    /// Maximum concurrent bulk volume jobs per node; zero or negative means unreported
    #[serde(rename = "bulkVolumeJobsPerNodeMax", default)]
    pub bulk_volume_jobs_per_node_max: i64,
}

/// Bulk topology snapshot (the cluster's `slices.json` report)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyReport {
    /// Service to node placement
    #[serde(default)]
    pub services: Vec<ReportService>,
    /// Volume to primary service assignment
    #[serde(default)]
    pub slices: Vec<ReportSlice>,
}

/// A service entry of the topology report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportService {
    #[serde(rename = "serviceID")]
    pub service_id: ServiceId,
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,
}

/// A slice entry of the topology report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSlice {
    #[serde(rename = "volumeID")]
    pub volume_id: VolumeId,
    /// Service hosting the primary replica
    #[serde(rename = "primary")]
    pub primary_service_id: ServiceId,
}

/// Per-volume statistics needed for placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeStats {
    /// Service hosting the volume's primary metadata replica
    pub primary_service_id: ServiceId,
}

/// State of a remote asynchronous job as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobState {
    /// Job is still running
    Running,
    /// Job finished successfully
    Complete,
    /// Job finished with an execution error
    Error,
}

impl std::fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteJobState::Running => write!(f, "running"),
            RemoteJobState::Complete => write!(f, "complete"),
            RemoteJobState::Error => write!(f, "error"),
        }
    }
}

/// Status answer for an async handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncJobStatus {
    pub state: RemoteJobState,
    /// Error detail (or raw result) supplied by the cluster
    pub detail: Option<String>,
}

impl AsyncJobStatus {
    pub fn running() -> Self {
        Self {
            state: RemoteJobState::Running,
            detail: None,
        }
    }

    pub fn complete() -> Self {
        Self {
            state: RemoteJobState::Complete,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            state: RemoteJobState::Error,
            detail: Some(detail.into()),
        }
    }
}

/// Where and how a bulk volume read ships its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupTarget {
    /// Destination URL handed to the on-cluster script (e.g. an S3 URL)
    pub destination: String,
    /// Bulk read format
    pub format: String,
    /// On-cluster script performing the upload
    pub script: String,
}

impl BackupTarget {
    /// Create a target with the default format and script
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }
}

impl Default for BackupTarget {
    fn default() -> Self {
        Self {
            destination: String::new(),
            format: "native".to_string(),
            script: "backup_to_s3.py".to_string(),
        }
    }
}
