//! volsched-scheduler: Node-aware admission scheduler for bulk backups
//!
//! This crate drives backup jobs against a cluster without overloading any node:
//! - Volume to node resolution with a degraded fallback path
//! - Per-node job slot tracking against the cluster's limit
//! - Job start and completion polling
//! - The scheduling loop and its run report
//!
//! The scheduler assumes it is the only writer of bulk volume jobs on the
//! cluster; run one instance per cluster.

pub mod cancel;
pub mod capacity;
pub mod launcher;
pub mod poller;
pub mod policy;
pub mod report;
pub mod scheduler;
pub mod topology;

#[cfg(test)]
mod mock;

pub use capacity::{LimitPolicy, NodeCapacityTracker};
pub use launcher::{Job, JobLauncher, JobStatus};
pub use poller::{ActiveJobs, CompletionPoller, JobOutcome, PollRound};
pub use policy::{RetryDecision, RetryPolicy, SchedulePolicy};
pub use report::BackupReport;
pub use scheduler::{BackupScheduler, PassSummary, RunState};
pub use topology::{TopologyMapping, TopologyResolver};
