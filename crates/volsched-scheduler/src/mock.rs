//! Scripted in-memory cluster for scheduler tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use volsched_cluster::{AsyncJobApi, ClusterLimitsApi, ReportFetcher, VolumeStatsFetcher};
use volsched_core::{
    AsyncHandle, AsyncJobStatus, BackupTarget, ClusterLimits, NodeId, ReportService, ReportSlice,
    ServiceId, TopologyReport, VolschedError, VolschedResult, VolumeId, VolumeStats,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Limits,
    Report,
    Stats(VolumeId),
    Start(VolumeId),
    Status(VolumeId),
}

/// Scripted answer to one status query
#[derive(Debug, Clone)]
pub enum Step {
    Running,
    Complete,
    Error(String),
    Transport,
}

#[derive(Default)]
struct Inner {
    limit: Option<i64>,
    report_failures: u32,
    services: HashMap<ServiceId, NodeId>,
    placement: HashMap<VolumeId, ServiceId>,
    listed: Vec<VolumeId>,
    stats_failures: HashMap<VolumeId, u32>,
    start_failures: HashMap<VolumeId, u32>,
    scripts: HashMap<VolumeId, VecDeque<Step>>,
    running_polls: u32,
    polls: HashMap<AsyncHandle, u32>,
    handles: HashMap<AsyncHandle, VolumeId>,
    finished: HashSet<AsyncHandle>,
    next_handle: AsyncHandle,
    running: HashMap<NodeId, u32>,
    max_running: HashMap<NodeId, u32>,
    calls: Vec<Call>,
    cancel_on: Option<(Call, CancellationToken)>,
}

impl Inner {
    fn record(&mut self, call: Call) {
        if let Some((trigger, token)) = &self.cancel_on {
            if *trigger == call {
                token.cancel();
            }
        }
        self.calls.push(call);
    }

    fn node_of(&self, volume_id: VolumeId) -> Option<NodeId> {
        self.placement
            .get(&volume_id)
            .and_then(|svc| self.services.get(svc))
            .copied()
    }
}

pub struct MockCluster {
    inner: Mutex<Inner>,
}

impl MockCluster {
    /// Cluster reporting `limit` jobs per node; `None` makes `GetLimits` fail
    pub fn new(limit: Option<i64>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                limit,
                next_handle: 1000,
                ..Inner::default()
            }),
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut Inner)) -> Self {
        f(self.inner.get_mut().unwrap());
        self
    }

    /// Volume listed in the topology report
    pub fn with_volume(self, volume_id: VolumeId, service_id: ServiceId, node_id: NodeId) -> Self {
        self.edit(|i| {
            i.services.insert(service_id, node_id);
            i.placement.insert(volume_id, service_id);
            i.listed.push(volume_id);
        })
    }

    /// Volume known to `GetVolumeStats` but missing from the report
    pub fn with_unlisted_volume(
        self,
        volume_id: VolumeId,
        service_id: ServiceId,
        node_id: NodeId,
    ) -> Self {
        self.edit(|i| {
            i.services.insert(service_id, node_id);
            i.placement.insert(volume_id, service_id);
        })
    }

    pub fn fail_report(self, times: u32) -> Self {
        self.edit(|i| i.report_failures = times)
    }

    pub fn fail_stats(self, volume_id: VolumeId, times: u32) -> Self {
        self.edit(|i| {
            i.stats_failures.insert(volume_id, times);
        })
    }

    pub fn fail_start(self, volume_id: VolumeId, times: u32) -> Self {
        self.edit(|i| {
            i.start_failures.insert(volume_id, times);
        })
    }

    /// Status answers for the volume's job; `Complete` once exhausted
    pub fn script(self, volume_id: VolumeId, steps: Vec<Step>) -> Self {
        self.edit(|i| {
            i.scripts.insert(volume_id, steps.into());
        })
    }

    /// Unscripted jobs report `running` this many times before completing
    pub fn running_polls(self, polls: u32) -> Self {
        self.edit(|i| i.running_polls = polls)
    }

    /// Cancel `token` while serving `call`; the call itself still answers
    pub fn cancel_on(self, call: Call, token: CancellationToken) -> Self {
        self.edit(|i| i.cancel_on = Some((call, token)))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn max_running(&self, node_id: NodeId) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.max_running.get(&node_id).copied().unwrap_or(0)
    }

    pub fn running(&self, node_id: NodeId) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.running.get(&node_id).copied().unwrap_or(0)
    }
}

fn transport(what: &str) -> VolschedError {
    VolschedError::Transport(format!("{} connection reset", what))
}

#[async_trait]
impl ClusterLimitsApi for MockCluster {
    async fn get_limits(&self) -> VolschedResult<ClusterLimits> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Call::Limits);
        inner
            .limit
            .map(|max| ClusterLimits {
                bulk_volume_jobs_per_node_max: max,
            })
            .ok_or_else(|| transport("GetLimits"))
    }
}

#[async_trait]
impl ReportFetcher for MockCluster {
    async fn get_topology_report(&self) -> VolschedResult<TopologyReport> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Call::Report);
        if inner.report_failures > 0 {
            inner.report_failures -= 1;
            return Err(transport("GetReport"));
        }
        let mut services: Vec<ReportService> = inner
            .services
            .iter()
            .map(|(s, n)| ReportService {
                service_id: *s,
                node_id: *n,
            })
            .collect();
        services.sort_by_key(|s| s.service_id);
        let slices = inner
            .listed
            .iter()
            .map(|v| ReportSlice {
                volume_id: *v,
                primary_service_id: inner.placement[v],
            })
            .collect();
        Ok(TopologyReport { services, slices })
    }
}

#[async_trait]
impl VolumeStatsFetcher for MockCluster {
    async fn get_volume_stats(&self, volume_id: VolumeId) -> VolschedResult<VolumeStats> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(Call::Stats(volume_id));
        if let Some(left) = inner.stats_failures.get_mut(&volume_id) {
            if *left > 0 {
                *left -= 1;
                return Err(transport("GetVolumeStats"));
            }
        }
        match inner.placement.get(&volume_id) {
            Some(svc) => Ok(VolumeStats {
                primary_service_id: *svc,
            }),
            None => Err(VolschedError::Remote {
                code: 500,
                name: "xVolumeIDDoesNotExist".to_string(),
                message: format!("Volume {} does not exist", volume_id),
            }),
        }
    }
}

#[async_trait]
impl AsyncJobApi for MockCluster {
    async fn start_job(
        &self,
        volume_id: VolumeId,
        _target: &BackupTarget,
    ) -> VolschedResult<AsyncHandle> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.record(Call::Start(volume_id));
        if let Some(left) = inner.start_failures.get_mut(&volume_id) {
            if *left > 0 {
                *left -= 1;
                return Err(transport("StartBulkVolumeRead"));
            }
        }

        let handle = inner.next_handle;
        inner.next_handle += 1;
        inner.handles.insert(handle, volume_id);

        if let Some(node) = inner.node_of(volume_id) {
            let count = inner.running.entry(node).or_insert(0);
            *count += 1;
            let max = inner.max_running.entry(node).or_insert(0);
            *max = (*max).max(*count);
        }
        Ok(handle)
    }

    async fn get_job_status(&self, handle: AsyncHandle) -> VolschedResult<AsyncJobStatus> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let volume_id = match inner.handles.get(&handle) {
            Some(v) => *v,
            None => return Err(transport("GetAsyncResult")),
        };
        inner.record(Call::Status(volume_id));

        let scripted = inner
            .scripts
            .get_mut(&volume_id)
            .map(|steps| steps.pop_front().unwrap_or(Step::Complete));
        let step = match scripted {
            Some(step) => step,
            None => {
                let seen = inner.polls.entry(handle).or_insert(0);
                *seen += 1;
                if *seen > inner.running_polls {
                    Step::Complete
                } else {
                    Step::Running
                }
            }
        };

        let status = match step {
            Step::Running => return Ok(AsyncJobStatus::running()),
            Step::Transport => return Err(transport("GetAsyncResult")),
            Step::Complete => AsyncJobStatus::complete(),
            Step::Error(detail) => AsyncJobStatus::error(detail),
        };

        if inner.finished.insert(handle) {
            if let Some(node) = inner.node_of(volume_id) {
                if let Some(count) = inner.running.get_mut(&node) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        Ok(status)
    }
}
