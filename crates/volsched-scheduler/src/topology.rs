//! Volume to node resolution
//!
//! The resolver is seeded from the cluster's bulk `slices.json` report and
//! falls back to a per-volume stats lookup for anything the report does not
//! cover. When the report could not be fetched at all the resolver runs in
//! degraded mode; every volume then goes through the fallback path.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use volsched_cluster::{ReportFetcher, VolumeStatsFetcher};
use volsched_core::{NodeId, ServiceId, TopologyReport, VolschedError, VolschedResult, VolumeId};

use crate::cancel::cancellable;

/// Volume to node mapping produced from a topology report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyMapping {
    /// Volumes whose primary node is known
    pub volumes: HashMap<VolumeId, NodeId>,
    /// The report could not be fetched
    pub degraded: bool,
}

/// Caches volume and service placement for one run
#[derive(Debug, Default)]
pub struct TopologyResolver {
    services: HashMap<ServiceId, NodeId>,
    volumes: HashMap<VolumeId, NodeId>,
    degraded: bool,
    refreshed_this_pass: bool,
}

impl TopologyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the topology report and seed the caches from it
    ///
    /// A fetch failure is not fatal: the mapping comes back empty and
    /// flagged degraded.
    pub async fn build_mapping<R>(
        &mut self,
        fetcher: &R,
        cancel: &CancellationToken,
    ) -> VolschedResult<TopologyMapping>
    where
        R: ReportFetcher + ?Sized,
    {
        info!("Fetching slices report to map volumes to nodes");

        match cancellable(cancel, fetcher.get_topology_report()).await {
            Ok(report) => {
                self.load(report);
                self.degraded = false;
                info!(
                    volumes = self.volumes.len(),
                    services = self.services.len(),
                    "Mapped volumes to nodes via report"
                );
            }
            Err(VolschedError::Cancelled) => return Err(VolschedError::Cancelled),
            Err(e) => {
                self.degraded = true;
                warn!(
                    error = %e,
                    "Failed to get slices report, falling back to per-volume stats"
                );
            }
        }

        Ok(TopologyMapping {
            volumes: self.volumes.clone(),
            degraded: self.degraded,
        })
    }

    /// Allow one more report refresh; called at the start of every pass
    pub fn begin_pass(&mut self) {
        self.refreshed_this_pass = false;
    }

    /// Whether the last report fetch failed
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Cached node of a volume, without any lookup
    pub fn cached_node(&self, volume_id: VolumeId) -> Option<NodeId> {
        self.volumes.get(&volume_id).copied()
    }

    /// Node hosting the volume's primary, or `None` when it cannot be determined yet
    ///
    /// Only cancellation is returned as an error; lookup failures resolve to
    /// `None` and the volume is retried on a later pass.
    pub async fn resolve_node<C>(
        &mut self,
        cluster: &C,
        volume_id: VolumeId,
        cancel: &CancellationToken,
    ) -> VolschedResult<Option<NodeId>>
    where
        C: ReportFetcher + VolumeStatsFetcher + ?Sized,
    {
        if let Some(node) = self.cached_node(volume_id) {
            return Ok(Some(node));
        }

        let stats = match cancellable(cancel, cluster.get_volume_stats(volume_id)).await {
            Ok(stats) => stats,
            Err(VolschedError::Cancelled) => return Err(VolschedError::Cancelled),
            Err(e) => {
                warn!(volume_id = volume_id, error = %e, "Volume stats lookup failed");
                return Ok(None);
            }
        };

        let service_id = stats.primary_service_id;
        if !self.services.contains_key(&service_id) && !self.refreshed_this_pass {
            self.refresh(cluster, cancel).await?;
        }

        match self.services.get(&service_id).copied() {
            Some(node) => {
                debug!(
                    volume_id = volume_id,
                    service_id = service_id,
                    node_id = node,
                    "Resolved volume via stats"
                );
                self.volumes.insert(volume_id, node);
                Ok(Some(node))
            }
            None => {
                warn!(
                    volume_id = volume_id,
                    service_id = service_id,
                    "Primary service of volume is not in the service table"
                );
                Ok(None)
            }
        }
    }

    async fn refresh<R>(&mut self, fetcher: &R, cancel: &CancellationToken) -> VolschedResult<()>
    where
        R: ReportFetcher + ?Sized,
    {
        self.refreshed_this_pass = true;
        match cancellable(cancel, fetcher.get_topology_report()).await {
            Ok(report) => {
                self.load(report);
                if self.degraded {
                    info!("Slices report available again, leaving degraded mode");
                }
                self.degraded = false;
                Ok(())
            }
            Err(VolschedError::Cancelled) => Err(VolschedError::Cancelled),
            Err(e) => {
                debug!(error = %e, "Slices report refresh failed");
                Ok(())
            }
        }
    }

    fn load(&mut self, report: TopologyReport) {
        for svc in report.services {
            self.services.insert(svc.service_id, svc.node_id);
        }
        for slice in report.slices {
            if let Some(node) = self.services.get(&slice.primary_service_id) {
                self.volumes.entry(slice.volume_id).or_insert(*node);
            }
        }
    }
}
