//! CLI commands implementation

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use volsched_cluster::{ClusterApi, ClusterLimitsApi, ElementClient};
use volsched_core::{NodeId, VolschedConfig, VolumeId};
use volsched_scheduler::{BackupReport, BackupScheduler, LimitPolicy, SchedulePolicy, TopologyResolver};

/// Volume IDs from the command line or a volumes file
pub fn collect_volumes(volumes: Vec<VolumeId>, file: Option<&Path>) -> Result<Vec<VolumeId>> {
    match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            parse_volume_list(&text)
        }
        None => Ok(volumes),
    }
}

/// Parse volume IDs separated by newlines, commas or spaces
fn parse_volume_list(text: &str) -> Result<Vec<VolumeId>> {
    let mut volumes = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("");
        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            let id: VolumeId = token
                .parse()
                .with_context(|| format!("line {}: invalid volume ID '{}'", lineno + 1, token))?;
            volumes.push(id);
        }
    }
    Ok(volumes)
}

/// Run a backup; returns whether every volume completed
pub async fn run(
    config: &VolschedConfig,
    volumes: Vec<VolumeId>,
    destination: Option<String>,
    deadline_secs: Option<u64>,
    json: bool,
) -> Result<bool> {
    let mut target = config.backup.clone();
    if let Some(destination) = destination {
        target.destination = destination;
    }
    if target.destination.trim().is_empty() {
        bail!("No backup destination: set [backup] destination or pass --destination");
    }
    if volumes.is_empty() {
        bail!("No volumes to back up");
    }

    let cluster: Arc<dyn ClusterApi> = Arc::new(ElementClient::new(&config.cluster)?);
    let scheduler = BackupScheduler::new(
        cluster,
        target,
        SchedulePolicy::from_config(&config.scheduler),
    );

    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    if let Some(secs) = deadline_secs {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(deadline_secs = secs, "Deadline reached, cancelling run");
            deadline.cancel();
        });
    }

    let report = scheduler.run(volumes, &cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(report.is_success())
}

/// Show the cluster's bulk job limit
pub async fn limits(config: &VolschedConfig) -> Result<()> {
    let client = ElementClient::new(&config.cluster)?;
    let limits = client
        .get_limits()
        .await
        .context("Failed to get cluster limits")?;

    let policy = LimitPolicy::from_config(&config.scheduler);
    let reported = limits.bulk_volume_jobs_per_node_max;

    println!("Cluster: {}", client.url());
    if reported > 0 {
        println!("  Reported maximum: {} jobs per node", reported);
    } else {
        println!(
            "  Reported maximum: none (assuming {} jobs per node)",
            policy.default_max
        );
    }
    println!("  Reserve: {}", policy.reserve);
    println!("  Effective limit: {} jobs per node", policy.effective_limit(reported));

    Ok(())
}

/// Show the volume to node mapping
pub async fn topology(config: &VolschedConfig) -> Result<()> {
    let client = ElementClient::new(&config.cluster)?;
    let mut resolver = TopologyResolver::new();
    let mapping = resolver
        .build_mapping(&client, &CancellationToken::new())
        .await?;

    if mapping.degraded {
        println!("Slices report unavailable; volumes would be resolved one at a time");
        return Ok(());
    }
    if mapping.volumes.is_empty() {
        println!("No volumes found");
        return Ok(());
    }

    let mut rows: Vec<(VolumeId, NodeId)> = mapping.volumes.into_iter().collect();
    rows.sort_unstable();

    println!("{:<12} {:<12}", "VOLUME", "NODE");
    println!("{}", "-".repeat(24));
    for (volume_id, node_id) in &rows {
        println!("{:<12} {:<12}", volume_id, node_id);
    }

    let per_node = node_tally(&rows);

    println!();
    println!("{} volumes on {} nodes", rows.len(), per_node.len());
    for (node_id, count) in per_node {
        println!("  node {}: {} volumes", node_id, count);
    }

    Ok(())
}

/// Volumes per node, ordered by node ID
fn node_tally(rows: &[(VolumeId, NodeId)]) -> BTreeMap<NodeId, usize> {
    let mut tally = BTreeMap::new();
    for (_, node_id) in rows {
        *tally.entry(*node_id).or_insert(0) += 1;
    }
    tally
}

/// Print the loaded configuration; the password is redacted by its `Display`
pub fn check_config(path: &Path, config: &VolschedConfig) {
    println!("Configuration {} is valid", path.display());
    println!();
    println!("[cluster]");
    println!("  endpoint: {}", config.cluster.endpoint);
    println!("  api_version: {}", config.cluster.api_version);
    println!("  username: {}", config.cluster.username);
    println!("  password: {}", config.cluster.password);
    println!("  timeout_secs: {}", config.cluster.timeout_secs);
    println!("  accept_invalid_certs: {}", config.cluster.accept_invalid_certs);
    println!("[scheduler]");
    println!("  poll_interval_secs: {}", config.scheduler.poll_interval_secs);
    println!("  jitter_ms: {}", config.scheduler.jitter_ms);
    println!("  reserve: {}", config.scheduler.reserve);
    println!(
        "  default_max_jobs_per_node: {}",
        config.scheduler.default_max_jobs_per_node
    );
    println!("  min_limit: {}", config.scheduler.min_limit);
    match config.scheduler.max_attempts {
        Some(max) => println!("  max_attempts: {}", max),
        None => println!("  max_attempts: unlimited"),
    }
    println!("  retry_base_delay_ms: {}", config.scheduler.retry_base_delay_ms);
    println!("  retry_max_delay_ms: {}", config.scheduler.retry_max_delay_ms);
    println!("  concurrent_poll: {}", config.scheduler.concurrent_poll);
    println!("[backup]");
    if config.backup.destination.is_empty() {
        println!("  destination: (unset, pass --destination)");
    } else {
        println!("  destination: {}", config.backup.destination);
    }
    println!("  format: {}", config.backup.format);
    println!("  script: {}", config.backup.script);
    println!("[logging]");
    println!("  level: {}", config.logging.level);
    println!("  format: {}", config.logging.format);
}

/// Helper to print a run report
fn print_report(report: &BackupReport) {
    println!("Backup run {}", report.run_id);
    println!("  Started: {}", report.started_at);
    println!("  Finished: {}", report.finished_at);
    match report.effective_limit {
        Some(limit) => println!("  Per-node limit: {}", limit),
        None => println!("  Per-node limit: unknown (cancelled before limits were read)"),
    }
    println!("  Passes: {}", report.passes);
    if report.topology_degraded {
        println!("  Topology: degraded (slices report unavailable at start)");
    }
    println!();

    println!(
        "{:<12} {:<10} {:<12} {:<10} {}",
        "VOLUME", "NODE", "STATUS", "ELAPSED", "DETAIL"
    );
    println!("{}", "-".repeat(70));
    for v in &report.completed {
        println!(
            "{:<12} {:<10} {:<12} {:<10} ",
            v.volume_id,
            v.node_id,
            "complete",
            format!("{:.0}s", v.elapsed_secs)
        );
    }
    for v in &report.failed {
        println!(
            "{:<12} {:<10} {:<12} {:<10} {}",
            v.volume_id,
            v.node_id,
            "failed",
            format!("{:.0}s", v.elapsed_secs),
            v.detail
        );
    }
    for v in &report.abandoned {
        println!(
            "{:<12} {:<10} {:<12} {:<10} {} (after {} attempts)",
            v.volume_id, "-", "abandoned", "-", v.reason, v.attempts
        );
    }
    for v in &report.interrupted {
        println!(
            "{:<12} {:<10} {:<12} {:<10} handle {}, still running on the cluster",
            v.volume_id, v.node_id, "interrupted", "-", v.handle
        );
    }
    for volume_id in &report.pending {
        println!(
            "{:<12} {:<10} {:<12} {:<10} ",
            volume_id, "-", "pending", "-"
        );
    }

    println!();
    println!(
        "{} completed, {} failed, {} abandoned, {} interrupted, {} pending{}",
        report.completed.len(),
        report.failed.len(),
        report.abandoned.len(),
        report.interrupted.len(),
        report.pending.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}
