//! The periodic control loop.
//!
//! Each cycle runs, in order: membership refresh, controller updates,
//! metrics recording, the scaling policy and one dispatch attempt. A cycle
//! whose membership query fails is skipped entirely; every other failure is
//! logged and contained in the cycle.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use capgrid_autoscale::{ScaleDecision, ScalingPolicy};
use capgrid_cluster::ClusterApi;
use capgrid_core::CapgridConfig;
use capgrid_dispatch::{DispatchOutcome, Dispatcher, JobQueue};
use capgrid_metrics::MetricsRecorder;
use capgrid_registry::{CleanupReport, ClusterRegistry, MembershipSummary};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What one cycle did.
#[derive(Debug)]
pub enum CycleReport {
    /// Membership could not be read; nothing else ran.
    Skipped { reason: String },
    Completed(CycleSummary),
}

#[derive(Debug)]
pub struct CycleSummary {
    pub membership: MembershipSummary,
    pub active_nodes: usize,
    pub capacity: u32,
    pub running: u32,
    pub average_utilization: f64,
    pub decision: ScaleDecision,
    pub dispatch: DispatchOutcome,
}

impl CycleReport {
    pub fn summary(&self) -> Option<&CycleSummary> {
        match self {
            CycleReport::Completed(summary) => Some(summary),
            CycleReport::Skipped { .. } => None,
        }
    }
}

/// Final state handed back once the loop stops.
#[derive(Debug)]
pub struct ShutdownReport {
    pub cycles: u64,
    pub exported: Vec<PathBuf>,
    pub cleanup: CleanupReport,
}

pub struct ControlLoop {
    registry: ClusterRegistry,
    policy: ScalingPolicy,
    dispatcher: Dispatcher,
    queue: JobQueue,
    recorder: MetricsRecorder,
    export_dir: PathBuf,
    cycles: u64,
    checkpointed: bool,
}

impl ControlLoop {
    pub fn new(
        registry: ClusterRegistry,
        policy: ScalingPolicy,
        dispatcher: Dispatcher,
        queue: JobQueue,
        export_dir: &Path,
    ) -> Self {
        Self {
            registry,
            policy,
            dispatcher,
            queue,
            recorder: MetricsRecorder::new(),
            export_dir: export_dir.to_path_buf(),
            cycles: 0,
            checkpointed: false,
        }
    }

    pub fn from_config(config: &CapgridConfig, queue: JobQueue) -> Self {
        Self::new(
            ClusterRegistry::from_config(config),
            ScalingPolicy::from_config(config),
            Dispatcher::new(&config.dispatch),
            queue,
            &config.export.dir,
        )
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn recorder(&self) -> &MetricsRecorder {
        &self.recorder
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    // ── Cycle ──────────────────────────────────────────────────────

    pub async fn run_cycle(&mut self, api: &dyn ClusterApi, now: Instant) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;

        let membership = match self.registry.refresh_membership(api, now).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(cycle, error = %e, "membership refresh failed, cycle skipped");
                return CycleReport::Skipped {
                    reason: e.to_string(),
                };
            }
        };
        if !membership.is_unchanged() {
            info!(
                cycle,
                joined = ?membership.joined,
                failed = ?membership.failed,
                recovered = ?membership.recovered,
                left = ?membership.left,
                "membership changed"
            );
        }

        let snapshot = self.registry.update_controllers(api).await;
        self.recorder.record_cycle(&snapshot);

        let decision = self.policy.evaluate(&mut self.registry, api, now).await;
        let dispatch = self
            .dispatcher
            .dispatch(&mut self.queue, &self.registry, api, now)
            .await;

        info!(
            cycle,
            active = snapshot.active_count,
            capacity = snapshot.cluster_capacity,
            running = snapshot.running_workloads,
            avg_util = snapshot.average_utilization,
            decision = %decision,
            dispatch = dispatch.label(),
            queued = self.queue.len(),
            "cycle complete"
        );

        if !self.queue.has_next() && !self.checkpointed {
            self.checkpoint();
        }

        CycleReport::Completed(CycleSummary {
            membership,
            active_nodes: snapshot.active_count,
            capacity: snapshot.cluster_capacity,
            running: snapshot.running_workloads,
            average_utilization: snapshot.average_utilization,
            decision,
            dispatch,
        })
    }

    /// Export once when the job queue first runs dry.
    fn checkpoint(&mut self) {
        self.checkpointed = true;
        match self.recorder.write_csv(&self.export_dir) {
            Ok(files) => info!(
                files = files.len(),
                submitted = self.dispatcher.submitted(),
                lost = self.dispatcher.lost_jobs().len(),
                "job queue drained, metrics checkpoint written"
            ),
            Err(e) => warn!(error = %e, "metrics checkpoint failed"),
        }
    }

    // ── Driver ─────────────────────────────────────────────────────

    /// Run cycles every `interval` until `shutdown` flips, then shut down.
    pub async fn run(
        &mut self,
        api: &dyn ClusterApi,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> ShutdownReport {
        info!(
            interval_secs = interval.as_secs(),
            nodes = self.registry.nodes().len(),
            queued = self.queue.len(),
            "control loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            // tokio's clock, so paused-time tests drive the cooldowns too.
            self.run_cycle(api, tokio::time::Instant::now().into_std())
                .await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
        }

        self.shutdown(api).await
    }

    /// Persist every series and drain workloads from the active nodes.
    pub async fn shutdown(&mut self, api: &dyn ClusterApi) -> ShutdownReport {
        let exported = match self.recorder.write_csv(&self.export_dir) {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "failed to persist metrics on shutdown");
                Vec::new()
            }
        };

        let cleanup = self.registry.cleanup_all(api).await;
        if cleanup.is_complete() {
            info!(
                cycles = self.cycles,
                submitted = self.dispatcher.submitted(),
                lost = self.dispatcher.lost_jobs().len(),
                queued = self.queue.len(),
                "shutdown complete, workloads cleaned up"
            );
        } else {
            warn!(
                failed = ?cleanup.failed,
                "shutdown complete, some nodes could not be cleaned up"
            );
        }

        ShutdownReport {
            cycles: self.cycles,
            exported,
            cleanup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_cluster::InMemoryCluster;
    use capgrid_core::NodeRole;

    fn config(dir: &Path) -> CapgridConfig {
        let toml = format!(
            r#"
[control]
kp = 0.094
ki = 0.006

[api]
server = "https://127.0.0.1:6443"

[export]
dir = "{}"

[[nodes]]
name = "node0"
address = "10.0.0.1"
role = "master"
node_type = "worker0"

[[nodes]]
name = "node1"
address = "10.0.0.2"
role = "worker"
node_type = "worker1"
"#,
            dir.display()
        );
        CapgridConfig::parse(&toml).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_membership_query_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let api = InMemoryCluster::new().with_member("node0", NodeRole::Master);
        api.set_utilization("node0", 60.0);
        api.fail_membership_queries(5);

        let mut cl = ControlLoop::from_config(&config(dir.path()), JobQueue::new());
        let report = cl.run_cycle(&api, Instant::now()).await;

        assert!(matches!(report, CycleReport::Skipped { .. }));
        assert!(cl.recorder().is_empty());
        assert_eq!(cl.registry().active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_checkpoints_once() {
        let dir = tempfile::tempdir().unwrap();
        let api = InMemoryCluster::new().with_member("node0", NodeRole::Master);
        api.set_utilization("node0", 60.0);

        let mut cl = ControlLoop::from_config(&config(dir.path()), JobQueue::new());
        let report = cl.run_cycle(&api, Instant::now()).await;
        let summary = report.summary().unwrap();
        assert!(matches!(summary.dispatch, DispatchOutcome::Drained));
        assert_eq!(summary.membership.joined, vec!["node0"]);

        let cluster_csv = dir.path().join(capgrid_metrics::CLUSTER_CSV);
        let first = std::fs::read_to_string(&cluster_csv).unwrap();
        assert_eq!(first.lines().count(), 2);

        cl.run_cycle(&api, Instant::now()).await;
        let second = std::fs::read_to_string(&cluster_csv).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_stops_loop_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let api = InMemoryCluster::new()
            .with_member("node0", NodeRole::Master)
            .with_member("node1", NodeRole::Worker);
        api.set_utilization("node0", 60.0);
        api.set_utilization("node1", 60.0);
        api.set_running("node1", 3);

        let (tx, rx) = watch::channel(false);
        let mut cl = ControlLoop::from_config(&config(dir.path()), JobQueue::new());
        let driver = cl.run(&api, Duration::from_secs(15), rx);
        let stopper = async {
            tokio::time::sleep(Duration::from_secs(40)).await;
            tx.send(true).unwrap();
        };
        let (report, ()) = tokio::join!(driver, stopper);

        assert_eq!(report.cycles, 3);
        assert!(report.cleanup.is_complete());
        assert_eq!(
            report.cleanup.drained,
            vec![("node0".to_string(), 0), ("node1".to_string(), 3)]
        );
        assert!(report.exported.contains(&dir.path().join("controller_node1.csv")));
    }
}
