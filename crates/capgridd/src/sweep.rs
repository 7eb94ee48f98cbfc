//! Capacity sweep for system identification.
//!
//! For every pod count from 2 up to a maximum, a stress workload with that
//! many replicas is deployed, utilization is sampled for a fixed duration,
//! and the mean is recorded. The resulting curve is what the controller
//! gains are tuned against.

use std::time::Duration;

use anyhow::Context;
use capgrid_cluster::{ClusterApi, StressWorkload, WorkloadManifest, WorkloadScope};
use capgrid_metrics::SweepPoint;
use tracing::{debug, info, warn};

/// First pod count of every sweep.
pub const MIN_SWEEP_PODS: u32 = 2;

const SWEEP_WORKLOAD: &str = "stress-sweep";

#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub scope: WorkloadScope,
    pub namespace: String,
    pub image: String,
    pub max_pods: u32,
    /// How long each pod count is held and sampled.
    pub duration: Duration,
    pub sample_interval: Duration,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
}

impl SweepPlan {
    /// Arguments for each stress replica. The replica runs a little longer
    /// than the sampling window so it never exits mid-sample.
    fn stress_args(&self) -> Vec<String> {
        let timeout = self.duration + self.ready_timeout;
        vec![
            "--cpu".into(),
            "2".into(),
            "--io".into(),
            "2".into(),
            "--vm".into(),
            "8".into(),
            "--vm-bytes".into(),
            "4G".into(),
            "--timeout".into(),
            format!("{}s", timeout.as_secs()),
            "--metrics-brief".into(),
        ]
    }

    fn workload(&self, pods: u32) -> StressWorkload {
        let manifest = WorkloadManifest::new(SWEEP_WORKLOAD, &self.namespace, &self.image)
            .with_args(self.stress_args())
            .with_replicas(pods);
        StressWorkload::new(manifest, self.scope.clone())
    }
}

/// Run the sweep and return one point per pod count that produced samples.
pub async fn run_sweep(api: &dyn ClusterApi, plan: &SweepPlan) -> anyhow::Result<Vec<SweepPoint>> {
    let mut points = Vec::new();

    for pods in MIN_SWEEP_PODS..=plan.max_pods {
        let workload = plan.workload(pods);
        info!(pods, workload = %workload.name(), "sweep step starting");

        workload
            .deploy(api)
            .await
            .with_context(|| format!("deploying sweep workload with {pods} pods"))?;

        let ready = workload
            .await_ready(api, plan.ready_timeout, plan.ready_poll)
            .await;
        if !ready.is_ready() {
            warn!(pods, "sweep workload never became ready, step skipped");
            cleanup(api, &workload).await;
            continue;
        }

        let mean = sample_mean(api, &workload, plan).await;
        cleanup(api, &workload).await;

        match mean {
            Some(utilization) => {
                info!(pods, utilization, "sweep step complete");
                points.push(SweepPoint {
                    max_pods: pods,
                    utilization,
                });
            }
            None => warn!(pods, "no utilization samples collected, step skipped"),
        }
    }

    Ok(points)
}

/// Average utilization over the sampling window. Each sample is the mean of
/// the nodes it covers.
async fn sample_mean(
    api: &dyn ClusterApi,
    workload: &StressWorkload,
    plan: &SweepPlan,
) -> Option<f64> {
    let interval = plan.sample_interval.max(Duration::from_millis(1));
    let rounds = (plan.duration.as_millis() / interval.as_millis()).max(1);

    let mut samples = Vec::new();
    for round in 0..rounds {
        match workload.sample_utilization(api).await {
            Ok(nodes) if !nodes.is_empty() => {
                let avg = nodes.iter().map(|(_, u)| u).sum::<f64>() / nodes.len() as f64;
                debug!(round, avg, nodes = nodes.len(), "sweep sample");
                samples.push(avg);
            }
            Ok(_) => debug!(round, "sweep sample empty"),
            Err(e) => warn!(round, error = %e, "sweep sample failed"),
        }
        tokio::time::sleep(interval).await;
    }

    (!samples.is_empty()).then(|| samples.iter().sum::<f64>() / samples.len() as f64)
}

async fn cleanup(api: &dyn ClusterApi, workload: &StressWorkload) {
    if let Err(e) = workload.cleanup(api).await {
        warn!(workload = %workload.name(), error = %e, "sweep cleanup failed");
    }
}
