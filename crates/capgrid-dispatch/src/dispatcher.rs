//! Capacity-gated, rate-limited job submission.

use std::time::{Duration, Instant};

use capgrid_cluster::{ClusterApi, StressWorkload, WorkloadManifest, WorkloadScope};
use capgrid_core::Job;
use capgrid_core::config::DispatchConfig;
use capgrid_registry::ClusterRegistry;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::queue::JobQueue;

/// What one dispatch attempt did.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The queue is empty.
    Drained,
    /// The last successful dispatch is too recent.
    RateLimited { wait: Duration },
    /// No active node has spare capacity; the head job stays queued.
    Saturated,
    /// The job is running on `node` as workload `workload`.
    Submitted { node: String, workload: String },
    /// The job was taken off the queue and lost.
    Failed(DispatchError),
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Drained => "drained",
            DispatchOutcome::RateLimited { .. } => "rate_limited",
            DispatchOutcome::Saturated => "saturated",
            DispatchOutcome::Submitted { .. } => "submitted",
            DispatchOutcome::Failed(_) => "failed",
        }
    }
}

/// A job that was dequeued but never became ready. Lost jobs are not
/// retried.
#[derive(Debug, Clone)]
pub struct LostJob {
    pub job: Job,
    pub node: String,
    pub reason: String,
}

/// Moves jobs from the queue to the cluster, one per call at most.
#[derive(Debug)]
pub struct Dispatcher {
    namespace: String,
    image: String,
    min_interval: Duration,
    ready_timeout: Duration,
    ready_poll: Duration,
    ttl_after_finished: u32,
    last_dispatch: Option<Instant>,
    sequence: u64,
    submitted: u64,
    lost: Vec<LostJob>,
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            image: config.image.clone(),
            min_interval: config.min_interval,
            ready_timeout: config.ready_timeout,
            ready_poll: config.ready_poll,
            ttl_after_finished: config.ttl_after_finished,
            last_dispatch: None,
            sequence: 0,
            submitted: 0,
            lost: Vec::new(),
        }
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn lost_jobs(&self) -> &[LostJob] {
        &self.lost
    }

    /// Dispatch at most one job.
    pub async fn dispatch(
        &mut self,
        queue: &mut JobQueue,
        registry: &ClusterRegistry,
        api: &dyn ClusterApi,
        now: Instant,
    ) -> DispatchOutcome {
        if !queue.has_next() {
            return DispatchOutcome::Drained;
        }

        if let Some(last) = self.last_dispatch {
            let since = now.saturating_duration_since(last);
            if since < self.min_interval {
                let wait = self.min_interval - since;
                debug!(?wait, "dispatch rate limited");
                return DispatchOutcome::RateLimited { wait };
            }
        }

        let Some(target) = registry.select_dispatch_target() else {
            info!(
                queued = queue.len(),
                capacity = registry.cluster_capacity(),
                running = registry.running_workloads(),
                "no node with spare capacity, job stays queued"
            );
            return DispatchOutcome::Saturated;
        };
        let node = target.name().to_string();
        let node_type = target.spec().labels.node_type.clone();

        let Some(job) = queue.dequeue() else {
            return DispatchOutcome::Drained;
        };

        let workload = self.workload_for(&job, &node, &node_type);
        let name = workload.name().to_string();
        info!(job = %job.command, %node, workload = %name, "dispatching job");

        match self.submit(api, &workload).await {
            Ok(()) => {
                self.last_dispatch = Some(now);
                self.submitted += 1;
                DispatchOutcome::Submitted {
                    node,
                    workload: name,
                }
            }
            Err(reason) => {
                warn!(job = %job.command, %node, %reason, "job lost");
                let error = DispatchError::DispatchFailed {
                    job: job.command.clone(),
                    node: node.clone(),
                    reason: reason.clone(),
                };
                self.lost.push(LostJob { job, node, reason });
                DispatchOutcome::Failed(error)
            }
        }
    }

    fn workload_for(&mut self, job: &Job, node: &str, node_type: &str) -> StressWorkload {
        let name = format!("job-{node_type}-{}", self.sequence);
        self.sequence += 1;

        let manifest = WorkloadManifest::new(&name, &self.namespace, &self.image)
            .with_args(job.to_args())
            .with_ttl(self.ttl_after_finished);
        StressWorkload::new(
            manifest,
            WorkloadScope::Node {
                node_name: node.to_string(),
                node_type: node_type.to_string(),
            },
        )
    }

    async fn submit(&self, api: &dyn ClusterApi, workload: &StressWorkload) -> Result<(), String> {
        workload.deploy(api).await.map_err(|e| e.to_string())?;

        let outcome = workload
            .await_ready(api, self.ready_timeout, self.ready_poll)
            .await;
        if outcome.is_ready() {
            return Ok(());
        }

        if let Err(e) = workload.cleanup(api).await {
            warn!(workload = %workload.name(), error = %e, "cleanup of unready workload failed");
        }
        Err(format!("not ready after {:?}", outcome.elapsed()))
    }
}
