//! Cluster registry and node lifecycle manager.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use capgrid_admission::{AdmissionController, ControlSample};
use capgrid_cluster::ClusterApi;
use capgrid_core::config::CapgridConfig;
use capgrid_core::{NodeRole, NodeSpec};
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::node::{Node, NodePhase};
use crate::retry::RetryPolicy;

/// Result of an add or remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// The orchestrator accepted the action.
    Applied,
    /// A cooldown is running; no API call was made.
    Suppressed { remaining: Duration },
}

/// What one membership refresh changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSummary {
    pub members: usize,
    pub active: usize,
    pub joined: Vec<String>,
    pub failed: Vec<String>,
    pub recovered: Vec<String>,
    pub left: Vec<String>,
}

impl MembershipSummary {
    pub fn is_unchanged(&self) -> bool {
        self.joined.is_empty()
            && self.failed.is_empty()
            && self.recovered.is_empty()
            && self.left.is_empty()
    }
}

/// Per-node outcome of one controller update.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSample {
    pub node: String,
    /// The applied control step, or `None` if the controller held.
    pub applied: Option<ControlSample>,
    pub max_pods: u32,
    pub running: Option<u32>,
}

/// Consistent view of the cluster after all controllers updated.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSnapshot {
    pub nodes: Vec<NodeSample>,
    pub active_count: usize,
    pub average_utilization: f64,
    pub cluster_capacity: u32,
    pub running_workloads: u32,
}

impl CycleSnapshot {
    /// Workloads the active nodes could hold: each node's setpoint on top of
    /// what it already runs. Unknown running counts count as zero.
    pub fn admission_ceiling(&self) -> u32 {
        self.nodes
            .iter()
            .map(|n| n.max_pods + n.running.unwrap_or(0))
            .sum()
    }
}

/// Outcome of draining every active node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub drained: Vec<(String, u32)>,
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns every inventory node, in inventory order, plus the cluster-wide
/// cooldown and debounce state.
#[derive(Debug)]
pub struct ClusterRegistry {
    nodes: Vec<Node>,
    namespace: String,
    add_cooldown: Duration,
    remove_cooldown: Duration,
    failure_cooldown: Duration,
    membership_retry: RetryPolicy,
    metrics_retry: RetryPolicy,
    /// Utilization below which a node counts as lightly loaded.
    low_util_threshold: f64,

    cooldown_last_add: Option<Instant>,
    /// Last remove issued or failure detected.
    cooldown_last_remove_failure: Option<Instant>,
    low_cluster_cycles_remaining: u32,
}

impl ClusterRegistry {
    /// Registry over `nodes`, each with its own controller. All nodes start
    /// inactive; the first refresh discovers the live members.
    pub fn new(nodes: Vec<Node>, downscale_cycles: u32) -> Self {
        Self {
            nodes,
            namespace: "jobs".to_string(),
            add_cooldown: Duration::from_secs(60),
            remove_cooldown: Duration::from_secs(60),
            failure_cooldown: Duration::from_secs(60),
            membership_retry: RetryPolicy::default(),
            metrics_retry: RetryPolicy::once(),
            low_util_threshold: 0.0,
            cooldown_last_add: None,
            cooldown_last_remove_failure: None,
            low_cluster_cycles_remaining: downscale_cycles,
        }
    }

    pub fn from_config(config: &CapgridConfig) -> Self {
        let nodes = config
            .nodes
            .iter()
            .map(|spec| {
                let controller = AdmissionController::from_config(&spec.name, &config.control);
                Node::new(spec.clone(), controller)
            })
            .collect();

        let scaling = &config.scaling;
        Self::new(nodes, scaling.downscale_cycles)
            .with_namespace(&config.dispatch.namespace)
            .with_cooldowns(
                scaling.add_cooldown,
                scaling.remove_cooldown,
                scaling.failure_cooldown,
            )
            .with_membership_retry(RetryPolicy::new(
                config.cycle.retry_attempts,
                config.cycle.retry_backoff,
            ))
            .with_metrics_retry(RetryPolicy::new(
                config.cycle.metrics_retry_attempts,
                config.cycle.metrics_retry_backoff,
            ))
            .with_low_util_threshold(
                scaling.downscale_threshold * config.control.target_utilization,
            )
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_cooldowns(mut self, add: Duration, remove: Duration, failure: Duration) -> Self {
        self.add_cooldown = add;
        self.remove_cooldown = remove;
        self.failure_cooldown = failure;
        self
    }

    pub fn with_membership_retry(mut self, policy: RetryPolicy) -> Self {
        self.membership_retry = policy;
        self
    }

    pub fn with_metrics_retry(mut self, policy: RetryPolicy) -> Self {
        self.metrics_retry = policy;
        self
    }

    pub fn with_low_util_threshold(mut self, threshold: f64) -> Self {
        self.low_util_threshold = threshold;
        self
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn index_of(&self, name: &str) -> RegistryResult<usize> {
        self.nodes
            .iter()
            .position(|n| n.name() == name)
            .ok_or_else(|| RegistryError::UnknownNode(name.to_string()))
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.active_nodes().count()
    }

    /// Sum of the capacity setpoints of active nodes.
    pub fn cluster_capacity(&self) -> u32 {
        self.active_nodes().map(Node::max_pods).sum()
    }

    /// Sum of the last known running-workload counts of active nodes.
    pub fn running_workloads(&self) -> u32 {
        self.active_nodes()
            .filter_map(Node::running_workloads)
            .sum()
    }

    /// Mean utilization over active nodes that have been sampled at least
    /// once; `0.0` when there is none.
    pub fn average_active_utilization(&self) -> f64 {
        let (sum, count) = self
            .active_nodes()
            .filter_map(Node::current_util)
            .fold((0.0, 0usize), |(sum, count), util| (sum + util, count + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// First active node, in inventory order, running fewer workloads than
    /// its setpoint allows.
    pub fn select_dispatch_target(&self) -> Option<&Node> {
        self.active_nodes().find(|n| n.has_spare_capacity())
    }

    /// Active, removable, sampled node with the lowest utilization. Ties go
    /// to the earlier inventory entry.
    pub fn select_removal_candidate(&self) -> Option<&Node> {
        self.active_nodes()
            .filter(|n| n.can_remove())
            .filter_map(|n| n.current_util().map(|util| (n, util)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(n, _)| n)
    }

    /// First inactive node in inventory order.
    pub fn select_scale_up_candidate(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.phase() == NodePhase::Inactive)
    }

    pub fn cooldown_last_add(&self) -> Option<Instant> {
        self.cooldown_last_add
    }

    pub fn cooldown_last_remove_failure(&self) -> Option<Instant> {
        self.cooldown_last_remove_failure
    }

    pub fn low_cluster_cycles_remaining(&self) -> u32 {
        self.low_cluster_cycles_remaining
    }

    // ── Debounce counter ───────────────────────────────────────────

    /// Count one low-utilization cycle and return how many remain.
    pub fn tick_low_utilization(&mut self) -> u32 {
        self.low_cluster_cycles_remaining = self.low_cluster_cycles_remaining.saturating_sub(1);
        self.low_cluster_cycles_remaining
    }

    pub fn reset_low_utilization(&mut self, cycles: u32) {
        self.low_cluster_cycles_remaining = cycles;
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Reconcile every node with the live member list.
    ///
    /// Applying the same membership at the same `now` twice changes nothing
    /// the second time.
    pub async fn refresh_membership(
        &mut self,
        api: &dyn ClusterApi,
        now: Instant,
    ) -> RegistryResult<MembershipSummary> {
        let members = self
            .membership_retry
            .run("list_members", move || api.list_members())
            .await
            .map_err(|source| RegistryError::MembershipQueryFailed {
                attempts: self.membership_retry.attempts,
                source,
            })?;

        let live: HashMap<String, NodeRole> =
            members.into_iter().map(|m| (m.name, m.role)).collect();
        for name in live.keys() {
            if self.node(name).is_none() {
                debug!(node = %name, "member not in inventory, ignored");
            }
        }

        let mut summary = MembershipSummary {
            members: live.len(),
            ..Default::default()
        };

        for node in &mut self.nodes {
            let present = live.get(node.name()).copied();
            if let Some(role) = present {
                node.apply_role(role);
            }

            let name = node.name().to_string();
            let elapsed = |since: Option<Instant>| since.map(|t| now.saturating_duration_since(t));

            match (node.phase(), present.is_some()) {
                (NodePhase::Inactive, true) | (NodePhase::AddCooldown, true) => {
                    node.activate();
                    info!(node = %name, "node joined");
                    summary.joined.push(name);
                }
                (NodePhase::Active, false) => {
                    node.mark_failed(now);
                    self.cooldown_last_remove_failure = Some(now);
                    warn!(node = %name, "node vanished without a remove, failure recorded");
                    summary.failed.push(name);
                }
                (NodePhase::FailurePending, true) => {
                    node.activate();
                    info!(node = %name, "failed node is back");
                    summary.recovered.push(name);
                }
                (NodePhase::FailurePending, false)
                    if elapsed(node.failure_at()).is_some_and(|e| e >= self.failure_cooldown) =>
                {
                    node.deactivate();
                    info!(node = %name, "failure cooldown elapsed, node inactive");
                    summary.left.push(name);
                }
                (NodePhase::AddCooldown, false)
                    if elapsed(node.phase_since()).is_some_and(|e| e >= self.add_cooldown) =>
                {
                    node.deactivate();
                    warn!(node = %name, "node did not join within the add cooldown");
                }
                (NodePhase::RemoveCooldown, false) => {
                    node.deactivate();
                    info!(node = %name, "node left");
                    summary.left.push(name);
                }
                (NodePhase::RemoveCooldown, true)
                    if elapsed(node.phase_since()).is_some_and(|e| e >= self.remove_cooldown) =>
                {
                    node.activate();
                    warn!(node = %name, "node still present after the remove cooldown");
                    summary.recovered.push(name);
                }
                _ => {}
            }
        }

        summary.active = self.active_count();
        if !summary.is_unchanged() {
            debug!(?summary, "membership changed");
        }
        Ok(summary)
    }

    // ── Controllers ────────────────────────────────────────────────

    /// Sample every active node concurrently, then apply all results in
    /// inventory order.
    pub async fn update_controllers(&mut self, api: &dyn ClusterApi) -> CycleSnapshot {
        let targets: Vec<(usize, String)> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_active())
            .map(|(i, n)| (i, n.name().to_string()))
            .collect();

        let namespace = self.namespace.as_str();
        let metrics_retry = self.metrics_retry;
        let fetches = targets.iter().map(|(index, name)| async move {
            let name = name.as_str();
            let util = metrics_retry
                .run("node_utilization", move || api.node_utilization(name))
                .await;
            let running = api.running_workloads(name, namespace).await;
            (*index, util, running)
        });
        let results = join_all(fetches).await;

        let mut samples = Vec::with_capacity(results.len());
        for (index, util, running) in results {
            let low_threshold = self.low_util_threshold;
            let node = &mut self.nodes[index];
            let name = node.name().to_string();

            let applied = match util {
                Ok(measured) if measured.is_finite() => {
                    node.controller_mut().update(measured);
                    let low_run = node.track_low_utilization(measured < low_threshold);
                    if low_run > 0 {
                        debug!(node = %name, low_run, "node below low-utilization threshold");
                    }
                    node.controller().last_sample()
                }
                Ok(_) => {
                    node.controller().hold();
                    None
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "utilization unavailable, holding setpoint");
                    node.controller().hold();
                    None
                }
            };

            let running = match running {
                Ok(count) => Some(count),
                Err(e) => {
                    warn!(node = %name, error = %e, "running workload count unavailable");
                    None
                }
            };
            node.set_running_workloads(running);

            samples.push(NodeSample {
                node: name,
                applied,
                max_pods: node.max_pods(),
                running,
            });
        }

        CycleSnapshot {
            nodes: samples,
            active_count: self.active_count(),
            average_utilization: self.average_active_utilization(),
            cluster_capacity: self.cluster_capacity(),
            running_workloads: self.running_workloads(),
        }
    }

    // ── Node actions ───────────────────────────────────────────────

    fn cooldown_remaining(
        last: Option<Instant>,
        cooldown: Duration,
        now: Instant,
    ) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(last?);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    /// Ask the orchestrator to add an inactive node.
    pub async fn add_node(
        &mut self,
        api: &dyn ClusterApi,
        name: &str,
        now: Instant,
    ) -> RegistryResult<NodeAction> {
        let index = self.index_of(name)?;

        if let Some(remaining) =
            Self::cooldown_remaining(self.cooldown_last_add, self.add_cooldown, now)
        {
            info!(node = %name, ?remaining, "add suppressed by cooldown");
            return Ok(NodeAction::Suppressed { remaining });
        }

        let phase = self.nodes[index].phase();
        if phase != NodePhase::Inactive {
            return Err(RegistryError::InvalidTransition {
                node: name.to_string(),
                action: "add",
                phase,
            });
        }

        let spec: NodeSpec = self.nodes[index].spec().clone();
        api.create_node(&spec)
            .await
            .map_err(|source| RegistryError::NodeActionFailed {
                node: name.to_string(),
                action: "add",
                source,
            })?;

        self.nodes[index].begin_add(now);
        self.cooldown_last_add = Some(now);
        info!(node = %name, address = %spec.address, "node add issued");
        Ok(NodeAction::Applied)
    }

    /// Drain and remove an active, removable node.
    pub async fn remove_node(
        &mut self,
        api: &dyn ClusterApi,
        name: &str,
        now: Instant,
    ) -> RegistryResult<NodeAction> {
        let index = self.index_of(name)?;
        let node = &self.nodes[index];

        if !node.can_remove() {
            return Err(RegistryError::NotRemovable(name.to_string()));
        }
        if node.phase() != NodePhase::Active {
            return Err(RegistryError::InvalidTransition {
                node: name.to_string(),
                action: "remove",
                phase: node.phase(),
            });
        }

        if let Some(remaining) = Self::cooldown_remaining(
            self.cooldown_last_remove_failure,
            self.remove_cooldown,
            now,
        ) {
            info!(node = %name, ?remaining, "remove suppressed by cooldown");
            return Ok(NodeAction::Suppressed { remaining });
        }

        match api.drain_node(name, &self.namespace).await {
            Ok(drained) => debug!(node = %name, drained, "node drained before removal"),
            Err(e) => warn!(node = %name, error = %e, "drain before removal failed"),
        }

        api.delete_node(name)
            .await
            .map_err(|source| RegistryError::NodeActionFailed {
                node: name.to_string(),
                action: "remove",
                source,
            })?;

        self.nodes[index].begin_remove(now);
        self.cooldown_last_remove_failure = Some(now);
        info!(node = %name, "node remove issued");
        Ok(NodeAction::Applied)
    }

    /// Drain workloads from every active node, continuing past failures.
    pub async fn cleanup_all(&mut self, api: &dyn ClusterApi) -> CleanupReport {
        let mut report = CleanupReport::default();
        for node in self.nodes.iter_mut().filter(|n| n.is_active()) {
            let name = node.name().to_string();
            match api.drain_node(&name, &self.namespace).await {
                Ok(count) => {
                    node.set_running_workloads(Some(0));
                    report.drained.push((name, count));
                }
                Err(e) => {
                    warn!(node = %name, error = %e, "cleanup failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        info!(
            drained = report.drained.len(),
            failed = report.failed.len(),
            "workload cleanup issued on active nodes"
        );
        report
    }
}
