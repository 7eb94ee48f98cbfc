//! Per-node runtime state.

use std::fmt;
use std::time::Instant;

use capgrid_admission::AdmissionController;
use capgrid_core::{NodeRole, NodeSpec};

/// Lifecycle phase of an inventory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    /// Not a cluster member.
    Inactive,
    /// Cluster member; its controller runs every cycle.
    Active,
    /// Vanished without a remove; waiting out the failure cooldown.
    FailurePending,
    /// Create accepted, waiting for the node to join.
    AddCooldown,
    /// Delete accepted, waiting for the node to leave.
    RemoveCooldown,
}

impl NodePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodePhase::Inactive => "inactive",
            NodePhase::Active => "active",
            NodePhase::FailurePending => "failure_pending",
            NodePhase::AddCooldown => "add_cooldown",
            NodePhase::RemoveCooldown => "remove_cooldown",
        }
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inventory node and everything the control loop knows about it.
///
/// Fields are private; transitions are `pub(crate)` and driven by
/// [`ClusterRegistry`](crate::ClusterRegistry).
#[derive(Debug, Clone)]
pub struct Node {
    spec: NodeSpec,
    role: NodeRole,
    phase: NodePhase,
    /// When the current cooldown phase was entered.
    phase_since: Option<Instant>,
    can_remove: bool,
    was_removed: bool,
    failure_detected: bool,
    failure_at: Option<Instant>,
    low_util_count: u32,
    running_workloads: Option<u32>,
    controller: AdmissionController,
}

impl Node {
    pub fn new(spec: NodeSpec, controller: AdmissionController) -> Self {
        let role = spec.labels.role;
        let mut node = Self {
            spec,
            role: NodeRole::Worker,
            phase: NodePhase::Inactive,
            phase_since: None,
            can_remove: true,
            was_removed: false,
            failure_detected: false,
            failure_at: None,
            low_util_count: 0,
            running_workloads: None,
            controller,
        };
        node.apply_role(role);
        node
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == NodePhase::Active
    }

    pub fn can_remove(&self) -> bool {
        self.can_remove
    }

    pub fn was_removed(&self) -> bool {
        self.was_removed
    }

    pub fn failure_detected(&self) -> bool {
        self.failure_detected
    }

    pub fn failure_at(&self) -> Option<Instant> {
        self.failure_at
    }

    pub fn low_util_count(&self) -> u32 {
        self.low_util_count
    }

    /// Last observed running-workload count; `None` if the last query failed.
    pub fn running_workloads(&self) -> Option<u32> {
        self.running_workloads
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    pub fn max_pods(&self) -> u32 {
        self.controller.max_pods()
    }

    /// Last applied utilization sample, `None` until the first one.
    pub fn current_util(&self) -> Option<f64> {
        (self.controller.state().samples > 0).then(|| self.controller.current_util())
    }

    /// Whether this node has room for one more workload.
    pub fn has_spare_capacity(&self) -> bool {
        self.running_workloads
            .is_some_and(|running| running < self.controller.max_pods())
    }

    pub(crate) fn phase_since(&self) -> Option<Instant> {
        self.phase_since
    }

    // ── Mutators ───────────────────────────────────────────────────

    /// The only place `can_remove` changes. Once a node is seen as master it
    /// stays non-removable.
    pub(crate) fn apply_role(&mut self, role: NodeRole) {
        self.role = role;
        if role == NodeRole::Master {
            self.can_remove = false;
        }
    }

    pub(crate) fn controller_mut(&mut self) -> &mut AdmissionController {
        &mut self.controller
    }

    pub(crate) fn set_running_workloads(&mut self, running: Option<u32>) {
        self.running_workloads = running;
    }

    /// Count a cycle below the low-utilization threshold, or reset the run.
    pub(crate) fn track_low_utilization(&mut self, low: bool) -> u32 {
        self.low_util_count = if low { self.low_util_count + 1 } else { 0 };
        self.low_util_count
    }

    pub(crate) fn activate(&mut self) {
        self.phase = NodePhase::Active;
        self.phase_since = None;
        self.was_removed = false;
        self.failure_detected = false;
        self.failure_at = None;
    }

    pub(crate) fn mark_failed(&mut self, now: Instant) {
        self.phase = NodePhase::FailurePending;
        self.phase_since = Some(now);
        self.failure_detected = true;
        self.failure_at = Some(now);
        self.running_workloads = None;
    }

    pub(crate) fn deactivate(&mut self) {
        self.phase = NodePhase::Inactive;
        self.phase_since = None;
        self.running_workloads = None;
        self.low_util_count = 0;
    }

    pub(crate) fn begin_add(&mut self, now: Instant) {
        self.phase = NodePhase::AddCooldown;
        self.phase_since = Some(now);
    }

    pub(crate) fn begin_remove(&mut self, now: Instant) {
        self.phase = NodePhase::RemoveCooldown;
        self.phase_since = Some(now);
        self.was_removed = true;
        self.running_workloads = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgrid_admission::{AdmissionLimits, PiGains};

    fn node(role: NodeRole) -> Node {
        let spec = NodeSpec::new("node1", "10.0.0.2", role, "worker1");
        let controller = AdmissionController::new(
            "node1",
            PiGains {
                kp: 0.094,
                ki: 0.006,
            },
            80.0,
            (75.0, 85.0),
            AdmissionLimits {
                min_pods: 0,
                max_pods: 8,
            },
        );
        Node::new(spec, controller)
    }

    #[test]
    fn master_is_never_removable() {
        let mut n = node(NodeRole::Master);
        assert!(!n.can_remove());
        n.apply_role(NodeRole::Worker);
        assert!(!n.can_remove());
    }

    #[test]
    fn worker_promoted_to_master_loses_removability() {
        let mut n = node(NodeRole::Worker);
        assert!(n.can_remove());
        n.apply_role(NodeRole::Master);
        assert!(!n.can_remove());
        n.apply_role(NodeRole::Worker);
        assert!(!n.can_remove());
    }

    #[test]
    fn spare_capacity_requires_known_running_count() {
        let mut n = node(NodeRole::Worker);
        n.controller_mut().update(60.0);
        assert_eq!(n.max_pods(), 2);

        assert!(!n.has_spare_capacity());
        n.set_running_workloads(Some(1));
        assert!(n.has_spare_capacity());
        n.set_running_workloads(Some(2));
        assert!(!n.has_spare_capacity());
    }

    #[test]
    fn failure_then_recovery_clears_flag() {
        let mut n = node(NodeRole::Worker);
        let now = Instant::now();
        n.activate();
        n.mark_failed(now);
        assert_eq!(n.phase(), NodePhase::FailurePending);
        assert!(n.failure_detected());
        assert_eq!(n.failure_at(), Some(now));

        n.activate();
        assert!(n.is_active());
        assert!(!n.failure_detected());
    }

    #[test]
    fn low_utilization_run_resets() {
        let mut n = node(NodeRole::Worker);
        assert_eq!(n.track_low_utilization(true), 1);
        assert_eq!(n.track_low_utilization(true), 2);
        assert_eq!(n.track_low_utilization(false), 0);
    }
}
